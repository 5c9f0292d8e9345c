/// Execution manager
///
/// Wraps both execution modes behind one entry point. While runs are in
/// flight the manager keeps live per-unit state for each of them, keyed by run
/// id and fed by engine events; when a run ends its state is reconciled
/// against the results, frozen and appended to a bounded history that backs
/// the aggregate statistics.

use crate::error::{EngineError, EngineResult};
use crate::runtime::engine::{ExecutionEngine, ExecutionMode, ExecutionOptions, WorkflowRun};
use crate::runtime::events::{ExecutionEvent, ExecutionNotifier};
use crate::runtime::executor::ExecutionResult;
use crate::runtime::scheduler::ParallelScheduler;
use crate::workflow::types::{Edge, WorkUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Lifecycle status of a unit within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Success | UnitStatus::Error | UnitStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRunState {
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the unit first reaches a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitRunState {
    fn pending() -> Self {
        Self {
            status: UnitStatus::Pending,
            start_time: None,
            end_time: None,
            result: None,
            error: None,
        }
    }
}

/// State of one whole-graph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub units: BTreeMap<String, UnitRunState>,
    pub total_units: usize,
    pub completed_units: usize,
    pub mode: ExecutionMode,
}

impl RunState {
    fn new(run_id: String, units: &[WorkUnit], mode: ExecutionMode) -> Self {
        Self {
            run_id,
            start_time: Utc::now(),
            end_time: None,
            units: units
                .iter()
                .map(|unit| (unit.id.clone(), UnitRunState::pending()))
                .collect(),
            total_units: units.len(),
            completed_units: 0,
            mode,
        }
    }

    /// Every unit ended in success or skipped
    pub fn succeeded(&self) -> bool {
        self.units
            .values()
            .all(|unit| matches!(unit.status, UnitStatus::Success | UnitStatus::Skipped))
    }

    /// Latest unit end time minus run start, if any unit completed
    pub fn duration_ms(&self) -> Option<i64> {
        self.units
            .values()
            .filter_map(|unit| unit.end_time)
            .max()
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    fn apply(&mut self, unit_id: &str, patch: UnitStatePatch) {
        if !self.units.contains_key(unit_id) {
            self.units.insert(unit_id.to_string(), UnitRunState::pending());
            self.total_units += 1;
        }
        let Some(unit) = self.units.get_mut(unit_id) else {
            return;
        };

        let now = Utc::now();
        if let Some(status) = patch.status {
            if status == UnitStatus::Running || status.is_terminal() {
                unit.start_time.get_or_insert(now);
            }
            if status.is_terminal() {
                if unit.end_time.is_none() {
                    self.completed_units += 1;
                }
                unit.end_time = Some(now);
            }
            if status == UnitStatus::Success {
                unit.error = None;
            }
            unit.status = status;
        }
        if patch.result.is_some() {
            unit.result = patch.result;
        }
        if patch.error.is_some() {
            unit.error = patch.error;
        }
    }

    /// Align unit states with the final results of a run
    fn reconcile(&mut self, run: &WorkflowRun) {
        let ids: Vec<String> = self.units.keys().cloned().collect();
        for unit_id in ids {
            let status = self.units.get(&unit_id).map(|unit| unit.status);
            let patch = match (run.results.get(&unit_id), status) {
                (Some(result), _) if result.success => UnitStatePatch::status(UnitStatus::Success).with_result(result.clone()),
                (Some(result), _) => UnitStatePatch::status(UnitStatus::Error)
                    .with_result(result.clone())
                    .with_error(result.error.clone().unwrap_or_default()),
                (None, Some(UnitStatus::Running)) => {
                    UnitStatePatch::status(UnitStatus::Error).with_error("run ended while the unit was running")
                }
                (None, Some(UnitStatus::Pending)) => UnitStatePatch::status(UnitStatus::Skipped),
                (None, _) => continue,
            };
            self.apply(&unit_id, patch);
        }
        self.end_time = Some(Utc::now());
    }
}

/// Incremental update of one unit's state
#[derive(Debug, Clone, Default)]
pub struct UnitStatePatch {
    pub status: Option<UnitStatus>,
    pub result: Option<ExecutionResult>,
    pub error: Option<String>,
}

impl UnitStatePatch {
    pub fn status(status: UnitStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: ExecutionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Aggregates over the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_runs: usize,
    pub successful_runs: usize,
    pub success_rate: f64,
    /// Mean run duration over runs where at least one unit completed
    pub average_duration_ms: f64,
    /// Units with the most logged errors, ties broken by id
    pub most_failed_units: Vec<(String, usize)>,
}

/// Tracks runs on top of the engine and the batch scheduler
pub struct ExecutionManager {
    engine: Arc<ExecutionEngine>,
    scheduler: ParallelScheduler,
    /// Live runs by run id
    active: Mutex<HashMap<String, RunState>>,
    /// Run id of the open step run, if any
    step_run: Mutex<Option<String>>,
    history: Mutex<VecDeque<RunState>>,
    max_history: usize,
    subscribers: RwLock<Vec<Arc<dyn ExecutionNotifier>>>,
}

impl std::fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("engine", &self.engine)
            .field("max_history", &self.max_history)
            .finish()
    }
}

/// Notifier handed to the engine for one managed run
struct StateTracker<'a> {
    manager: &'a ExecutionManager,
}

impl ExecutionNotifier for StateTracker<'_> {
    fn notify(&self, event: ExecutionEvent) {
        let patch = match &event {
            ExecutionEvent::UnitStarted { unit_id, .. } => Some((unit_id, UnitStatePatch::status(UnitStatus::Running))),
            ExecutionEvent::UnitCompleted { unit_id, result, .. } => Some((
                unit_id,
                UnitStatePatch::status(UnitStatus::Success).with_result(result.clone()),
            )),
            ExecutionEvent::UnitFailed { unit_id, error, .. } => Some((
                unit_id,
                UnitStatePatch::status(UnitStatus::Error).with_error(error.clone()),
            )),
            ExecutionEvent::UnitSkipped { unit_id, .. } => Some((unit_id, UnitStatePatch::status(UnitStatus::Skipped))),
            ExecutionEvent::RunStarted { .. } | ExecutionEvent::RunFinished { .. } => None,
        };

        if let Some((unit_id, patch)) = patch {
            let mut active = self.manager.active.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = active.get_mut(event.run_id()) {
                state.apply(unit_id, patch);
            }
        }

        self.manager.broadcast(event);
    }
}

impl ExecutionManager {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        let max_history = engine.config().retention.max_history.max(1);
        Self {
            scheduler: ParallelScheduler::new(engine.clone()),
            engine,
            active: Mutex::new(HashMap::new()),
            step_run: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            max_history,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &ParallelScheduler {
        &self.scheduler
    }

    /// Receive every event of managed runs
    pub fn subscribe(&self, notifier: Arc<dyn ExecutionNotifier>) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(notifier);
    }

    fn broadcast(&self, event: ExecutionEvent) {
        let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        for subscriber in subscribers.iter() {
            subscriber.notify(event.clone());
        }
    }

    /// Run the graph in the mode named by `options`, tracking state throughout
    ///
    /// Structural errors are returned without touching the history.
    pub async fn execute_workflow(&self, units: &[WorkUnit], edges: &[Edge], options: &ExecutionOptions) -> EngineResult<WorkflowRun> {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let options = ExecutionOptions {
            run_id: Some(run_id.clone()),
            ..options.clone()
        };

        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id.clone(), RunState::new(run_id.clone(), units, options.mode));
        tracing::info!("📊 Managed {:?} run {} with {} units", options.mode, run_id, units.len());

        let tracker = StateTracker { manager: self };
        let outcome = match options.mode {
            ExecutionMode::Sequential => self.engine.execute_workflow_with(units, edges, &options, &tracker).await,
            ExecutionMode::Parallel => self.scheduler.execute_workflow_with(units, edges, &options, &tracker).await,
        };

        let state = self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&run_id);
        match outcome {
            Ok(run) => {
                if let Some(mut state) = state {
                    state.reconcile(&run);
                    tracing::info!(
                        "📈 Run {} recorded: {}/{} units completed",
                        state.run_id,
                        state.completed_units,
                        state.total_units
                    );
                    self.push_history(state);
                }
                Ok(run)
            }
            Err(e) => {
                tracing::error!("❌ Run {} aborted: {}", run_id, e);
                Err(e)
            }
        }
    }

    /// Push a state change for one unit of the open step run
    ///
    /// Returns false when no step run is open.
    pub fn update_unit_state(&self, unit_id: &str, patch: UnitStatePatch) -> bool {
        let step_run = self.step_run.lock().unwrap_or_else(|e| e.into_inner());
        let Some(run_id) = step_run.as_deref() else {
            return false;
        };
        self.update_run_state(run_id, unit_id, patch)
    }

    /// Push a state change for one unit of the live run `run_id`
    ///
    /// Returns false when that run is not in progress.
    pub fn update_run_state(&self, run_id: &str, unit_id: &str, patch: UnitStatePatch) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get_mut(run_id) {
            Some(state) => {
                state.apply(unit_id, patch);
                true
            }
            None => false,
        }
    }

    /// Execute a single unit, tracking it in the step run
    ///
    /// Opens a sequential step run when none is open; close it with
    /// `finish_step_run`.
    pub async fn execute_step(&self, unit: &WorkUnit, input: Value) -> EngineResult<ExecutionResult> {
        {
            let mut step_run = self.step_run.lock().unwrap_or_else(|e| e.into_inner());
            if step_run.is_none() {
                let run_id = uuid::Uuid::new_v4().to_string();
                tracing::info!("🧪 Opening step run {}", run_id);
                self.active
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(run_id.clone(), RunState::new(run_id.clone(), &[], ExecutionMode::Sequential));
                *step_run = Some(run_id);
            }
        }

        self.update_unit_state(&unit.id, UnitStatePatch::status(UnitStatus::Running));
        match self.engine.execute_unit(&unit.id, &unit.kind, input, &unit.config).await {
            Ok(result) => {
                self.update_unit_state(&unit.id, UnitStatePatch::status(UnitStatus::Success).with_result(result.clone()));
                Ok(result)
            }
            Err(EngineError::UnitFailed(error)) => {
                let mut patch = UnitStatePatch::status(UnitStatus::Error).with_error(error.message.clone());
                patch.result = self.engine.get_results().remove(&unit.id);
                self.update_unit_state(&unit.id, patch);
                Err(EngineError::UnitFailed(error))
            }
            Err(e) => {
                self.update_unit_state(&unit.id, UnitStatePatch::status(UnitStatus::Error).with_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Freeze the open step run into history
    pub fn finish_step_run(&self) -> Option<RunState> {
        let run_id = self.step_run.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let mut state = self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&run_id)?;
        state.end_time = Some(Utc::now());
        self.push_history(state.clone());
        Some(state)
    }

    fn push_history(&self, state: RunState) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(state);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// The most recently started live run
    pub fn get_current_run(&self) -> Option<RunState> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .max_by_key(|state| state.start_time)
            .cloned()
    }

    /// Every live run, oldest first
    pub fn get_active_runs(&self) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        runs.sort_by_key(|state| state.start_time);
        runs
    }

    /// Completed runs, oldest first
    pub fn get_history(&self) -> Vec<RunState> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn export_history(&self) -> Vec<RunState> {
        self.get_history()
    }

    /// Replace the history, keeping the newest `max_history` runs
    pub fn import_history(&self, runs: Vec<RunState>) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let skip = runs.len().saturating_sub(self.max_history);
        *history = runs.into_iter().skip(skip).collect();
    }

    pub fn get_execution_stats(&self, top_n: usize) -> ExecutionStats {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());

        let total_runs = history.len();
        let successful_runs = history.iter().filter(|run| run.succeeded()).count();
        let durations: Vec<i64> = history.iter().filter_map(RunState::duration_ms).collect();

        let mut most_failed_units: Vec<(String, usize)> = self.engine.error_handler().error_counts().into_iter().collect();
        most_failed_units.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_failed_units.truncate(top_n);

        ExecutionStats {
            total_runs,
            successful_runs,
            success_rate: if total_runs == 0 {
                0.0
            } else {
                successful_runs as f64 / total_runs as f64
            },
            average_duration_ms: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<i64>() as f64 / durations.len() as f64
            },
            most_failed_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::runtime::events::ChannelNotifier;
    use crate::runtime::executor::{FnExecutor, UnitOutput};
    use crate::workflow::types::ExecutionContext;
    use serde_json::json;

    fn manager(max_history: usize) -> ExecutionManager {
        let mut config = EngineConfig::default();
        config.cache.enabled = false;
        config.retention.max_history = max_history;
        let engine = ExecutionEngine::new(config);
        engine
            .register_executor(
                "echo",
                Arc::new(FnExecutor::new(|ctx: ExecutionContext| async move {
                    Ok(UnitOutput::new(ctx.data))
                })),
            )
            .unwrap();
        engine
            .register_executor(
                "fail",
                Arc::new(FnExecutor::new(|_ctx: ExecutionContext| async move {
                    Err(anyhow::anyhow!("invalid record"))
                })),
            )
            .unwrap();
        ExecutionManager::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn finished_runs_are_reconciled() {
        let manager = manager(10);
        let units = vec![
            WorkUnit::new("a", "echo"),
            WorkUnit::new("b", "fail"),
            WorkUnit::new("c", "echo"),
        ];
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c")];

        manager
            .execute_workflow(&units, &edges, &ExecutionOptions::sequential())
            .await
            .unwrap();

        let history = manager.get_history();
        assert_eq!(history.len(), 1);
        let run = &history[0];
        assert_eq!(run.units["a"].status, UnitStatus::Success);
        assert_eq!(run.units["b"].status, UnitStatus::Error);
        assert_eq!(run.units["c"].status, UnitStatus::Skipped);
        assert_eq!(run.completed_units, 3);
        assert!(run.end_time.is_some());
        assert!(manager.get_current_run().is_none());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let manager = manager(2);
        let units = vec![WorkUnit::new("a", "echo")];
        for _ in 0..3 {
            manager.execute_workflow(&units, &[], &ExecutionOptions::parallel(1)).await.unwrap();
        }
        assert_eq!(manager.get_history().len(), 2);
        assert_eq!(manager.get_history()[0].mode, ExecutionMode::Parallel);
    }

    #[tokio::test]
    async fn structural_errors_leave_history_untouched() {
        let manager = manager(10);
        let err = manager
            .execute_workflow(&[WorkUnit::new("a", "ghost")], &[], &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_structural());
        assert!(manager.get_history().is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_history_and_errors() {
        let manager = manager(10);
        let good = vec![WorkUnit::new("a", "echo")];
        let bad = vec![WorkUnit::new("x", "fail"), WorkUnit::new("y", "fail")];

        manager.execute_workflow(&good, &[], &ExecutionOptions::default()).await.unwrap();
        manager.execute_workflow(&bad, &[], &ExecutionOptions::parallel(2)).await.unwrap();
        manager.execute_workflow(&bad[1..], &[], &ExecutionOptions::default()).await.unwrap();

        let stats = manager.get_execution_stats(1);
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 1);
        assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.most_failed_units, vec![("y".to_string(), 2)]);
    }

    #[tokio::test]
    async fn subscribers_see_every_event() {
        let manager = manager(10);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.subscribe(Arc::new(ChannelNotifier::new(tx)));

        manager
            .execute_workflow(&[WorkUnit::new("a", "echo")], &[], &ExecutionOptions::default())
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ExecutionEvent::RunStarted { .. } => "run_started",
                ExecutionEvent::UnitStarted { .. } => "unit_started",
                ExecutionEvent::UnitCompleted { .. } => "unit_completed",
                ExecutionEvent::UnitFailed { .. } => "unit_failed",
                ExecutionEvent::UnitSkipped { .. } => "unit_skipped",
                ExecutionEvent::RunFinished { .. } => "run_finished",
            });
        }
        assert_eq!(kinds, vec!["run_started", "unit_started", "unit_completed", "run_finished"]);
    }

    #[tokio::test]
    async fn step_execution_tracks_state() {
        let manager = manager(10);
        let unit = WorkUnit::new("s1", "echo");

        let result = manager.execute_step(&unit, json!({"k": 1})).await.unwrap();
        assert_eq!(result.data, json!({"k": 1}));
        assert!(manager.execute_step(&WorkUnit::new("s2", "fail"), json!({})).await.is_err());

        let current = manager.get_current_run().unwrap();
        assert_eq!(current.total_units, 2);
        assert_eq!(current.completed_units, 2);
        assert_eq!(current.units["s2"].status, UnitStatus::Error);

        let frozen = manager.finish_step_run().unwrap();
        assert_eq!(manager.get_history(), vec![frozen]);
    }

    #[tokio::test]
    async fn concurrent_runs_keep_separate_state() {
        let manager = manager(10);
        crate::runtime::builtin::register_builtins(manager.engine()).unwrap();
        let slow = vec![WorkUnit::new("wait", "delay").with_config(json!({"ms": 50}))];
        let fast = vec![WorkUnit::new("f", "trigger")];

        let opts = ExecutionOptions::sequential();
        let (slow_run, fast_run) = tokio::join!(
            manager.execute_workflow(&slow, &[], &opts),
            manager.execute_workflow(&fast, &[], &opts),
        );
        slow_run.unwrap();
        fast_run.unwrap();

        let history = manager.get_history();
        assert_eq!(history.len(), 2);
        let mut recorded: Vec<Vec<String>> = history.iter().map(|run| run.units.keys().cloned().collect()).collect();
        recorded.sort();
        assert_eq!(recorded, vec![vec!["f".to_string()], vec!["wait".to_string()]]);
        assert!(history.iter().all(RunState::succeeded));
        assert!(manager.get_active_runs().is_empty());
    }

    #[tokio::test]
    async fn most_failed_ties_break_by_unit_id() {
        let manager = manager(10);
        let handler = manager.engine().error_handler();
        handler.record_error("b", "invalid record");
        handler.record_error("a", "invalid record");
        handler.record_error("c", "invalid record");
        handler.record_error("c", "invalid record");

        let stats = manager.get_execution_stats(3);
        assert_eq!(
            stats.most_failed_units,
            vec![("c".to_string(), 2), ("a".to_string(), 1), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn average_duration_skips_runs_without_completed_units() {
        let manager = manager(10);
        let start = Utc::now();
        let run = |id: &str, elapsed_ms: Option<i64>| {
            let mut state = RunState::new(id.to_string(), &[WorkUnit::new("u", "echo")], ExecutionMode::Sequential);
            state.start_time = start;
            if let Some(ms) = elapsed_ms {
                let unit = state.units.get_mut("u").unwrap();
                unit.status = UnitStatus::Success;
                unit.end_time = Some(start + chrono::Duration::milliseconds(ms));
                state.completed_units = 1;
            }
            state
        };

        manager.import_history(vec![run("r1", Some(100)), run("r2", Some(300)), run("r3", None)]);

        let stats = manager.get_execution_stats(5);
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 2);
        assert!((stats.average_duration_ms - 200.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn history_export_import_round_trips() {
        let manager = manager(10);
        manager
            .execute_workflow(&[WorkUnit::new("a", "echo")], &[], &ExecutionOptions::default())
            .await
            .unwrap();

        let exported = serde_json::to_value(manager.export_history()).unwrap();
        let restored = self::manager(10);
        restored.import_history(serde_json::from_value(exported.clone()).unwrap());
        assert_eq!(serde_json::to_value(restored.export_history()).unwrap(), exported);
    }
}
