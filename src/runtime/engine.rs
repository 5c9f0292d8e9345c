/// Petgraph-based workflow execution engine
///
/// Owns the executor registry and the shared services a run needs (result
/// cache, error handler, variable store, execution log). Executes single
/// units and walks the dependency chain sequentially from every start unit,
/// applying each unit's retry and fallback policy along the way.

use crate::config::{EngineConfig, JoinPolicy};
use crate::error::{EngineError, EngineResult};
use crate::runtime::cache::ResultCache;
use crate::runtime::error_handler::{ErrorHandler, ErrorStrategy, FallbackAction, RecoveryAction};
use crate::runtime::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::runtime::executor::{ExecutionResult, UnitExecutor, UnitOutput};
use crate::runtime::log::{ExecutionLog, LogEntry};
use crate::runtime::registry::ExecutorRegistry;
use crate::variables::VariableStore;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{Edge, ExecutionContext, WorkUnit};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// How a whole-graph run is scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Depth-first chain walk, one unit at a time
    #[default]
    Sequential,
    /// Dependency batches, members of a batch run concurrently
    Parallel,
}

/// Options for `execute_workflow`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,
    /// Batch concurrency cap; the configured default when absent
    pub max_concurrency: Option<usize>,
    /// Run only from this unit (and, in parallel mode, what it reaches)
    pub start_unit_id: Option<String>,
    /// Input handed to start units; `{}` when absent
    pub input: Option<Value>,
    /// Run id to report in events; generated when absent
    pub run_id: Option<String>,
}

impl ExecutionOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel(max_concurrency: usize) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrency: Some(max_concurrency),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn starting_at(mut self, unit_id: impl Into<String>) -> Self {
        self.start_unit_id = Some(unit_id.into());
        self
    }
}

/// Outcome of a whole-graph run
///
/// Unit failures never turn into an `Err`; they show up here as failed
/// results and, when a stop decision ended the run, in `halted_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    /// Latest result per executed unit
    pub results: BTreeMap<String, ExecutionResult>,
    /// Unit whose failure stopped the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_by: Option<String>,
    /// Planner warnings (forced cycle admission and the like)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl WorkflowRun {
    /// Every executed unit succeeded and nothing stopped the run
    pub fn succeeded(&self) -> bool {
        self.halted_by.is_none() && self.results.values().all(|result| result.success)
    }
}

/// Final outcome of one unit after its retry policy ran
#[derive(Debug, Clone)]
pub(crate) struct PolicyOutcome {
    pub result: ExecutionResult,
    /// Terminal decision when the unit failed for good
    pub action: Option<RecoveryAction>,
}

/// Mutable state of a single run, shared by the walker or the batch members
pub(crate) struct RunScope<'n> {
    pub run_id: String,
    pub graph: WorkflowGraph,
    notifier: &'n dyn ExecutionNotifier,
    results: Mutex<HashMap<String, ExecutionResult>>,
    visited: Mutex<HashSet<String>>,
    halted_by: Mutex<Option<String>>,
    warnings: Mutex<Vec<String>>,
}

impl<'n> RunScope<'n> {
    pub fn new(run_id: String, graph: WorkflowGraph, notifier: &'n dyn ExecutionNotifier) -> Self {
        Self {
            run_id,
            graph,
            notifier,
            results: Mutex::new(HashMap::new()),
            visited: Mutex::new(HashSet::new()),
            halted_by: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn notify(&self, event: ExecutionEvent) {
        self.notifier.notify(event);
    }

    pub fn skip(&self, unit_id: &str, reason: &str) {
        tracing::debug!("⏭️ Skipping unit '{}': {}", unit_id, reason);
        self.notify(ExecutionEvent::UnitSkipped {
            run_id: self.run_id.clone(),
            unit_id: unit_id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn record(&self, result: ExecutionResult) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.unit_id.clone(), result);
    }

    pub fn result(&self, unit_id: &str) -> Option<ExecutionResult> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(unit_id)
            .cloned()
    }

    /// True the first time a unit id is seen in this run
    pub fn first_visit(&self, unit_id: &str) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(unit_id.to_string())
    }

    pub fn halt(&self, unit_id: &str) {
        let mut halted_by = self.halted_by.lock().unwrap_or_else(|e| e.into_inner());
        if halted_by.is_none() {
            *halted_by = Some(unit_id.to_string());
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted_by.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn warn(&self, message: String) {
        self.warnings.lock().unwrap_or_else(|e| e.into_inner()).push(message);
    }

    pub fn into_run(self) -> WorkflowRun {
        WorkflowRun {
            run_id: self.run_id,
            results: self
                .results
                .into_inner()
                .unwrap_or_else(|e| e.into_inner())
                .into_iter()
                .collect(),
            halted_by: self.halted_by.into_inner().unwrap_or_else(|e| e.into_inner()),
            warnings: self.warnings.into_inner().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// Workflow execution engine
///
/// All collaborators are explicit instances; share the engine through an
/// `Arc` to use it from the batch scheduler and the execution manager.
#[derive(Debug)]
pub struct ExecutionEngine {
    config: EngineConfig,
    registry: ExecutorRegistry,
    cache: Arc<ResultCache>,
    error_handler: Arc<ErrorHandler>,
    variables: Arc<VariableStore>,
    log: Arc<ExecutionLog>,
    /// Results of the latest run plus any step executions since
    results: Mutex<HashMap<String, ExecutionResult>>,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ExecutionEngine {
    /// Create an engine with fresh collaborators built from `config`
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(ResultCache::from_config(&config.cache));
        let error_handler = Arc::new(ErrorHandler::new(ErrorStrategy::from(&config.retry)));
        let log = Arc::new(ExecutionLog::new(config.retention.max_log_entries));

        Self {
            registry: ExecutorRegistry::new(),
            cache,
            error_handler,
            variables: Arc::new(VariableStore::new()),
            log,
            results: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Use an existing variable store (e.g. one shared with other engines)
    pub fn with_variables(mut self, variables: Arc<VariableStore>) -> Self {
        self.variables = variables;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub(crate) fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Register the executor for a unit kind
    ///
    /// Safe to call while runs are in flight.
    pub fn register_executor(&self, kind: &str, executor: Arc<dyn UnitExecutor>) -> EngineResult<()> {
        self.registry.register(kind, executor)
    }

    /// Check a graph before execution
    ///
    /// Rejects duplicate ids, edges to unknown units, enabled units whose kind
    /// has no executor, and cycles.
    pub fn validate(&self, units: &[WorkUnit], edges: &[Edge]) -> EngineResult<()> {
        let graph = self.prepare(units, edges)?;
        graph.ensure_acyclic()
    }

    /// Build the graph and check executors; cycles are left to the caller
    pub(crate) fn prepare(&self, units: &[WorkUnit], edges: &[Edge]) -> EngineResult<WorkflowGraph> {
        let graph = WorkflowGraph::build(units, edges)?;

        if let Some(unit) = units
            .iter()
            .find(|unit| unit.enabled && !self.registry.contains(&unit.kind))
        {
            tracing::error!("❌ Unit '{}' has no executor for kind '{}'", unit.id, unit.kind);
            return Err(EngineError::ExecutorNotFound { kind: unit.kind.clone() });
        }

        Ok(graph)
    }

    /// Root units that only exist as another unit's fallback target
    ///
    /// They run when the fallback fires, not as start units. Empty when no
    /// other root would be left to start from.
    pub(crate) fn reserved_fallbacks(&self, units: &[WorkUnit], graph: &WorkflowGraph) -> HashSet<String> {
        let reserved: HashSet<String> = units
            .iter()
            .map(|unit| self.error_handler.strategy_for(unit))
            .filter(|strategy| strategy.fallback_action == FallbackAction::Fallback)
            .filter_map(|strategy| strategy.fallback_unit_id)
            .filter(|id| graph.contains(id) && graph.incoming(id).is_empty())
            .collect();

        let other_root = units
            .iter()
            .any(|unit| graph.incoming(&unit.id).is_empty() && !reserved.contains(&unit.id));
        if other_root {
            reserved
        } else {
            HashSet::new()
        }
    }

    /// Execute one unit outside of a run
    ///
    /// The result is stored in the step result map. A failure is appended to
    /// the error log and returned as `UnitFailed` so the caller can apply its
    /// own policy.
    pub async fn execute_unit(&self, unit_id: &str, kind: &str, input: Value, config: &Value) -> EngineResult<ExecutionResult> {
        let result = self
            .invoke(unit_id, kind, input, config, "step", &NoopNotifier)
            .await?;
        self.store_result(result.clone());

        if result.success {
            self.error_handler.reset_streak(unit_id);
            return Ok(result);
        }

        let message = result.error.clone().unwrap_or_default();
        let error = self.error_handler.record_error(unit_id, &message);
        self.log.error(format!("Unit '{}' failed: {}", unit_id, message), Some(unit_id));
        Err(EngineError::UnitFailed(Box::new(error)))
    }

    /// Run the whole graph with the sequential chain walker
    pub async fn execute_workflow(&self, units: &[WorkUnit], edges: &[Edge], options: &ExecutionOptions) -> EngineResult<WorkflowRun> {
        self.execute_workflow_with(units, edges, options, &NoopNotifier).await
    }

    /// Sequential run reporting progress to `notifier`
    pub async fn execute_workflow_with(
        &self,
        units: &[WorkUnit],
        edges: &[Edge],
        options: &ExecutionOptions,
        notifier: &dyn ExecutionNotifier,
    ) -> EngineResult<WorkflowRun> {
        let started = Instant::now();
        self.clear_results();

        let graph = self.prepare(units, edges)?;
        graph.ensure_acyclic()?;
        let mut starts = graph.start_units(units, options.start_unit_id.as_deref())?;
        if options.start_unit_id.is_none() {
            let reserved = self.reserved_fallbacks(units, &graph);
            starts.retain(|id| !reserved.contains(id));
        }

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let scope = RunScope::new(run_id, graph, notifier);

        tracing::info!("🚀 Starting sequential run {} from {:?}", scope.run_id, starts);
        self.log.info(format!("Starting sequential run of {} units", units.len()), None);
        scope.notify(ExecutionEvent::RunStarted {
            run_id: scope.run_id.clone(),
            total_units: units.len(),
        });

        let input = options.input.clone().unwrap_or_else(|| json!({}));
        for start in starts {
            if scope.is_halted() {
                break;
            }
            self.walk(start, input.clone(), &scope).await?;
        }

        Ok(self.finish_run(scope, started))
    }

    /// Depth-first walk from `unit_id`, feeding `input`
    fn walk<'a>(&'a self, unit_id: String, input: Value, scope: &'a RunScope<'a>) -> BoxFuture<'a, EngineResult<()>> {
        async move {
            if scope.is_halted() {
                return Ok(());
            }

            let unit = scope
                .graph
                .unit(&unit_id)
                .cloned()
                .ok_or_else(|| EngineError::UnknownUnit { unit_id: unit_id.clone() })?;

            if !unit.enabled {
                scope.skip(&unit.id, "unit is disabled");
                self.log.info(format!("Skipped disabled unit '{}'", unit.id), Some(&unit.id));
                return Ok(());
            }

            if self.config.scheduler.join_policy == JoinPolicy::ExecuteOnce && !scope.first_visit(&unit.id) {
                tracing::debug!("🔁 '{}' already executed in this run", unit.id);
                return Ok(());
            }

            let outcome = self.execute_with_policy(&unit, &input, scope).await?;
            scope.record(outcome.result.clone());

            match outcome.action {
                None => {
                    let branch = outcome.result.branch.as_deref();
                    let targets: Vec<String> = scope
                        .graph
                        .outgoing(&unit.id)
                        .into_iter()
                        .filter(|edge| edge.fires_for(branch))
                        .map(|edge| edge.target.clone())
                        .collect();

                    for target in targets {
                        if scope.is_halted() {
                            break;
                        }
                        self.walk(target, outcome.result.data.clone(), scope).await?;
                    }
                }
                Some(RecoveryAction::Stop) => {
                    tracing::warn!("⏹️ Run {} stopped by failure of '{}'", scope.run_id, unit.id);
                    scope.halt(&unit.id);
                }
                Some(RecoveryAction::Fallback { unit_id: fallback }) => {
                    if fallback == unit.id || !scope.graph.contains(&fallback) {
                        self.log.error(
                            format!("Fallback unit '{}' for '{}' is not usable", fallback, unit.id),
                            Some(&unit.id),
                        );
                        scope.halt(&unit.id);
                    } else {
                        self.log.info(format!("Falling back from '{}' to '{}'", unit.id, fallback), Some(&unit.id));
                        self.walk(fallback, input, scope).await?;
                    }
                }
                Some(RecoveryAction::Skip) | Some(RecoveryAction::Retry { .. }) => {}
            }

            Ok(())
        }
        .boxed()
    }

    /// Execute a unit, retrying per its strategy until success or a terminal decision
    pub(crate) async fn execute_with_policy(&self, unit: &WorkUnit, input: &Value, scope: &RunScope<'_>) -> EngineResult<PolicyOutcome> {
        let strategy = self.error_handler.strategy_for(unit);

        loop {
            let result = self
                .invoke(&unit.id, &unit.kind, input.clone(), &unit.config, &scope.run_id, scope.notifier)
                .await?;

            if result.success {
                self.error_handler.reset_streak(&unit.id);
                return Ok(PolicyOutcome { result, action: None });
            }

            let message = result.error.clone().unwrap_or_default();
            match self.error_handler.handle_error(&unit.id, &message, &strategy).await {
                RecoveryAction::Retry { delay } => {
                    self.log.warning(
                        format!("Unit '{}' failed, retried after {:?}: {}", unit.id, delay, message),
                        Some(&unit.id),
                    );
                }
                action => {
                    self.log.error(
                        format!("Unit '{}' failed ({:?}): {}", unit.id, action, message),
                        Some(&unit.id),
                    );
                    return Ok(PolicyOutcome {
                        result,
                        action: Some(action),
                    });
                }
            }
        }
    }

    /// Invoke the executor for one unit, consulting the result cache
    ///
    /// Executor failures come back as a failed `ExecutionResult`; only a
    /// missing executor is an `Err`.
    async fn invoke(
        &self,
        unit_id: &str,
        kind: &str,
        input: Value,
        config: &Value,
        run_id: &str,
        notifier: &dyn ExecutionNotifier,
    ) -> EngineResult<ExecutionResult> {
        let executor = self.registry.get(kind)?;

        notifier.notify(ExecutionEvent::UnitStarted {
            run_id: run_id.to_string(),
            unit_id: unit_id.to_string(),
        });

        // Variables are part of the effective input of a unit
        let cache_key = (self.config.cache.enabled && executor.cacheable()).then(|| {
            let effective = json!({
                "input": &input,
                "variables": self.variables.bindings(Some(unit_id)),
            });
            ResultCache::generate_key(unit_id, &effective, config)
        });

        if let Some(output) = cache_key
            .as_deref()
            .and_then(|key| self.cache.get(key))
            .and_then(|value| serde_json::from_value::<UnitOutput>(value).ok())
        {
            tracing::debug!("💾 Cache hit for unit '{}'", unit_id);
            let result = ExecutionResult::from_cache(unit_id, output);
            self.log.success(format!("Unit '{}' served from cache", unit_id), Some(unit_id));
            notifier.notify(ExecutionEvent::UnitCompleted {
                run_id: run_id.to_string(),
                unit_id: unit_id.to_string(),
                result: result.clone(),
            });
            return Ok(result);
        }

        let ctx = ExecutionContext::new(unit_id, input, config.clone(), self.variables.clone());
        tracing::info!("📍 Executing unit '{}' (kind: {})", unit_id, kind);
        tracing::debug!("📥 Input data: {}", ctx.data);

        let start_time = Instant::now();
        let outcome = executor.execute(&ctx).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                tracing::info!("✅ Unit '{}' completed in {}ms", unit_id, elapsed_ms);
                if let Some(key) = cache_key {
                    match serde_json::to_value(&output) {
                        Ok(value) => {
                            self.cache.set(&key, value, unit_id, &ctx.execution_id, None);
                        }
                        Err(e) => tracing::warn!("⚠️ Could not cache output of '{}': {}", unit_id, e),
                    }
                }

                let result = ExecutionResult::success(unit_id, output, elapsed_ms);
                self.log.success(format!("Unit '{}' completed in {}ms", unit_id, elapsed_ms), Some(unit_id));
                notifier.notify(ExecutionEvent::UnitCompleted {
                    run_id: run_id.to_string(),
                    unit_id: unit_id.to_string(),
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!("❌ Unit '{}' failed in {}ms: {}", unit_id, elapsed_ms, message);
                notifier.notify(ExecutionEvent::UnitFailed {
                    run_id: run_id.to_string(),
                    unit_id: unit_id.to_string(),
                    error: message.clone(),
                });
                Ok(ExecutionResult::failure(unit_id, message, elapsed_ms))
            }
        }
    }

    /// Publish a finished run: result map, log line and final event
    pub(crate) fn finish_run(&self, scope: RunScope<'_>, started: Instant) -> WorkflowRun {
        let notifier = scope.notifier;
        let run = scope.into_run();

        {
            let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
            results.clear();
            results.extend(run.results.iter().map(|(id, result)| (id.clone(), result.clone())));
        }

        match &run.halted_by {
            Some(unit_id) => {
                tracing::warn!("⏹️ Run {} halted by '{}' after {:?}", run.run_id, unit_id, started.elapsed());
                self.log.warning(format!("Run stopped after failure of '{}'", unit_id), Some(unit_id));
            }
            None => {
                tracing::info!("🎉 Run {} finished in {:?}", run.run_id, started.elapsed());
                self.log.success(format!("Run finished: {} units executed", run.results.len()), None);
            }
        }

        notifier.notify(ExecutionEvent::RunFinished {
            run_id: run.run_id.clone(),
            halted: run.halted_by.is_some(),
        });
        run
    }

    fn store_result(&self, result: ExecutionResult) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.unit_id.clone(), result);
    }

    /// Current result map (latest run plus later step executions)
    pub fn get_results(&self) -> HashMap<String, ExecutionResult> {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get_execution_log(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn clear_results(&self) {
        self.results.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }
}
