/// Parallel batch scheduler
///
/// Groups units into dependency batches: a batch holds every unit whose
/// dependencies all sit in earlier batches. Batches run one after another in
/// dependency order; the members of a batch run concurrently, capped by a
/// semaphore. Single-unit execution (cache, retries, fallback policy) is
/// delegated to the execution engine.

use crate::config::CyclePolicy;
use crate::error::{EngineError, EngineResult};
use crate::runtime::engine::{ExecutionEngine, ExecutionOptions, PolicyOutcome, RunScope, WorkflowRun};
use crate::runtime::error_handler::RecoveryAction;
use crate::runtime::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::runtime::executor::ExecutionResult;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::{Edge, WorkUnit};
use futures::future::join_all;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// A set of units that may execute concurrently
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub batch_id: usize,
    /// Member unit ids in authoring order
    pub units: Vec<String>,
    /// Batches holding at least one dependency of a member
    pub depends_on: BTreeSet<usize>,
    pub results: HashMap<String, ExecutionResult>,
    /// Failure messages of members that failed for good
    pub errors: HashMap<String, String>,
    pub completed: bool,
}

impl Batch {
    fn new(batch_id: usize, units: Vec<String>, depends_on: BTreeSet<usize>) -> Self {
        Self {
            batch_id,
            units,
            depends_on,
            results: HashMap::new(),
            errors: HashMap::new(),
            completed: false,
        }
    }
}

/// Batches of one run plus the order to execute them in
#[derive(Debug, Clone, Serialize)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Batch ids in execution order
    pub order: Vec<usize>,
    /// Units admitted to break a cycle
    pub forced: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// How a batch member entered its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Every dependency sits in an earlier batch
    Ready,
    /// Admitted to break a cycle
    Forced,
    /// Root that only runs as another unit's fallback
    Reserved,
}

/// Executes dependency batches concurrently on top of an `ExecutionEngine`
#[derive(Debug, Clone)]
pub struct ParallelScheduler {
    engine: Arc<ExecutionEngine>,
}

impl ParallelScheduler {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Compute the batch plan for a graph using the configured cycle policy
    pub fn plan(&self, units: &[WorkUnit], edges: &[Edge]) -> EngineResult<BatchPlan> {
        let graph = WorkflowGraph::build(units, edges)?;
        Self::build_plan(&graph, units, self.engine.config().scheduler.cycle_policy)
    }

    /// Group units into dependency batches
    ///
    /// When no remaining unit is ready the graph has a cycle: `Reject` fails
    /// with `CycleDetected`, `ForceAdmit` admits the remaining unit with the
    /// smallest id and records a warning.
    pub fn build_plan(graph: &WorkflowGraph, units: &[WorkUnit], policy: CyclePolicy) -> EngineResult<BatchPlan> {
        let dependencies: HashMap<&str, BTreeSet<String>> = units
            .iter()
            .map(|unit| (unit.id.as_str(), graph.dependencies(&unit.id)))
            .collect();

        let mut batch_of: HashMap<String, usize> = HashMap::new();
        let mut remaining: Vec<&str> = units.iter().map(|unit| unit.id.as_str()).collect();
        let mut batches = Vec::new();
        let mut forced_units = BTreeSet::new();
        let mut warnings = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|id| dependencies[*id].iter().all(|dep| batch_of.contains_key(dep)))
                .collect();

            if ready.is_empty() {
                match policy {
                    CyclePolicy::Reject => {
                        graph.ensure_acyclic()?;
                        let mut stuck: Vec<String> = remaining.iter().map(|id| id.to_string()).collect();
                        stuck.sort();
                        return Err(EngineError::CycleDetected { units: stuck });
                    }
                    CyclePolicy::ForceAdmit => {
                        let Some(forced) = remaining.iter().copied().min() else {
                            break;
                        };
                        tracing::warn!("⚠️ Cycle detected: force-admitting unit '{}'", forced);
                        warnings.push(format!("cycle detected: force-admitting unit '{}'", forced));
                        forced_units.insert(forced.to_string());
                        ready.push(forced);
                    }
                }
            }

            let batch_id = batches.len();
            let depends_on: BTreeSet<usize> = ready
                .iter()
                .flat_map(|id| dependencies[*id].iter())
                .filter_map(|dep| batch_of.get(dep).copied())
                .collect();

            for id in &ready {
                batch_of.insert(id.to_string(), batch_id);
            }
            remaining.retain(|id| !ready.contains(id));

            tracing::debug!("📦 Batch {}: {:?} (after {:?})", batch_id, ready, depends_on);
            batches.push(Batch::new(batch_id, ready.iter().map(|id| id.to_string()).collect(), depends_on));
        }

        let order = order_batches(&batches, &mut warnings);
        Ok(BatchPlan {
            batches,
            order,
            forced: forced_units,
            warnings,
        })
    }

    pub async fn execute_workflow(&self, units: &[WorkUnit], edges: &[Edge], options: &ExecutionOptions) -> EngineResult<WorkflowRun> {
        self.execute_workflow_with(units, edges, options, &NoopNotifier).await
    }

    /// Batch run reporting progress to `notifier`
    pub async fn execute_workflow_with(
        &self,
        units: &[WorkUnit],
        edges: &[Edge],
        options: &ExecutionOptions,
        notifier: &dyn ExecutionNotifier,
    ) -> EngineResult<WorkflowRun> {
        let started = Instant::now();
        let engine = &self.engine;
        let scheduler_config = &engine.config().scheduler;
        engine.clear_results();

        let full_graph = engine.prepare(units, edges)?;
        if scheduler_config.cycle_policy == CyclePolicy::Reject {
            full_graph.ensure_acyclic()?;
        }

        // Restrict to what the start unit reaches, keeping fallback targets usable
        let (units, edges) = match options.start_unit_id.as_deref() {
            Some(start) => {
                if !full_graph.contains(start) {
                    return Err(EngineError::UnknownUnit { unit_id: start.to_string() });
                }
                let mut keep = full_graph.reachable_from(start);
                keep.extend(engine.reserved_fallbacks(units, &full_graph));
                restrict(units, edges, &keep)
            }
            None => (units.to_vec(), edges.to_vec()),
        };

        let graph = WorkflowGraph::build(&units, &edges)?;
        let mut plan = Self::build_plan(&graph, &units, scheduler_config.cycle_policy)?;
        let mut reserved = engine.reserved_fallbacks(&units, &graph);
        if let Some(start) = options.start_unit_id.as_deref() {
            reserved.remove(start);
        }

        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let scope = RunScope::new(run_id, graph, notifier);
        for warning in &plan.warnings {
            engine.log().warning(warning, None);
            scope.warn(warning.clone());
        }

        let max_concurrency = options
            .max_concurrency
            .unwrap_or(scheduler_config.max_concurrency)
            .max(1);
        let semaphore = Semaphore::new(max_concurrency);
        let input = options.input.clone().unwrap_or_else(|| json!({}));

        tracing::info!(
            "🚀 Starting parallel run {}: {} units in {} batches (max concurrency {})",
            scope.run_id,
            units.len(),
            plan.batches.len(),
            max_concurrency
        );
        engine.log().info(
            format!("Starting parallel run of {} units in {} batches", units.len(), plan.batches.len()),
            None,
        );
        scope.notify(ExecutionEvent::RunStarted {
            run_id: scope.run_id.clone(),
            total_units: units.len(),
        });

        for index in plan.order.clone() {
            if scope.is_halted() {
                break;
            }

            let members = plan.batches[index].units.clone();
            tracing::info!("📦 Executing batch {} with {} units", index, members.len());

            let outcomes = join_all(
                members
                    .iter()
                    .map(|unit_id| {
                        let admission = if reserved.contains(unit_id) {
                            Admission::Reserved
                        } else if plan.forced.contains(unit_id) {
                            Admission::Forced
                        } else {
                            Admission::Ready
                        };
                        self.run_member(unit_id, admission, &input, &semaphore, &scope)
                    }),
            )
            .await;

            let batch = &mut plan.batches[index];
            for (unit_id, outcome) in members.into_iter().zip(outcomes) {
                let Some(PolicyOutcome { result, action }) = outcome? else {
                    continue;
                };

                if !result.success {
                    batch
                        .errors
                        .insert(unit_id.clone(), result.error.clone().unwrap_or_default());
                }
                if action == Some(RecoveryAction::Stop) {
                    tracing::warn!("⏹️ Run {} stops after batch {} ('{}' failed)", scope.run_id, index, unit_id);
                    scope.halt(&unit_id);
                }
                batch.results.insert(unit_id, result);
            }
            batch.completed = true;
            tracing::debug!("✅ Batch {} settled ({} failed)", index, batch.errors.len());
        }

        Ok(engine.finish_run(scope, started))
    }

    /// Execute one batch member; `None` when it was skipped
    async fn run_member(
        &self,
        unit_id: &str,
        admission: Admission,
        run_input: &Value,
        semaphore: &Semaphore,
        scope: &RunScope<'_>,
    ) -> EngineResult<Option<PolicyOutcome>> {
        let unit = scope
            .graph
            .unit(unit_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownUnit { unit_id: unit_id.to_string() })?;

        if !unit.enabled {
            scope.skip(unit_id, "unit is disabled");
            return Ok(None);
        }

        if admission == Admission::Reserved {
            tracing::debug!("🛟 '{}' held back for fallback", unit_id);
            return Ok(None);
        }

        let input = match member_input(unit_id, run_input, scope) {
            Some(input) => input,
            // Sources of a force-admitted unit have not run yet
            None if admission == Admission::Forced => run_input.clone(),
            None => {
                scope.skip(unit_id, "no active input");
                return Ok(None);
            }
        };

        // Released on every exit path when dropped
        let Ok(_permit) = semaphore.acquire().await else {
            scope.skip(unit_id, "scheduler semaphore closed");
            return Ok(None);
        };

        let outcome = self.engine.execute_with_policy(&unit, &input, scope).await?;
        scope.record(outcome.result.clone());

        if let Some(RecoveryAction::Fallback { unit_id: fallback }) = &outcome.action {
            self.run_fallback(&unit, fallback, &input, scope).await?;
        }

        Ok(Some(outcome))
    }

    /// Run a fallback unit once with the failed unit's input
    async fn run_fallback(&self, failed: &WorkUnit, fallback: &str, input: &Value, scope: &RunScope<'_>) -> EngineResult<()> {
        let usable = scope
            .graph
            .unit(fallback)
            .filter(|unit| unit.enabled && unit.id != failed.id)
            .cloned();

        let Some(fallback_unit) = usable else {
            self.engine.log().error(
                format!("Fallback unit '{}' for '{}' is not usable", fallback, failed.id),
                Some(&failed.id),
            );
            scope.halt(&failed.id);
            return Ok(());
        };

        self.engine
            .log()
            .info(format!("Falling back from '{}' to '{}'", failed.id, fallback), Some(&failed.id));
        let outcome = self.engine.execute_with_policy(&fallback_unit, input, scope).await?;
        scope.record(outcome.result);
        if outcome.action == Some(RecoveryAction::Stop) {
            scope.halt(&fallback_unit.id);
        }
        Ok(())
    }
}

/// Input for a batch member, or `None` when no incoming edge is active
///
/// No incoming edges: the run input. One dependency: its data. Several:
/// `{dependency_id: data}` over the active dependencies.
fn member_input(unit_id: &str, run_input: &Value, scope: &RunScope<'_>) -> Option<Value> {
    let incoming = scope.graph.incoming(unit_id);
    if incoming.is_empty() {
        return Some(run_input.clone());
    }

    let mut active: BTreeMap<String, Value> = BTreeMap::new();
    for edge in incoming {
        let Some(source) = scope.result(&edge.source) else {
            continue;
        };
        if source.success && edge.fires_for(source.branch.as_deref()) {
            active.insert(edge.source.clone(), source.data);
        }
    }

    if active.is_empty() {
        return None;
    }
    if scope.graph.dependencies(unit_id).len() == 1 {
        return active.into_values().next();
    }
    Some(Value::Object(active.into_iter().collect()))
}

/// Keep only the units in `keep` and the edges between them
fn restrict(units: &[WorkUnit], edges: &[Edge], keep: &HashSet<String>) -> (Vec<WorkUnit>, Vec<Edge>) {
    let units = units.iter().filter(|unit| keep.contains(&unit.id)).cloned().collect();
    let edges = edges
        .iter()
        .filter(|edge| keep.contains(&edge.source) && keep.contains(&edge.target))
        .cloned()
        .collect();
    (units, edges)
}

/// Topological order of batches by inter-batch dependency
fn order_batches(batches: &[Batch], warnings: &mut Vec<String>) -> Vec<usize> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<NodeIndex> = batches.iter().map(|batch| graph.add_node(batch.batch_id)).collect();
    for batch in batches {
        for &dep in &batch.depends_on {
            graph.add_edge(nodes[dep], nodes[batch.batch_id], ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|index| graph[index]).collect(),
        Err(_) => {
            tracing::warn!("⚠️ Batch graph is cyclic, executing batches in creation order");
            warnings.push("batch graph is cyclic; executing batches in creation order".to_string());
            (0..batches.len()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::runtime::executor::{FnExecutor, UnitOutput};
    use crate::workflow::types::ExecutionContext;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler(cycle_policy: CyclePolicy) -> ParallelScheduler {
        let mut config = EngineConfig::default();
        config.cache.enabled = false;
        config.scheduler.cycle_policy = cycle_policy;
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
                "branch",
                Arc::new(FnExecutor::new(|ctx: ExecutionContext| async move {
                    let label = ctx.config_str("label").unwrap_or("true").to_string();
                    Ok(UnitOutput::with_branch(ctx.data, label))
                })),
            )
            .unwrap();
        engine
            .register_executor(
                "fail",
                Arc::new(FnExecutor::new(|_ctx: ExecutionContext| async move {
                    Err(anyhow::anyhow!("invalid input"))
                })),
            )
            .unwrap();
        ParallelScheduler::new(Arc::new(engine))
    }

    fn units(ids: &[&str]) -> Vec<WorkUnit> {
        ids.iter().map(|id| WorkUnit::new(*id, "echo")).collect()
    }

    fn batch_members(plan: &BatchPlan) -> Vec<Vec<String>> {
        plan.order.iter().map(|&i| plan.batches[i].units.clone()).collect()
    }

    #[test]
    fn diamond_plans_three_batches() {
        let s = scheduler(CyclePolicy::Reject);
        let edges = vec![Edge::new("a", "b"), Edge::new("a", "c"), Edge::new("b", "d"), Edge::new("c", "d")];
        let plan = s.plan(&units(&["a", "b", "c", "d"]), &edges).unwrap();

        assert_eq!(batch_members(&plan), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        assert_eq!(plan.batches[2].depends_on, BTreeSet::from([1]));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn cycles_are_rejected_by_default() {
        let s = scheduler(CyclePolicy::Reject);
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "b")];
        let err = s.plan(&units(&["a", "b", "c"]), &edges).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { units } if units == vec!["b", "c"]));
    }

    #[test]
    fn force_admission_picks_the_smallest_id() {
        let s = scheduler(CyclePolicy::ForceAdmit);
        let edges = vec![Edge::new("a", "c"), Edge::new("c", "b"), Edge::new("b", "c")];
        let plan = s.plan(&units(&["a", "c", "b"]), &edges).unwrap();

        assert_eq!(batch_members(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("'b'"));
    }

    #[tokio::test]
    async fn force_admitted_unit_runs_with_the_run_input() {
        let s = scheduler(CyclePolicy::ForceAdmit);
        let edges = vec![Edge::new("a", "c"), Edge::new("c", "b"), Edge::new("b", "c")];
        let run = s
            .execute_workflow(&units(&["a", "c", "b"]), &edges, &ExecutionOptions::parallel(2).with_input(json!(3)))
            .await
            .unwrap();

        assert_eq!(run.results.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(run.results["b"].data, json!(3));
        assert_eq!(run.results["c"].data, json!({"a": 3, "b": 3}));
        assert_eq!(run.warnings.len(), 1);
    }

    #[tokio::test]
    async fn fallback_roots_wait_for_their_fallback() {
        let s = scheduler(CyclePolicy::Reject);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        s.engine()
            .register_executor(
                "spare",
                Arc::new(FnExecutor::new(move |ctx: ExecutionContext| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(UnitOutput::new(ctx.data))
                    }
                })),
            )
            .unwrap();

        let all = vec![
            WorkUnit::new("primary", "fail").with_config(json!({
                "errorHandling": {"maxRetries": 0, "fallbackAction": "fallback", "fallbackNode": "backup"}
            })),
            WorkUnit::new("backup", "spare"),
        ];
        let run = s
            .execute_workflow(&all, &[], &ExecutionOptions::parallel(2).with_input(json!("x")))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(run.results["backup"].data, json!("x"));
        assert!(run.halted_by.is_none());
    }

    #[tokio::test]
    async fn fan_in_receives_keyed_object() {
        let s = scheduler(CyclePolicy::Reject);
        let edges = vec![Edge::new("a", "c"), Edge::new("b", "c")];
        let run = s
            .execute_workflow(&units(&["a", "b", "c"]), &edges, &ExecutionOptions::parallel(2).with_input(json!(7)))
            .await
            .unwrap();

        assert_eq!(run.results["c"].data, json!({"a": 7, "b": 7}));
    }

    #[tokio::test]
    async fn inactive_branches_skip_their_targets() {
        let s = scheduler(CyclePolicy::Reject);
        let all = vec![
            WorkUnit::new("check", "branch").with_config(json!({"label": "false"})),
            WorkUnit::new("yes", "echo"),
            WorkUnit::new("no", "echo"),
            WorkUnit::new("after-yes", "echo"),
        ];
        let edges = vec![
            Edge::on_branch("check", "yes", "true"),
            Edge::on_branch("check", "no", "false"),
            Edge::new("yes", "after-yes"),
        ];

        let run = s.execute_workflow(&all, &edges, &ExecutionOptions::parallel(5)).await.unwrap();
        assert!(run.results.contains_key("no"));
        assert!(!run.results.contains_key("yes"));
        assert!(!run.results.contains_key("after-yes"));
    }

    #[tokio::test]
    async fn stop_halts_after_the_current_batch() {
        let s = scheduler(CyclePolicy::Reject);
        let all = vec![
            WorkUnit::new("bad", "fail"),
            WorkUnit::new("peer", "echo"),
            WorkUnit::new("next", "echo"),
        ];
        let edges = vec![Edge::new("peer", "next")];

        let run = s.execute_workflow(&all, &edges, &ExecutionOptions::parallel(5)).await.unwrap();
        assert_eq!(run.halted_by.as_deref(), Some("bad"));
        assert!(run.results["peer"].success);
        assert!(!run.results.contains_key("next"));
    }

    #[tokio::test]
    async fn start_unit_restricts_to_reachable_units() {
        let s = scheduler(CyclePolicy::Reject);
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "c")];
        let run = s
            .execute_workflow(&units(&["a", "b", "c"]), &edges, &ExecutionOptions::parallel(5).starting_at("b"))
            .await
            .unwrap();

        assert_eq!(run.results.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_the_cap() {
        let s = scheduler(CyclePolicy::Reject);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (flight, high) = (in_flight.clone(), peak.clone());

        s.engine()
            .register_executor(
                "slow",
                Arc::new(FnExecutor::new(move |_ctx: ExecutionContext| {
                    let (flight, high) = (flight.clone(), high.clone());
                    async move {
                        let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
                        high.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(UnitOutput::new(json!(null)))
                    }
                })),
            )
            .unwrap();

        let all: Vec<WorkUnit> = (0..6).map(|i| WorkUnit::new(format!("u{i}"), "slow")).collect();
        s.execute_workflow(&all, &[], &ExecutionOptions::parallel(2)).await.unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }
}
