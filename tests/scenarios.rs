/// End-to-end workflow scenarios across both execution modes

use flowmesh::runtime::cache::ResultCache;
use flowmesh::runtime::error_handler::ErrorKind;
use flowmesh::runtime::log::LogLevel;
use flowmesh::runtime::{register_builtins, ExecutionManager, FnExecutor, UnitOutput};
use flowmesh::{
    Edge, EngineConfig, ExecutionContext, ExecutionEngine, ExecutionOptions, ParallelScheduler, VariableScope,
    VariableStore, VariableType, WorkUnit,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn engine() -> ExecutionEngine {
    let mut config = EngineConfig::default();
    config.cache.enabled = false;
    let engine = ExecutionEngine::new(config);
    register_builtins(&engine).unwrap();
    engine
}

/// Registers `kind` as an executor that records every input it receives
fn recording(engine: &ExecutionEngine, kind: &str) -> Arc<Mutex<Vec<Value>>> {
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let seen = inputs.clone();
    engine
        .register_executor(
            kind,
            Arc::new(FnExecutor::new(move |ctx: ExecutionContext| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.data.clone());
                    Ok(UnitOutput::new(ctx.data))
                }
            })),
        )
        .unwrap();
    inputs
}

fn data_by_unit(results: &BTreeMap<String, flowmesh::ExecutionResult>) -> BTreeMap<String, Value> {
    results.iter().map(|(id, result)| (id.clone(), result.data.clone())).collect()
}

#[tokio::test(start_paused = true)]
async fn failing_unit_retries_then_stops_the_run() {
    let engine = engine();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    engine
        .register_executor(
            "http",
            Arc::new(FnExecutor::new(move |_ctx: ExecutionContext| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(anyhow::anyhow!("network timeout"))
                }
            })),
        )
        .unwrap();
    let condition_inputs = recording(&engine, "gate");

    let units = vec![
        WorkUnit::new("trigger", "trigger"),
        WorkUnit::new("http", "http").with_config(json!({
            "errorHandling": {"maxRetries": 3, "retryDelay": 100, "fallbackAction": "stop"}
        })),
        WorkUnit::new("condition", "gate"),
    ];
    let edges = vec![Edge::new("trigger", "http"), Edge::new("http", "condition")];

    let started = tokio::time::Instant::now();
    let run = engine
        .execute_workflow(&units, &edges, &ExecutionOptions::sequential())
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_millis(700));
    assert_eq!(run.halted_by.as_deref(), Some("http"));
    assert!(!run.results["http"].success);
    assert!(!run.results.contains_key("condition"));
    assert!(condition_inputs.lock().unwrap().is_empty());

    let errors = engine.error_handler().get_errors(Some("http"));
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.kind == ErrorKind::Timeout && e.recoverable));

    let levels: Vec<LogLevel> = engine
        .get_execution_log()
        .into_iter()
        .filter(|entry| entry.unit_id.as_deref() == Some("http") && entry.message.contains("failed"))
        .map(|entry| entry.level)
        .collect();
    assert_eq!(
        levels,
        vec![LogLevel::Warning, LogLevel::Warning, LogLevel::Warning, LogLevel::Error]
    );
}

#[tokio::test]
async fn fan_out_branches_each_run_once_with_trigger_output() {
    let engine = engine();
    let left = recording(&engine, "left");
    let right = recording(&engine, "right");

    let units = vec![
        WorkUnit::new("start", "trigger"),
        WorkUnit::new("l", "left"),
        WorkUnit::new("r", "right"),
    ];
    let edges = vec![Edge::new("start", "l"), Edge::new("start", "r")];

    let run = engine
        .execute_workflow(&units, &edges, &ExecutionOptions::sequential().with_input(json!({"seed": 1})))
        .await
        .unwrap();

    assert!(run.succeeded());
    assert_eq!(*left.lock().unwrap(), vec![json!({"seed": 1})]);
    assert_eq!(*right.lock().unwrap(), vec![json!({"seed": 1})]);
}

#[tokio::test]
async fn cached_entry_expires_after_its_ttl() {
    let cache = ResultCache::new(1024 * 1024, 100, 60_000);
    assert!(cache.set("k", json!({"a": 1}), "n1", "e1", Some(1000)));
    assert_eq!(cache.get("k"), Some(json!({"a": 1})));

    tokio::time::sleep(Duration::from_millis(1001)).await;

    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn global_variable_resolves_in_template() {
    let store = VariableStore::new();
    store
        .set_variable("name", json!("World"), VariableType::String, VariableScope::Global, None)
        .unwrap();
    assert_eq!(store.resolve_variables("Hello ${name}", None), "Hello World");
}

#[tokio::test]
async fn chain_results_match_between_modes() {
    let engine = engine();
    engine
        .register_executor(
            "inc",
            Arc::new(FnExecutor::new(|ctx: ExecutionContext| async move {
                let n = ctx.data.get("n").and_then(Value::as_i64).unwrap_or(0);
                Ok(UnitOutput::new(json!({"n": n + 1, "by": ctx.unit_id})))
            })),
        )
        .unwrap();

    let units: Vec<WorkUnit> = (0..10).map(|i| WorkUnit::new(format!("u{i}"), "inc")).collect();
    let edges: Vec<Edge> = (0..9).map(|i| Edge::new(format!("u{i}"), format!("u{}", i + 1))).collect();
    let input = json!({"n": 0});

    let manager = ExecutionManager::new(Arc::new(engine));
    let sequential = manager
        .execute_workflow(&units, &edges, &ExecutionOptions::sequential().with_input(input.clone()))
        .await
        .unwrap();
    let parallel = manager
        .execute_workflow(&units, &edges, &ExecutionOptions::parallel(1).with_input(input))
        .await
        .unwrap();

    assert_eq!(sequential.results.len(), 10);
    assert_eq!(sequential.results["u9"].data, json!({"n": 10, "by": "u9"}));
    assert_eq!(data_by_unit(&sequential.results), data_by_unit(&parallel.results));
    assert_eq!(manager.get_execution_stats(3).successful_runs, 2);
}

#[test]
fn every_edge_crosses_to_a_later_batch() {
    let units: Vec<WorkUnit> = ["a", "b", "c", "d", "e", "f", "g"]
        .iter()
        .map(|id| WorkUnit::new(*id, "trigger"))
        .collect();
    let edges = vec![
        Edge::new("a", "c"),
        Edge::new("b", "c"),
        Edge::new("c", "d"),
        Edge::new("a", "e"),
        Edge::new("e", "f"),
        Edge::new("d", "f"),
        Edge::new("b", "g"),
    ];

    let scheduler = ParallelScheduler::new(Arc::new(engine()));
    let plan = scheduler.plan(&units, &edges).unwrap();

    let position: HashMap<usize, usize> = plan.order.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
    let batch_of: HashMap<&str, usize> = plan
        .batches
        .iter()
        .flat_map(|batch| batch.units.iter().map(move |unit| (unit.as_str(), batch.batch_id)))
        .collect();

    assert_eq!(batch_of.len(), units.len());
    for edge in &edges {
        let source = position[&batch_of[edge.source.as_str()]];
        let target = position[&batch_of[edge.target.as_str()]];
        assert!(source < target, "{} -> {} scheduled out of order", edge.source, edge.target);
    }
}

#[test]
fn cache_stays_within_bounds() {
    let cache = ResultCache::new(200, 5, 60_000);
    for i in 0..50 {
        let value = json!({"i": i, "pad": "x".repeat(i % 40)});
        cache.set(&format!("k{i}"), value, "n", "e", None);
        if i % 3 == 0 {
            cache.get(&format!("k{}", i / 2));
        }
        let stats = cache.stats();
        assert!(stats.total_size_bytes <= 200);
        assert!(stats.entries <= 5);
    }
}

#[tokio::test]
async fn parallel_fan_out_with_condition_branches() {
    let engine = engine();
    let high = recording(&engine, "high");
    let low = recording(&engine, "low");

    let units = vec![
        WorkUnit::new("start", "trigger"),
        WorkUnit::new("tag", "set").with_config(json!({"values": {"source": "api"}})),
        WorkUnit::new("check", "condition").with_config(json!({"expression": "data.score >= 50"})),
        WorkUnit::new("hi", "high"),
        WorkUnit::new("lo", "low"),
    ];
    let edges = vec![
        Edge::new("start", "tag"),
        Edge::new("start", "check"),
        Edge::on_branch("check", "hi", "true"),
        Edge::on_branch("check", "lo", "false"),
    ];

    let scheduler = ParallelScheduler::new(Arc::new(engine));
    let run = scheduler
        .execute_workflow(&units, &edges, &ExecutionOptions::parallel(4).with_input(json!({"score": 72})))
        .await
        .unwrap();

    assert_eq!(run.results["tag"].data, json!({"score": 72, "source": "api"}));
    assert_eq!(run.results["check"].branch.as_deref(), Some("true"));
    assert_eq!(*high.lock().unwrap(), vec![json!({"score": 72})]);
    assert!(low.lock().unwrap().is_empty());
    assert!(!run.results.contains_key("lo"));
}

#[tokio::test]
async fn parallel_fallback_receives_the_failed_input() {
    let engine = engine();
    engine
        .register_executor(
            "charge",
            Arc::new(FnExecutor::new(|_ctx: ExecutionContext| async move {
                Err(anyhow::anyhow!("invalid card"))
            })),
        )
        .unwrap();
    let backup = recording(&engine, "invoice");
    let after = recording(&engine, "notify");

    let units = vec![
        WorkUnit::new("start", "trigger"),
        WorkUnit::new("charge", "charge").with_config(json!({
            "errorHandling": {"maxRetries": 0, "fallbackAction": "fallback", "fallbackNode": "invoice"}
        })),
        WorkUnit::new("invoice", "invoice"),
        WorkUnit::new("notify", "notify"),
    ];
    let edges = vec![Edge::new("start", "charge"), Edge::new("charge", "notify")];

    let scheduler = ParallelScheduler::new(Arc::new(engine));
    let run = scheduler
        .execute_workflow(&units, &edges, &ExecutionOptions::parallel(4).with_input(json!({"order": 7})))
        .await
        .unwrap();

    assert!(!run.results["charge"].success);
    assert!(run.results["invoice"].success);
    assert_eq!(*backup.lock().unwrap(), vec![json!({"order": 7})]);
    assert!(after.lock().unwrap().is_empty());
    assert!(run.halted_by.is_none());
}
