/// Unit executor contract and execution results
///
/// Every unit kind is handled by a `UnitExecutor`. The engine builds an
/// `ExecutionContext`, invokes the executor and wraps what it returns into an
/// `ExecutionResult` carrying timing metadata. Executor bodies report failure
/// through `anyhow::Error`; the message is later classified by the error
/// handler.

use crate::workflow::types::ExecutionContext;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// What an executor produces for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutput {
    /// Payload handed to downstream units
    pub data: Value,
    /// Branch label selecting which outgoing edges fire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl UnitOutput {
    pub fn new(data: Value) -> Self {
        Self { data, branch: None }
    }

    /// Output that fires only the edges labelled `branch` (plus unlabelled ones)
    pub fn with_branch(data: Value, branch: impl Into<String>) -> Self {
        Self {
            data,
            branch: Some(branch.into()),
        }
    }
}

impl From<Value> for UnitOutput {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}

/// Result of executing a single unit
///
/// Stored keyed by unit id in the run's result map and overwritten when the
/// unit executes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Output payload; `null` on failure
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub execution_time_ms: u64,
    pub unit_id: String,
    pub timestamp: DateTime<Utc>,
    /// Served from the result cache
    #[serde(default)]
    pub cached: bool,
}

impl ExecutionResult {
    pub fn success(unit_id: &str, output: UnitOutput, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            data: output.data,
            error: None,
            branch: output.branch,
            execution_time_ms,
            unit_id: unit_id.to_string(),
            timestamp: Utc::now(),
            cached: false,
        }
    }

    /// Result replayed from the cache; no time was spent executing
    pub fn from_cache(unit_id: &str, output: UnitOutput) -> Self {
        Self {
            cached: true,
            ..Self::success(unit_id, output, 0)
        }
    }

    pub fn failure(unit_id: &str, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            branch: None,
            execution_time_ms,
            unit_id: unit_id.to_string(),
            timestamp: Utc::now(),
            cached: false,
        }
    }
}

/// The single capability every unit kind exposes
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput>;

    /// Whether results may be served from the result cache
    ///
    /// Executors with side effects must return false.
    fn cacheable(&self) -> bool {
        true
    }
}

/// Adapts an async closure into a `UnitExecutor`
///
/// ```ignore
/// let upper = FnExecutor::new(|ctx: ExecutionContext| async move {
///     let text = ctx.data.as_str().unwrap_or_default().to_uppercase();
///     Ok(UnitOutput::new(text.into()))
/// });
/// ```
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> UnitExecutor for FnExecutor<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<UnitOutput>> + Send,
{
    async fn execute(&self, ctx: &ExecutionContext) -> Result<UnitOutput> {
        (self.f)(ctx.clone()).await
    }
}
