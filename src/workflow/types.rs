/// Core workflow type definitions
///
/// Defines units (nodes), dependencies (edges) and the per-invocation execution
/// context. Units and edges are authored by the external editor and arrive as
/// JSON; the engine treats them as read-only.

use crate::variables::VariableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// A complete workflow document containing units and their connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-onboarding")
    pub id: String,
    /// Human-readable workflow name
    #[serde(default)]
    pub name: String,
    /// Units in this workflow
    pub units: Vec<WorkUnit>,
    /// Dependencies connecting units
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A single unit of work in the workflow graph
///
/// The `kind` selects the executor that runs the unit; `config` is passed to
/// that executor untouched. Disabled units are never executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unique unit identifier within the workflow (e.g., "n1", "http-fetch")
    pub id: String,
    /// Discriminates which executor handles this unit
    pub kind: String,
    /// Executor-specific configuration as a flexible JSON object
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Whether the unit takes part in execution
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

impl WorkUnit {
    /// Create an enabled unit with an empty config
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: empty_object(),
            enabled: true,
        }
    }

    /// Replace the unit config
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Mark the unit as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Dependency between two units
///
/// Data flows from `source` to `target`. A `branch` label restricts the edge
/// to fire only when the source unit produced the same branch label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source unit ID
    #[serde(alias = "from")]
    pub source: String,
    /// Target unit ID
    #[serde(alias = "to")]
    pub target: String,
    /// Optional branch label ("true", "false", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            branch: None,
        }
    }

    /// Edge that only fires for the given branch label
    pub fn on_branch(
        source: impl Into<String>,
        target: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            branch: Some(branch.into()),
        }
    }

    /// Whether this edge fires for the branch label produced by its source
    ///
    /// Unlabelled edges always fire; so do all edges of a source that produced
    /// no label.
    pub fn fires_for(&self, produced: Option<&str>) -> bool {
        match (&self.branch, produced) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        }
    }
}

/// Runtime execution context handed to a unit executor
///
/// Created fresh for every invocation and never mutated afterwards. The
/// variable store handle lets units read and write run-wide state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Input payload: the upstream result, or the run input at a start unit
    pub data: Value,
    /// The unit being executed
    pub unit_id: String,
    /// Freshly generated id of this invocation
    pub execution_id: String,
    /// When the invocation was created
    pub timestamp: DateTime<Utc>,
    /// The unit's configuration
    pub config: Value,
    /// Variable store shared across the run
    pub variables: Arc<VariableStore>,
}

impl ExecutionContext {
    /// Create a context for one invocation of `unit_id`
    pub fn new(unit_id: &str, data: Value, config: Value, variables: Arc<VariableStore>) -> Self {
        Self {
            data,
            unit_id: unit_id.to_string(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            config,
            variables,
        }
    }

    /// Read a string field from the unit config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn enabled_by_default() -> bool {
    true
}
