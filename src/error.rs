/// Engine error types
///
/// Structural errors abort a run before (or instead of) executing units.
/// Unit failures travel as `UnitFailed` and are turned into policy decisions
/// by the error handler, so they never reach the caller of `execute_workflow`.

use crate::runtime::error_handler::WorkflowError;
use thiserror::Error;

/// Result alias used across the engine
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors raised by the execution engine, batch scheduler and manager
#[derive(Debug, Error)]
pub enum EngineError {
    /// No executor is registered for a unit kind
    #[error("no executor registered for unit kind '{kind}'")]
    ExecutorNotFound { kind: String },

    /// Executor registration with an unusable kind identifier
    #[error("invalid executor kind: '{kind}'")]
    InvalidKind { kind: String },

    /// The graph has no unit without incoming edges and no explicit start unit
    #[error("workflow has no start unit")]
    NoStartUnit,

    /// An edge or start reference names a unit that does not exist
    #[error("unknown unit: {unit_id}")]
    UnknownUnit { unit_id: String },

    /// Two units share the same id
    #[error("duplicate unit id: {unit_id}")]
    DuplicateUnit { unit_id: String },

    /// The dependency graph contains a cycle
    #[error("workflow contains a cycle involving units: {}", .units.join(", "))]
    CycleDetected { units: Vec<String> },

    /// A single unit failed; the caller applies retry/fallback policy
    #[error("unit '{}' failed: {}", .0.unit_id, .0.message)]
    UnitFailed(Box<WorkflowError>),
}

impl EngineError {
    /// Structural errors make a graph unexecutable regardless of retry policy
    pub fn is_structural(&self) -> bool {
        !matches!(self, EngineError::UnitFailed(_))
    }
}
