/// flowmesh: workflow execution engine
///
/// Runs directed graphs of work units either as a sequential dependency walk
/// or as concurrent dependency batches, with result caching, retry and
/// fallback policies, scoped variables and per-run state tracking.

// Engine configuration with environment defaults
pub mod config;

// Structural engine errors
pub mod error;

// Sandboxed expression interpreter for conditions and variables
pub mod expression;

// Runtime execution layer - engine, scheduler, cache, error policy and manager
pub mod runtime;

// Scoped variable store
pub mod variables;

// Workflow definition layer - units, edges and the graph view
pub mod workflow;

// Re-export commonly used types for external consumers
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use runtime::{
    ExecutionEngine, ExecutionManager, ExecutionMode, ExecutionOptions, ExecutionResult, ParallelScheduler, UnitExecutor,
    UnitOutput, WorkflowRun,
};
pub use variables::{VariableScope, VariableStore, VariableType};
pub use workflow::{Edge, ExecutionContext, WorkUnit, Workflow};
