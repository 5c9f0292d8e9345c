/// Runtime execution layer
///
/// Everything needed to run a workflow graph:
/// - Executor registry and the unit executor contract
/// - Sequential chain walker and parallel batch scheduler
/// - Result cache, error policy and the operator-facing log
/// - Run tracking and history in the execution manager

// Built-in control executors (trigger, set, condition, variable, delay)
pub mod builtin;

// Bounded TTL result cache
pub mod cache;

// Sequential execution engine
pub mod engine;

// Error classification, retry/fallback policy and error log
pub mod error_handler;

// Progress events and notifiers
pub mod events;

// Executor trait and per-unit results
pub mod executor;

// Operator-facing execution log
pub mod log;

// Run state tracking, history and statistics
pub mod manager;

// Kind → executor registry
pub mod registry;

// Dependency-batch parallel scheduler
pub mod scheduler;

// Re-export main types
pub use builtin::register_builtins;
pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use engine::{ExecutionEngine, ExecutionMode, ExecutionOptions, WorkflowRun};
pub use error_handler::{ErrorHandler, ErrorKind, ErrorStrategy, FallbackAction, RecoveryAction, WorkflowError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{ExecutionResult, FnExecutor, UnitExecutor, UnitOutput};
pub use log::{ExecutionLog, LogEntry, LogLevel};
pub use manager::{ExecutionManager, ExecutionStats, RunState, UnitRunState, UnitStatePatch, UnitStatus};
pub use registry::ExecutorRegistry;
pub use scheduler::{Batch, BatchPlan, ParallelScheduler};
