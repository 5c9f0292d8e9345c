/// Execution events and notifiers
///
/// The engine reports run and unit progress through an `ExecutionNotifier`.
/// The execution manager uses this to keep live per-unit state; callers can
/// subscribe their own notifiers to stream progress elsewhere.

use crate::runtime::executor::ExecutionResult;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a run executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run has started
    RunStarted { run_id: String, total_units: usize },

    /// A unit invocation has started
    UnitStarted { run_id: String, unit_id: String },

    /// A unit produced a result (served from cache or freshly executed)
    UnitCompleted {
        run_id: String,
        unit_id: String,
        result: ExecutionResult,
    },

    /// A unit invocation failed; a retry may follow
    UnitFailed {
        run_id: String,
        unit_id: String,
        error: String,
    },

    /// A unit was not executed (disabled, or every input path inactive)
    UnitSkipped {
        run_id: String,
        unit_id: String,
        reason: String,
    },

    /// A run has finished; `halted` is set when a stop decision ended it early
    RunFinished { run_id: String, halted: bool },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            ExecutionEvent::RunStarted { run_id, .. }
            | ExecutionEvent::UnitStarted { run_id, .. }
            | ExecutionEvent::UnitCompleted { run_id, .. }
            | ExecutionEvent::UnitFailed { run_id, .. }
            | ExecutionEvent::UnitSkipped { run_id, .. }
            | ExecutionEvent::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Receives execution events
///
/// Called synchronously from the executing task, so implementations must not
/// block.
pub trait ExecutionNotifier: Send + Sync {
    fn notify(&self, event: ExecutionEvent);
}

/// Discards all events
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
    fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }
}

impl ExecutionNotifier for ChannelNotifier {
    fn notify(&self, event: ExecutionEvent) {
        // Receiver may have been dropped
        let _ = self.sender.send(event);
    }
}
