/// Hot-registration executor registry using ArcSwap
///
/// Maps unit kinds to executors. Every registration swaps the entire map
/// pointer, so runs already in flight keep reading the snapshot they loaded
/// while new executors become visible to the next lookup.

use crate::error::{EngineError, EngineResult};
use crate::runtime::executor::UnitExecutor;
use arc_swap::ArcSwap;
use std::{collections::HashMap, fmt, sync::Arc};

/// Lock-free executor registry
pub struct ExecutorRegistry {
    /// Atomic pointer to the kind → executor map
    executors: ArcSwap<HashMap<String, Arc<dyn UnitExecutor>>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register (or replace) the executor for a kind
    ///
    /// Kinds must be non-blank.
    pub fn register(&self, kind: &str, executor: Arc<dyn UnitExecutor>) -> EngineResult<()> {
        if kind.trim().is_empty() {
            return Err(EngineError::InvalidKind { kind: kind.to_string() });
        }

        // Clone-and-swap, retried if another registration won the race
        let previous = self.executors.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(kind.to_string(), executor.clone());
            next
        });
        let replaced = previous.contains_key(kind);

        if replaced {
            tracing::info!("🔁 Replaced executor for kind '{}'", kind);
        } else {
            tracing::debug!("➕ Registered executor for kind '{}'", kind);
        }
        Ok(())
    }

    /// Remove a kind; returns whether it was registered
    pub fn unregister(&self, kind: &str) -> bool {
        if !self.contains(kind) {
            return false;
        }

        let previous = self.executors.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(kind);
            next
        });
        let removed = previous.contains_key(kind);
        if removed {
            tracing::info!("🗑️ Removed executor for kind '{}'", kind);
        }
        removed
    }

    /// Look up an executor (lock-free read)
    pub fn get(&self, kind: &str) -> EngineResult<Arc<dyn UnitExecutor>> {
        self.executors
            .load()
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::ExecutorNotFound { kind: kind.to_string() })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.load().contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.load().keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::{FnExecutor, UnitOutput};
    use crate::workflow::types::ExecutionContext;
    use serde_json::json;

    fn noop() -> Arc<dyn UnitExecutor> {
        Arc::new(FnExecutor::new(|_ctx: ExecutionContext| async move {
            Ok(UnitOutput::new(json!(null)))
        }))
    }

    #[test]
    fn blank_kinds_are_rejected() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(registry.register("  ", noop()), Err(EngineError::InvalidKind { .. })));
    }

    #[test]
    fn register_lookup_and_remove() {
        let registry = ExecutorRegistry::new();
        registry.register("http", noop()).unwrap();
        registry.register("email", noop()).unwrap();

        assert_eq!(registry.kinds(), vec!["email", "http"]);
        assert!(registry.get("http").is_ok());
        assert!(registry.unregister("http"));
        assert!(matches!(registry.get("http"), Err(EngineError::ExecutorNotFound { kind }) if kind == "http"));
    }

    #[test]
    fn concurrent_registrations_are_all_kept() {
        let registry = ExecutorRegistry::new();
        std::thread::scope(|threads| {
            for worker in 0..8 {
                let registry = &registry;
                threads.spawn(move || {
                    for i in 0..50 {
                        registry.register(&format!("kind-{worker}-{i}"), noop()).unwrap();
                    }
                });
            }
        });

        assert_eq!(registry.kinds().len(), 400);
        assert!(registry.contains("kind-7-49"));
    }
}
