/// Error classification and recovery policy
///
/// Turns unit failures into recovery decisions: classify the message, append a
/// `WorkflowError` to the log, then either back off and retry or apply the
/// unit's fallback action. The log is append-only and feeds the failure
/// statistics of the execution manager.

use crate::config::RetryConfig;
use crate::workflow::types::WorkUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

/// Failure class derived from the error message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Validation,
    Execution,
    Timeout,
    Network,
    Auth,
    Data,
}

/// One recorded unit failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowError {
    pub id: String,
    pub unit_id: String,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Consecutive failures of the unit before this one
    pub retry_count: u32,
    pub recoverable: bool,
}

/// What to do once retries are exhausted or the error is not recoverable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackAction {
    Retry,
    Skip,
    Stop,
    Fallback,
}

/// Per-unit recovery strategy
///
/// Read from a unit's `errorHandling` config object, e.g.
/// `{"maxRetries": 2, "retryDelay": 500, "fallbackAction": "skip"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorStrategy {
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `retry_delay_ms * 2^n`
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    pub fallback_action: FallbackAction,
    /// Unit walked instead of the failed one when the action is `fallback`
    #[serde(alias = "fallbackNode", alias = "fallbackUnit", skip_serializing_if = "Option::is_none")]
    pub fallback_unit_id: Option<String>,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            fallback_action: FallbackAction::Stop,
            fallback_unit_id: None,
        }
    }
}

impl From<&RetryConfig> for ErrorStrategy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            ..Self::default()
        }
    }
}

/// Decision returned by `handle_error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Run the unit again; the backoff has already elapsed
    Retry { delay: Duration },
    /// Halt the whole run
    Stop,
    /// Record the failure and do not descend into the unit's children
    Skip,
    /// Continue with the named unit, fed the failed unit's input
    Fallback { unit_id: String },
}

/// Backoff before retry number `retry_count` (0-based)
pub fn retry_delay(strategy: &ErrorStrategy, retry_count: u32) -> Duration {
    let factor = 1u64.checked_shl(retry_count.min(32)).unwrap_or(u64::MAX);
    Duration::from_millis(strategy.retry_delay_ms.saturating_mul(factor))
}

/// Error handler with append-only log and per-unit failure streaks
#[derive(Debug)]
pub struct ErrorHandler {
    default_strategy: ErrorStrategy,
    overrides: RwLock<HashMap<String, ErrorStrategy>>,
    log: Mutex<Vec<WorkflowError>>,
    /// Consecutive failures per unit in the current streak
    streaks: Mutex<HashMap<String, u32>>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(ErrorStrategy::default())
    }
}

impl ErrorHandler {
    pub fn new(default_strategy: ErrorStrategy) -> Self {
        Self {
            default_strategy,
            overrides: RwLock::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            streaks: Mutex::new(HashMap::new()),
        }
    }

    /// Classify an error message by case-insensitive keyword
    pub fn classify(message: &str) -> ErrorKind {
        let message = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

        if has(&["timeout"]) {
            ErrorKind::Timeout
        } else if has(&["network", "fetch"]) {
            ErrorKind::Network
        } else if has(&["unauthorized", "auth"]) {
            ErrorKind::Auth
        } else if has(&["validation", "invalid"]) {
            ErrorKind::Validation
        } else if has(&["data", "parse"]) {
            ErrorKind::Data
        } else {
            ErrorKind::Execution
        }
    }

    /// Validation and data errors will fail again on retry
    pub fn is_recoverable(kind: ErrorKind) -> bool {
        !matches!(kind, ErrorKind::Validation | ErrorKind::Data)
    }

    /// Install a strategy for one unit, taking precedence over its config
    pub fn set_strategy(&self, unit_id: &str, strategy: ErrorStrategy) {
        self.overrides
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(unit_id.to_string(), strategy);
    }

    /// Resolve the strategy for a unit: override, then `errorHandling` config, then default
    pub fn strategy_for(&self, unit: &WorkUnit) -> ErrorStrategy {
        if let Some(strategy) = self
            .overrides
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&unit.id)
        {
            return strategy.clone();
        }

        unit.config
            .get("errorHandling")
            .and_then(|value| match serde_json::from_value::<ErrorStrategy>(value.clone()) {
                Ok(strategy) => Some(strategy),
                Err(e) => {
                    tracing::warn!("⚠️ Ignoring malformed errorHandling on '{}': {}", unit.id, e);
                    None
                }
            })
            .unwrap_or_else(|| self.default_strategy.clone())
    }

    /// Append a failure to the log without taking a recovery decision
    pub fn record_error(&self, unit_id: &str, message: &str) -> WorkflowError {
        let retry_count = self.streak(unit_id);
        self.push(unit_id, message, retry_count)
    }

    /// Log a failure and decide how to recover from it
    ///
    /// When the decision is `Retry` the backoff delay has already been slept.
    pub async fn handle_error(&self, unit_id: &str, message: &str, strategy: &ErrorStrategy) -> RecoveryAction {
        let retry_count = self.streak(unit_id);
        let error = self.push(unit_id, message, retry_count);

        if error.recoverable && retry_count < strategy.max_retries {
            let delay = retry_delay(strategy, retry_count);
            self.streaks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(unit_id.to_string(), retry_count + 1);

            tracing::warn!(
                "🔄 Retrying '{}' in {:?} (attempt {}/{})",
                unit_id,
                delay,
                retry_count + 1,
                strategy.max_retries
            );
            tokio::time::sleep(delay).await;
            return RecoveryAction::Retry { delay };
        }

        self.reset_streak(unit_id);

        match (strategy.fallback_action, &strategy.fallback_unit_id) {
            (FallbackAction::Skip, _) => RecoveryAction::Skip,
            (FallbackAction::Fallback, Some(fallback)) => RecoveryAction::Fallback {
                unit_id: fallback.clone(),
            },
            (FallbackAction::Fallback, None) => {
                tracing::warn!("⚠️ '{}' requested a fallback but names no fallback unit", unit_id);
                RecoveryAction::Stop
            }
            (FallbackAction::Stop | FallbackAction::Retry, _) => RecoveryAction::Stop,
        }
    }

    /// End a unit's failure streak (called after a success)
    pub fn reset_streak(&self, unit_id: &str) {
        self.streaks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(unit_id);
    }

    /// Logged errors, optionally for one unit only
    pub fn get_errors(&self, unit_id: Option<&str>) -> Vec<WorkflowError> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.iter()
            .filter(|error| unit_id.map_or(true, |id| error.unit_id == id))
            .cloned()
            .collect()
    }

    /// Number of logged errors per unit
    pub fn error_counts(&self) -> BTreeMap<String, usize> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = BTreeMap::new();
        for error in log.iter() {
            *counts.entry(error.unit_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Drop logged errors (and streaks), optionally for one unit only
    pub fn clear_errors(&self, unit_id: Option<&str>) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let mut streaks = self.streaks.lock().unwrap_or_else(|e| e.into_inner());
        match unit_id {
            Some(id) => {
                log.retain(|error| error.unit_id != id);
                streaks.remove(id);
            }
            None => {
                log.clear();
                streaks.clear();
            }
        }
    }

    pub fn export_errors(&self) -> Vec<WorkflowError> {
        self.get_errors(None)
    }

    /// Replace the log with previously exported errors
    pub fn import_errors(&self, errors: Vec<WorkflowError>) {
        *self.log.lock().unwrap_or_else(|e| e.into_inner()) = errors;
    }

    fn streak(&self, unit_id: &str) -> u32 {
        self.streaks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(unit_id)
            .copied()
            .unwrap_or(0)
    }

    fn push(&self, unit_id: &str, message: &str, retry_count: u32) -> WorkflowError {
        let kind = Self::classify(message);
        let error = WorkflowError {
            id: uuid::Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
            retry_count,
            recoverable: Self::is_recoverable(kind),
        };

        tracing::debug!("📋 Recorded {:?} error for '{}': {}", kind, unit_id, message);
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(error.clone());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy(max_retries: u32, fallback_action: FallbackAction) -> ErrorStrategy {
        ErrorStrategy {
            max_retries,
            retry_delay_ms: 100,
            fallback_action,
            fallback_unit_id: None,
        }
    }

    #[test]
    fn classification_follows_keyword_order() {
        assert_eq!(ErrorHandler::classify("Request TIMEOUT after 5s"), ErrorKind::Timeout);
        assert_eq!(ErrorHandler::classify("failed to fetch"), ErrorKind::Network);
        assert_eq!(ErrorHandler::classify("401 Unauthorized"), ErrorKind::Auth);
        assert_eq!(ErrorHandler::classify("invalid email"), ErrorKind::Validation);
        assert_eq!(ErrorHandler::classify("could not parse body"), ErrorKind::Data);
        assert_eq!(ErrorHandler::classify("boom"), ErrorKind::Execution);
        // "timeout" wins over "network"
        assert_eq!(ErrorHandler::classify("network timeout"), ErrorKind::Timeout);
    }

    #[test]
    fn exponential_delay() {
        let s = strategy(3, FallbackAction::Stop);
        let delays: Vec<u128> = (0..4).map(|n| retry_delay(&s, n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_then_stop() {
        let handler = ErrorHandler::default();
        let s = strategy(3, FallbackAction::Stop);

        let mut delays = Vec::new();
        loop {
            match handler.handle_error("n1", "connection reset", &s).await {
                RecoveryAction::Retry { delay } => delays.push(delay.as_millis()),
                other => {
                    assert_eq!(other, RecoveryAction::Stop);
                    break;
                }
            }
        }

        assert_eq!(delays, vec![100, 200, 400]);
        let retry_counts: Vec<u32> = handler.get_errors(Some("n1")).iter().map(|e| e.retry_count).collect();
        assert_eq!(retry_counts, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_streak() {
        let handler = ErrorHandler::default();
        let s = strategy(1, FallbackAction::Skip);

        assert!(matches!(handler.handle_error("n1", "boom", &s).await, RecoveryAction::Retry { .. }));
        handler.reset_streak("n1");
        assert!(matches!(handler.handle_error("n1", "boom", &s).await, RecoveryAction::Retry { .. }));
        assert_eq!(handler.handle_error("n1", "boom", &s).await, RecoveryAction::Skip);
    }

    #[tokio::test]
    async fn unrecoverable_errors_skip_retries() {
        let handler = ErrorHandler::default();
        let mut s = strategy(3, FallbackAction::Fallback);
        s.fallback_unit_id = Some("backup".into());

        let action = handler.handle_error("n1", "validation failed: name", &s).await;
        assert_eq!(action, RecoveryAction::Fallback { unit_id: "backup".into() });
        assert!(!handler.get_errors(None)[0].recoverable);
    }

    #[tokio::test]
    async fn fallback_without_unit_stops() {
        let handler = ErrorHandler::default();
        let action = handler.handle_error("n1", "invalid", &strategy(0, FallbackAction::Fallback)).await;
        assert_eq!(action, RecoveryAction::Stop);
    }

    #[test]
    fn strategy_resolution_order() {
        let handler = ErrorHandler::default();
        let unit = WorkUnit::new("n1", "http").with_config(json!({
            "errorHandling": {"maxRetries": 1, "retryDelay": 50, "fallbackAction": "skip"}
        }));

        let from_config = handler.strategy_for(&unit);
        assert_eq!(from_config.max_retries, 1);
        assert_eq!(from_config.retry_delay_ms, 50);
        assert_eq!(from_config.fallback_action, FallbackAction::Skip);

        handler.set_strategy("n1", strategy(7, FallbackAction::Stop));
        assert_eq!(handler.strategy_for(&unit).max_retries, 7);

        assert_eq!(handler.strategy_for(&WorkUnit::new("n2", "http")), ErrorStrategy::default());
    }

    #[test]
    fn counts_and_clearing() {
        let handler = ErrorHandler::default();
        handler.record_error("a", "x");
        handler.record_error("b", "y");
        handler.record_error("a", "z");
        assert_eq!(handler.error_counts().get("a"), Some(&2));

        handler.clear_errors(Some("a"));
        assert_eq!(handler.get_errors(None).len(), 1);

        let exported = handler.export_errors();
        let restored = ErrorHandler::default();
        restored.import_errors(exported.clone());
        assert_eq!(restored.export_errors(), exported);
    }
}
