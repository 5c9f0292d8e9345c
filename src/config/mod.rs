/// Configuration management for the flowmesh engine
///
/// Handles concurrency limits, cache bounds, retry defaults and graph policies.
/// Every value can be overridden through `FLOWMESH_*` environment variables.

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Batch scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Result cache configuration
    pub cache: CacheConfig,
    /// Default error recovery strategy
    pub retry: RetryConfig,
    /// Execution manager and log retention
    pub retention: RetentionConfig,
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of units executing at once within a batch
    pub max_concurrency: usize,
    /// How the sequential walker treats units reached via several paths
    pub join_policy: JoinPolicy,
    /// What the batch planner does when no unit is ready
    pub cycle_policy: CyclePolicy,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the engine memoizes unit results
    pub enabled: bool,
    /// Upper bound on the summed size of cached values
    pub max_size_bytes: usize,
    /// Upper bound on the number of cached entries
    pub max_entries: usize,
    /// TTL applied to results the engine caches
    pub default_ttl_ms: u64,
}

/// Default retry strategy applied when a unit has no override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// History and log retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Completed runs kept by the execution manager
    pub max_history: usize,
    /// Entries kept by the execution log
    pub max_log_entries: usize,
}

/// Fan-in behaviour of the sequential chain walker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// A unit executes once for every incoming path that reaches it
    ExecutePerPath,
    /// A unit executes on first arrival; later arrivals are ignored
    ExecuteOnce,
}

/// Batch planning behaviour when the remaining units form a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Fail validation before any unit executes
    Reject,
    /// Admit one remaining unit and surface a warning
    ForceAdmit,
}

impl Default for EngineConfig {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_concurrency: env_or("FLOWMESH_MAX_CONCURRENCY", 5),
                join_policy: match std::env::var("FLOWMESH_JOIN_POLICY").as_deref() {
                    Ok("execute_once") => JoinPolicy::ExecuteOnce,
                    _ => JoinPolicy::ExecutePerPath,
                },
                cycle_policy: match std::env::var("FLOWMESH_CYCLE_POLICY").as_deref() {
                    Ok("force_admit") => CyclePolicy::ForceAdmit,
                    _ => CyclePolicy::Reject,
                },
            },
            cache: CacheConfig {
                enabled: env_or("FLOWMESH_CACHE_ENABLED", true),
                max_size_bytes: env_or("FLOWMESH_CACHE_MAX_BYTES", 50 * 1024 * 1024),
                max_entries: env_or("FLOWMESH_CACHE_MAX_ENTRIES", 1000),
                default_ttl_ms: env_or("FLOWMESH_CACHE_TTL_MS", 5 * 60 * 1000),
            },
            retry: RetryConfig {
                max_retries: env_or("FLOWMESH_MAX_RETRIES", 3),
                retry_delay_ms: env_or("FLOWMESH_RETRY_DELAY_MS", 1000),
            },
            retention: RetentionConfig {
                max_history: env_or("FLOWMESH_MAX_HISTORY", 100),
                max_log_entries: env_or("FLOWMESH_MAX_LOG_ENTRIES", 1000),
            },
        }
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
