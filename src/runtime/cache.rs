/// Result cache
///
/// Memoizes unit results keyed by a fingerprint of `(unit id, input, config)`.
/// Entries expire after their TTL (checked lazily on read) and the cache is
/// bounded both by entry count and by the summed JSON size of the values.
/// When a bound would be exceeded the entry with the fewest hits is evicted,
/// oldest first among ties.

use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// One cached value with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub unit_id: String,
    pub execution_id: String,
    /// Byte length of the JSON serialization of `value`
    pub size_bytes: usize,
    pub hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at).num_milliseconds() > self.ttl_ms as i64
    }
}

/// Counters reported by `stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 when nothing was looked up
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn remove_where(&mut self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// Key of the entry with the fewest hits, oldest first among ties
    fn eviction_candidate(&self) -> Option<String> {
        self.entries
            .values()
            .min_by(|a, b| {
                a.hit_count
                    .cmp(&b.hit_count)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.key.cmp(&b.key))
            })
            .map(|entry| entry.key.clone())
    }
}

/// Bounded TTL cache shared by every run of an engine
#[derive(Debug)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    max_size_bytes: usize,
    max_entries: usize,
    default_ttl_ms: u64,
}

impl ResultCache {
    pub fn new(max_size_bytes: usize, max_entries: usize, default_ttl_ms: u64) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size_bytes,
            max_entries: max_entries.max(1),
            default_ttl_ms,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size_bytes, config.max_entries, config.default_ttl_ms)
    }

    /// Deterministic fingerprint of a unit invocation
    ///
    /// SHA-256 hex of the JSON array `[unit_id, inputs, config]`.
    pub fn generate_key(unit_id: &str, inputs: &Value, config: &Value) -> String {
        let material = json!([unit_id, inputs, config]).to_string();
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    /// Store a value; returns false when the value alone exceeds the size bound
    ///
    /// An existing entry under the same key is replaced.
    pub fn set(&self, key: &str, value: Value, unit_id: &str, execution_id: &str, ttl_ms: Option<u64>) -> bool {
        let size_bytes = value.to_string().len();
        if size_bytes > self.max_size_bytes {
            tracing::warn!(
                "⚠️ Not caching result of '{}': {} bytes exceeds cache limit of {} bytes",
                unit_id,
                size_bytes,
                self.max_size_bytes
            );
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remove(key);

        while state.entries.len() >= self.max_entries || state.total_size + size_bytes > self.max_size_bytes {
            let Some(victim) = state.eviction_candidate() else {
                break;
            };
            state.remove(&victim);
            tracing::debug!("🧹 Evicted cache entry {}", victim);
        }

        state.total_size += size_bytes;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                created_at: Utc::now(),
                ttl_ms: ttl_ms.unwrap_or(self.default_ttl_ms),
                unit_id: unit_id.to_string(),
                execution_id: execution_id.to_string(),
                size_bytes,
                hit_count: 0,
            },
        );
        true
    }

    /// Fetch a live value; expired entries are dropped on the way
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(Utc::now()),
        };
        if expired {
            state.remove(key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    /// Drop every expired entry; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let removed = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove_where(|entry| entry.is_expired(now));
        if removed > 0 {
            tracing::debug!("🧹 Removed {} expired cache entries", removed);
        }
        removed
    }

    pub fn clear_by_unit(&self, unit_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove_where(|entry| entry.unit_id == unit_id)
    }

    pub fn clear_by_execution(&self, execution_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove_where(|entry| entry.execution_id == execution_id)
    }

    /// Remove every entry and reset the counters
    pub fn clear(&self) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = CacheState::default();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            total_size_bytes: state.total_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    /// Every entry, sorted by key
    pub fn export(&self) -> Vec<CacheEntry> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Replace the contents with previously exported entries
    pub fn import(&self, entries: Vec<CacheEntry>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.clear();
        state.total_size = 0;
        for entry in entries {
            state.total_size += entry.size_bytes;
            state.entries.insert(entry.key.clone(), entry);
        }
        tracing::info!("📥 Imported {} cache entries", state.entries.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_and_input_sensitive() {
        let a = ResultCache::generate_key("n1", &json!({"x": 1, "y": 2}), &json!({}));
        let b = ResultCache::generate_key("n1", &json!({"y": 2, "x": 1}), &json!({}));
        let c = ResultCache::generate_key("n1", &json!({"x": 2}), &json!({}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn set_then_get_counts_hits_and_misses() {
        let cache = ResultCache::new(1024, 10, 60_000);
        assert!(cache.set("k", json!({"v": 1}), "n1", "e1", None));
        assert_eq!(cache.get("k"), Some(json!({"v": 1})));
        assert_eq!(cache.get("other"), None);

        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn replacing_a_key_adjusts_the_size() {
        let cache = ResultCache::new(1024, 10, 60_000);
        cache.set("k", json!("aaaaaaaaaa"), "n1", "e1", None);
        cache.set("k", json!("a"), "n1", "e1", None);
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size_bytes, 3);
    }

    #[test]
    fn eviction_prefers_fewest_hits_then_oldest() {
        let cache = ResultCache::new(1024, 2, 60_000);
        cache.set("a", json!(1), "n1", "e1", None);
        cache.set("b", json!(2), "n2", "e1", None);
        cache.get("a");
        cache.set("c", json!(3), "n3", "e1", None);

        let keys: Vec<String> = cache.export().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn size_bound_holds() {
        let cache = ResultCache::new(20, 100, 60_000);
        for i in 0..10 {
            cache.set(&format!("k{i}"), json!("xxxxxx"), "n", "e", None);
            assert!(cache.stats().total_size_bytes <= 20);
        }
        assert!(!cache.set("big", json!("x".repeat(64)), "n", "e", None));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ResultCache::new(1024, 10, 60_000);
        cache.set("fresh", json!(1), "n1", "e1", None);
        let mut stale = cache.export().remove(0);
        stale.key = "stale".into();
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);

        let mut entries = cache.export();
        entries.push(stale);
        cache.import(entries);

        assert_eq!(cache.get("stale"), None);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.cleanup_expired(), 0);
    }

    #[test]
    fn clear_by_unit_and_execution() {
        let cache = ResultCache::new(1024, 10, 60_000);
        cache.set("a", json!(1), "n1", "e1", None);
        cache.set("b", json!(2), "n2", "e1", None);
        cache.set("c", json!(3), "n2", "e2", None);

        assert_eq!(cache.clear_by_unit("n2"), 2);
        assert_eq!(cache.clear_by_execution("e1"), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn export_import_round_trips() {
        let cache = ResultCache::new(1024, 10, 60_000);
        cache.set("b", json!([1, 2]), "n1", "e1", Some(5_000));
        cache.set("a", json!({"k": "v"}), "n2", "e1", None);

        let exported = serde_json::to_value(cache.export()).unwrap();
        let restored = ResultCache::new(1024, 10, 60_000);
        restored.import(serde_json::from_value(exported.clone()).unwrap());
        assert_eq!(serde_json::to_value(restored.export()).unwrap(), exported);
    }
}
