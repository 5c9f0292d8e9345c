/// Operator-facing execution log
///
/// A bounded, ordered list of human-readable entries describing what the
/// engine did. This is separate from `tracing` output: it is returned to
/// callers through `get_execution_log` and shown next to the graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn icon(&self) -> &'static str {
        match self {
            LogLevel::Info => "ℹ️",
            LogLevel::Success => "✅",
            LogLevel::Warning => "⚠️",
            LogLevel::Error => "❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

/// Bounded execution log; the oldest entries are dropped first
#[derive(Debug)]
pub struct ExecutionLog {
    entries: Mutex<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl ExecutionLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Append an entry, prefixing the message with the level icon
    pub fn push(&self, level: LogLevel, message: impl AsRef<str>, unit_id: Option<&str>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: format!("{} {}", level.icon(), message.as_ref()),
            unit_id: unit_id.map(str::to_string),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
    }

    pub fn info(&self, message: impl AsRef<str>, unit_id: Option<&str>) {
        self.push(LogLevel::Info, message, unit_id);
    }

    pub fn success(&self, message: impl AsRef<str>, unit_id: Option<&str>) {
        self.push(LogLevel::Success, message, unit_id);
    }

    pub fn warning(&self, message: impl AsRef<str>, unit_id: Option<&str>) {
        self.push(LogLevel::Warning, message, unit_id);
    }

    pub fn error(&self, message: impl AsRef<str>, unit_id: Option<&str>) {
        self.push(LogLevel::Error, message, unit_id);
    }

    /// Entries in insertion order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_dropped() {
        let log = ExecutionLog::new(2);
        log.info("one", None);
        log.warning("two", Some("n1"));
        log.error("three", Some("n2"));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "⚠️ two");
        assert_eq!(entries[1].level, LogLevel::Error);
        assert_eq!(entries[1].unit_id.as_deref(), Some("n2"));
    }
}
