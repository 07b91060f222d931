//! Configuration types for the Warden audit store.
//!
//! These types mirror the domain policies without depending on them; the
//! CLI converts them at startup. Every struct implements [`Default`] so a
//! bare `[section]` header produces a working configuration.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where records are stored.
    pub storage: StorageSection,
    /// How writes are committed.
    pub writes: WritesSection,
    /// Which fields are masked before storage.
    pub redaction: RedactionSection,
    /// Aggregate statistics retry behaviour.
    pub stats: StatsSection,
    /// Pruning limits and schedule.
    pub retention: RetentionSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

/// Storage location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Store directory. Empty selects `~/.warden/audit`.
    pub path: String,
}

/// Write path settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritesSection {
    /// `"batched"` or `"sync"`.
    pub mode: String,
    /// Debounce window for batched writes, in milliseconds.
    pub debounce_ms: u64,
    /// Bound of the batch queue.
    pub queue_capacity: usize,
}

impl Default for WritesSection {
    fn default() -> Self {
        Self {
            mode: "batched".to_owned(),
            debounce_ms: 100,
            queue_capacity: 1024,
        }
    }
}

impl WritesSection {
    /// Whether writes go through the debounced batch.
    #[must_use]
    pub fn is_batched(&self) -> bool {
        self.mode == "batched"
    }
}

/// Redaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSection {
    /// Case-insensitive field names to mask.
    pub fields: Vec<String>,
    /// Replacement value.
    pub marker: String,
}

impl Default for RedactionSection {
    fn default() -> Self {
        Self {
            fields: [
                "password",
                "token",
                "secret",
                "api_key",
                "apikey",
                "authorization",
                "cookie",
                "private_key",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            marker: "[REDACTED]".to_owned(),
        }
    }
}

/// Stats update retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    /// Total attempts per update, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Cap on the backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 5,
            max_backoff_ms: 50,
        }
    }
}

/// Retention settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Prune records older than this many days.
    pub max_age_days: Option<u32>,
    /// Keep at most this many records.
    pub max_entries: Option<usize>,
    /// Never prune below this many records.
    pub min_entries: usize,
    /// Seconds between periodic passes.
    pub interval_secs: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_age_days: None,
            max_entries: None,
            min_entries: 0,
            interval_secs: 3600,
        }
    }
}

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["warden_audit=debug"]`).
    pub directives: Vec<String>,
    /// `"stderr"`, `"stdout"`, or `"file"`.
    pub target: String,
    /// Log directory for the file target. Empty selects `~/.warden/logs`.
    pub file_dir: String,
    /// File name prefix for the file target.
    pub file_prefix: String,
    /// File rotation: `"daily"`, `"hourly"`, or `"never"`.
    pub rotation: String,
}

impl LoggingSection {
    /// Whether log lines go to rolling files.
    #[must_use]
    pub fn is_file_target(&self) -> bool {
        self.target == "file"
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
            target: "stderr".to_owned(),
            file_dir: String::new(),
            file_prefix: "warden".to_owned(),
            rotation: "daily".to_owned(),
        }
    }
}
