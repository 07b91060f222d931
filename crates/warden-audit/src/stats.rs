//! Running aggregate statistics.
//!
//! The aggregate is one JSON document under [`STATS_KEY`], updated with a
//! version-checked read-modify-write. Updates are best-effort: they run on
//! background tasks, never fail the write path, and are dropped (and counted)
//! when contention outlasts the [`ContentionPolicy`]. The indexes stay
//! authoritative; [`StatsAggregator::rebuild`] recomputes the document from
//! them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use warden_storage::{KvStore, PrefixScanner, Transaction};

use crate::contention::ContentionPolicy;
use crate::error::{AuditError, AuditResult};
use crate::index::decode_record;
use crate::keys::{ENTRY_PREFIX, STATS_KEY};
use crate::record::AuditRecord;

/// Aggregate counters over every committed record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Number of records.
    pub total_entries: u64,
    /// Records per category.
    #[serde(default)]
    pub entries_by_category: BTreeMap<String, u64>,
    /// Records per action.
    #[serde(default)]
    pub entries_by_action: BTreeMap<String, u64>,
    /// Records whose action failed.
    #[serde(default)]
    pub recent_failures: u64,
    /// Earliest record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_timestamp: Option<DateTime<Utc>>,
    /// Latest record timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_timestamp: Option<DateTime<Utc>>,
}

impl AggregateStats {
    /// The contribution of a single record.
    #[must_use]
    pub fn from_record(record: &AuditRecord) -> Self {
        let mut stats = Self::default();
        stats.absorb(record);
        stats
    }

    /// Count one more record.
    pub fn absorb(&mut self, record: &AuditRecord) {
        self.total_entries = self.total_entries.saturating_add(1);
        bump(&mut self.entries_by_category, record.category.as_str(), 1);
        bump(&mut self.entries_by_action, record.action.as_str(), 1);
        if !record.success {
            self.recent_failures = self.recent_failures.saturating_add(1);
        }
        self.widen(Some(record.timestamp), Some(record.timestamp));
    }

    /// Add another aggregate into this one.
    pub fn merge(&mut self, other: &Self) {
        self.total_entries = self.total_entries.saturating_add(other.total_entries);
        for (k, v) in &other.entries_by_category {
            bump(&mut self.entries_by_category, k, *v);
        }
        for (k, v) in &other.entries_by_action {
            bump(&mut self.entries_by_action, k, *v);
        }
        self.recent_failures = self.recent_failures.saturating_add(other.recent_failures);
        self.widen(other.oldest_timestamp, other.newest_timestamp);
    }

    fn widen(&mut self, oldest: Option<DateTime<Utc>>, newest: Option<DateTime<Utc>>) {
        self.oldest_timestamp = match (self.oldest_timestamp, oldest) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.newest_timestamp = match (self.newest_timestamp, newest) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str, by: u64) {
    let count = map.entry(key.to_owned()).or_insert(0);
    *count = count.saturating_add(by);
}

/// What happened to one best-effort update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The delta was committed.
    Applied,
    /// Every attempt lost a version race; the delta was discarded.
    Dropped,
    /// The store failed; the delta was discarded.
    Failed,
}

/// Maintains the aggregate document under concurrent writers.
pub struct StatsAggregator {
    store: Arc<dyn KvStore>,
    policy: ContentionPolicy,
    tracker: TaskTracker,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("policy", &self.policy)
            .field("dropped", &self.dropped_updates())
            .field("failed", &self.failed_updates())
            .finish_non_exhaustive()
    }
}

impl StatsAggregator {
    /// Aggregator over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, policy: ContentionPolicy) -> Self {
        Self {
            store,
            policy,
            tracker: TaskTracker::new(),
            dropped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &ContentionPolicy {
        &self.policy
    }

    /// Account for a committed record in the background.
    ///
    /// Returns immediately; the update never reports failure to the caller.
    /// Must be called from within a Tokio runtime.
    pub fn record_committed(self: &Arc<Self>, record: &AuditRecord) {
        let delta = AggregateStats::from_record(record);
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            this.apply(&delta).await;
        });
    }

    /// Merge `delta` into the stored document, retrying on version conflicts.
    pub async fn apply(&self, delta: &AggregateStats) -> UpdateOutcome {
        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            match self.try_apply(delta).await {
                Ok(true) => return UpdateOutcome::Applied,
                Ok(false) => {
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff_for(attempt)).await;
                    }
                },
                Err(e) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Stats update failed, dropping it");
                    return UpdateOutcome::Failed;
                },
            }
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            attempts,
            entries = delta.total_entries,
            "Stats update dropped after exhausting retries"
        );
        UpdateOutcome::Dropped
    }

    async fn try_apply(&self, delta: &AggregateStats) -> AuditResult<bool> {
        let current = self.store.get_versioned(STATS_KEY).await?;
        let (mut stats, version) = match current {
            Some(v) => (decode_stats(&v.value)?, Some(v.version)),
            None => (AggregateStats::default(), None),
        };
        stats.merge(delta);

        let mut tx = Transaction::new();
        tx.check(STATS_KEY, version)
            .set(STATS_KEY, encode_stats(&stats)?);
        let ok = self.store.commit(tx).await?.ok;
        if !ok {
            debug!("Stats version conflict");
        }
        Ok(ok)
    }

    /// Wait for every in-flight background update to finish.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Current stored aggregate, or zeros if nothing was recorded yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the document does not decode.
    pub async fn snapshot(&self) -> AuditResult<AggregateStats> {
        match self.store.get(STATS_KEY).await? {
            Some(bytes) => decode_stats(&bytes),
            None => Ok(AggregateStats::default()),
        }
    }

    /// Recompute the aggregate from the primary table and replace the
    /// stored document.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Conflict`] if concurrent updates outlast the policy.
    /// - [`AuditError::Storage`] if the store fails.
    pub async fn rebuild(&self) -> AuditResult<AggregateStats> {
        self.settle().await;

        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            let current = self.store.get_versioned(STATS_KEY).await?;
            let rebuilt = self.recompute().await?;

            let mut tx = Transaction::new();
            tx.check(STATS_KEY, current.map(|v| v.version))
                .set(STATS_KEY, encode_stats(&rebuilt)?);
            if self.store.commit(tx).await?.ok {
                info!(total = rebuilt.total_entries, "Rebuilt audit stats");
                return Ok(rebuilt);
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff_for(attempt)).await;
            }
        }
        Err(AuditError::Conflict {
            key: STATS_KEY.to_owned(),
        })
    }

    async fn recompute(&self) -> AuditResult<AggregateStats> {
        let mut stats = AggregateStats::default();
        let mut scanner = PrefixScanner::new(self.store.as_ref(), ENTRY_PREFIX, false);
        while let Some(entry) = scanner.next().await? {
            stats.absorb(&decode_record(&entry.value)?);
        }
        Ok(stats)
    }

    /// Updates discarded after losing every version race.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Updates discarded because the store failed.
    #[must_use]
    pub fn failed_updates(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

fn decode_stats(bytes: &[u8]) -> AuditResult<AggregateStats> {
    serde_json::from_slice(bytes).map_err(|e| AuditError::SerializationError(e.to_string()))
}

fn encode_stats(stats: &AggregateStats) -> AuditResult<Vec<u8>> {
    serde_json::to_vec(stats).map_err(|e| AuditError::SerializationError(e.to_string()))
}
