//! Age and count based pruning with a minimum-retained floor.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use warden_storage::PrefixScanner;

use crate::error::AuditResult;
use crate::index::IndexMaintainer;
use crate::keys::{IndexScope, parse_index_suffix};
use crate::record::RecordId;

/// Pruning limits. `None` disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Records older than this many days are pruned.
    pub max_age_days: Option<u32>,
    /// At most this many records are kept.
    pub max_entries: Option<usize>,
    /// Pruning never leaves fewer records than this.
    #[serde(default)]
    pub min_entries: usize,
}

impl RetentionPolicy {
    /// Whether the policy can ever delete anything.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.max_age_days.is_some() || self.max_entries.is_some()
    }

    /// Ids to delete from `entries`, which must be sorted oldest first.
    ///
    /// The count limit is applied first, then the age limit; neither pass
    /// goes below `min_entries`.
    #[must_use]
    pub fn plan(&self, entries: &[(DateTime<Utc>, RecordId)], now: DateTime<Utc>) -> Vec<RecordId> {
        let total = entries.len();
        let removable = total.saturating_sub(self.min_entries);
        let by_count = self
            .max_entries
            .map_or(0, |max| total.saturating_sub(max))
            .min(removable);

        let mut marked: Vec<RecordId> = entries
            .iter()
            .take(by_count)
            .map(|(_, id)| id.clone())
            .collect();
        let mut remaining = total.saturating_sub(by_count);

        let cutoff = self
            .max_age_days
            .and_then(|days| TimeDelta::try_days(i64::from(days)))
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            for (ts, id) in entries.iter().skip(by_count) {
                if *ts >= cutoff || remaining <= self.min_entries {
                    break;
                }
                marked.push(id.clone());
                remaining = remaining.saturating_sub(1);
            }
        }
        marked
    }
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    /// Records deleted.
    pub deleted: usize,
    /// Records still present after the pass. Marked records that were
    /// already gone when their delete ran count as neither.
    pub retained: usize,
}

/// Applies a [`RetentionPolicy`] through the [`IndexMaintainer`].
#[derive(Debug, Clone)]
pub struct RetentionEnforcer {
    maintainer: IndexMaintainer,
    policy: RetentionPolicy,
}

impl RetentionEnforcer {
    /// Enforcer deleting through `maintainer`.
    #[must_use]
    pub fn new(maintainer: IndexMaintainer, policy: RetentionPolicy) -> Self {
        Self { maintainer, policy }
    }

    /// The policy being enforced.
    #[must_use]
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Run one pass against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning or deleting fails.
    pub async fn apply(&self) -> AuditResult<RetentionReport> {
        self.apply_at(Utc::now()).await
    }

    /// Run one pass as if the time were `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning or deleting fails. Records deleted
    /// before the failure stay deleted.
    #[instrument(skip(self))]
    pub async fn apply_at(&self, now: DateTime<Utc>) -> AuditResult<RetentionReport> {
        let entries = self.scan_time_index().await?;
        let total = entries.len();
        let marked = if self.policy.is_active() {
            self.policy.plan(&entries, now)
        } else {
            Vec::new()
        };

        let mut deleted = 0usize;
        let mut vanished = 0usize;
        for id in &marked {
            if self.maintainer.remove(id).await? {
                deleted = deleted.saturating_add(1);
            } else {
                vanished = vanished.saturating_add(1);
            }
        }

        let report = RetentionReport {
            deleted,
            retained: total.saturating_sub(deleted).saturating_sub(vanished),
        };
        if vanished > 0 {
            debug!(vanished, "Marked records were already gone");
        }
        if deleted > 0 {
            info!(deleted, retained = report.retained, "Pruned audit records");
        } else {
            debug!(retained = report.retained, "Retention pass removed nothing");
        }
        Ok(report)
    }

    async fn scan_time_index(&self) -> AuditResult<Vec<(DateTime<Utc>, RecordId)>> {
        let prefix = IndexScope::Time.prefix();
        let mut scanner = PrefixScanner::new(self.maintainer.store().as_ref(), prefix.as_str(), false);
        let mut entries = Vec::new();
        while let Some(hit) = scanner.next().await? {
            if let Some(parsed) = hit
                .key
                .strip_prefix(prefix.as_str())
                .and_then(parse_index_suffix)
            {
                entries.push(parsed);
            }
        }
        Ok(entries)
    }

    /// Run [`apply`](Self::apply) every `interval` until `cancel` fires.
    ///
    /// The first pass runs one interval after the call. Failures are logged
    /// and the schedule continues.
    #[must_use]
    pub fn spawn_periodic(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now()
                .checked_add(interval)
                .unwrap_or_else(tokio::time::Instant::now);
            let mut ticker = tokio::time::interval_at(start, interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Periodic retention stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.apply().await {
                            error!(error = %e, "Periodic retention failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use warden_storage::{KvStore, MemoryKvStore, Transaction};

    use super::*;
    use crate::encoder::EntryEncoder;
    use crate::keys::entry_key;
    use crate::record::{AuditAction, AuditCategory, AuditEvent};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .checked_add_signed(TimeDelta::days(n))
            .unwrap()
    }

    fn entries(days: &[i64]) -> Vec<(DateTime<Utc>, RecordId)> {
        days.iter()
            .map(|d| (day(*d), RecordId::from(format!("r{d}"))))
            .collect()
    }

    fn ids(marked: &[RecordId]) -> Vec<&str> {
        marked.iter().map(RecordId::as_str).collect()
    }

    #[test]
    fn test_count_limit_respects_floor() {
        let policy = RetentionPolicy {
            max_age_days: None,
            max_entries: Some(1),
            min_entries: 3,
        };
        let marked = policy.plan(&entries(&[0, 1, 2, 3, 4]), day(10));
        assert_eq!(ids(&marked), vec!["r0", "r1"]);
    }

    #[test]
    fn test_age_limit_stops_at_floor() {
        let policy = RetentionPolicy {
            max_age_days: Some(5),
            max_entries: None,
            min_entries: 2,
        };
        // Everything is older than 5 days; only three may go.
        let marked = policy.plan(&entries(&[0, 1, 2, 3, 4]), day(100));
        assert_eq!(ids(&marked), vec!["r0", "r1", "r2"]);
    }

    #[test]
    fn test_age_limit_keeps_recent() {
        let policy = RetentionPolicy {
            max_age_days: Some(5),
            max_entries: None,
            min_entries: 0,
        };
        // cutoff = day 5; day 5 itself is not older than the cutoff.
        let marked = policy.plan(&entries(&[3, 4, 5, 6]), day(10));
        assert_eq!(ids(&marked), vec!["r3", "r4"]);
    }

    #[test]
    fn test_count_and_age_combine() {
        let policy = RetentionPolicy {
            max_age_days: Some(5),
            max_entries: Some(4),
            min_entries: 1,
        };
        let marked = policy.plan(&entries(&[1, 2, 3, 8, 9, 10]), day(10));
        assert_eq!(ids(&marked), vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_inactive_policy_plans_nothing() {
        let policy = RetentionPolicy::default();
        assert!(!policy.is_active());
        assert!(policy.plan(&entries(&[0, 1]), day(1000)).is_empty());
    }

    #[tokio::test]
    async fn test_apply_deletes_oldest() {
        let maintainer = IndexMaintainer::new(Arc::new(MemoryKvStore::new()));
        let encoder = EntryEncoder::default();
        let mut records = Vec::new();
        for d in 0..5 {
            let record = encoder
                .encode(AuditEvent::new(AuditCategory::Auth, AuditAction::Login).at(day(d)));
            maintainer.commit(&record).await.unwrap();
            records.push(record);
        }

        let enforcer = RetentionEnforcer::new(maintainer.clone(), RetentionPolicy {
            max_age_days: None,
            max_entries: Some(2),
            min_entries: 2,
        });
        let report = enforcer.apply_at(day(5)).await.unwrap();
        assert_eq!(report, RetentionReport {
            deleted: 3,
            retained: 2
        });

        for (i, record) in records.iter().enumerate() {
            let present = maintainer.get(&record.id).await.unwrap().is_some();
            assert_eq!(present, i >= 3, "record {i}");
        }
    }

    #[tokio::test]
    async fn test_records_gone_before_delete_are_not_retained() {
        let kv = Arc::new(MemoryKvStore::new());
        let maintainer = IndexMaintainer::new(kv.clone());
        let encoder = EntryEncoder::default();
        let mut records = Vec::new();
        for d in 0..3 {
            let record = encoder
                .encode(AuditEvent::new(AuditCategory::Auth, AuditAction::Login).at(day(d)));
            maintainer.commit(&record).await.unwrap();
            records.push(record);
        }

        // The oldest primary disappears but its time index entry is still seen.
        let mut tx = Transaction::new();
        tx.delete(entry_key(&records[0].id));
        assert!(kv.commit(tx).await.unwrap().ok);

        let enforcer = RetentionEnforcer::new(maintainer.clone(), RetentionPolicy {
            max_age_days: None,
            max_entries: Some(1),
            min_entries: 0,
        });
        let report = enforcer.apply_at(day(3)).await.unwrap();
        assert_eq!(report, RetentionReport {
            deleted: 1,
            retained: 1
        });
        assert!(maintainer.get(&records[2].id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_runs_until_cancelled() {
        let maintainer = IndexMaintainer::new(Arc::new(MemoryKvStore::new()));
        let record = EntryEncoder::default()
            .encode(AuditEvent::new(AuditCategory::System, AuditAction::Backup).at(day(0)));
        maintainer.commit(&record).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = RetentionEnforcer::new(maintainer.clone(), RetentionPolicy {
            max_age_days: Some(1),
            max_entries: None,
            min_entries: 0,
        })
        .spawn_periodic(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(maintainer.get(&record.id).await.unwrap().is_none());

        cancel.cancel();
        handle.await.unwrap();
    }
}
