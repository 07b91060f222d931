//! The audit store handle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use warden_storage::{KvStore, MemoryKvStore};

use crate::batcher::{BatchMode, DEFAULT_QUEUE_CAPACITY, FlushReport, WriteBatcher};
use crate::contention::ContentionPolicy;
use crate::encoder::{EntryEncoder, RedactionPolicy};
use crate::error::{AuditError, AuditResult};
use crate::index::IndexMaintainer;
use crate::query::{QueryOptions, QueryPage, QueryPlanner};
use crate::record::{ActorContext, AuditAction, AuditCategory, AuditEvent, AuditRecord, RecordId};
use crate::retention::{RetentionEnforcer, RetentionPolicy, RetentionReport};
use crate::stats::{AggregateStats, StatsAggregator};

/// Builder for [`AuditStore`].
pub struct AuditStoreBuilder {
    store: Arc<dyn KvStore>,
    mode: BatchMode,
    queue_capacity: usize,
    redaction: RedactionPolicy,
    contention: ContentionPolicy,
    retention: RetentionPolicy,
}

impl std::fmt::Debug for AuditStoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStoreBuilder")
            .field("mode", &self.mode)
            .field("queue_capacity", &self.queue_capacity)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl AuditStoreBuilder {
    /// Start from defaults over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            mode: BatchMode::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            redaction: RedactionPolicy::default(),
            contention: ContentionPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }

    /// How writes reach the store.
    #[must_use]
    pub fn batch_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound of the batch queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Which fields get masked.
    #[must_use]
    pub fn redaction(mut self, redaction: RedactionPolicy) -> Self {
        self.redaction = redaction;
        self
    }

    /// Retry policy for stats updates.
    #[must_use]
    pub fn contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }

    /// Pruning limits.
    #[must_use]
    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Assemble the store. Spawns the batch worker in debounced mode, so
    /// this must run inside a Tokio runtime.
    #[must_use]
    pub fn build(self) -> AuditStore {
        let maintainer = IndexMaintainer::new(Arc::clone(&self.store));
        let stats = Arc::new(StatsAggregator::new(
            Arc::clone(&self.store),
            self.contention,
        ));
        let batcher = WriteBatcher::new(
            maintainer.clone(),
            Arc::clone(&stats),
            self.mode,
            self.queue_capacity,
        );
        info!(mode = ?self.mode, "Audit store ready");

        AuditStore {
            encoder: EntryEncoder::new(self.redaction),
            planner: QueryPlanner::new(maintainer.clone()),
            retention: RetentionEnforcer::new(maintainer.clone(), self.retention),
            maintainer,
            batcher,
            stats,
        }
    }
}

/// Records, indexes, queries and prunes audit events.
///
/// Built once with [`AuditStore::builder`] and shared by reference (or
/// inside an `Arc`); there is no global instance.
///
/// # Example
///
/// ```rust
/// use warden_audit::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> AuditResult<()> {
/// let store = AuditStore::in_memory();
/// let id = store
///     .log(AuditEvent::new(AuditCategory::Auth, AuditAction::Login).with_user("alice"))
///     .await?;
/// store.flush().await?;
///
/// assert!(store.get_by_id(&id).await?.is_some());
/// assert_eq!(store.get_stats().await?.total_entries, 1);
/// # Ok(())
/// # }
/// ```
pub struct AuditStore {
    encoder: EntryEncoder,
    maintainer: IndexMaintainer,
    batcher: WriteBatcher,
    stats: Arc<StatsAggregator>,
    planner: QueryPlanner,
    retention: RetentionEnforcer,
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("batcher", &self.batcher)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl AuditStore {
    /// Builder over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn KvStore>) -> AuditStoreBuilder {
        AuditStoreBuilder::new(store)
    }

    /// An isolated store over a fresh [`MemoryKvStore`] with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::builder(Arc::new(MemoryKvStore::new())).build()
    }

    /// Record an event and return its id.
    ///
    /// In immediate mode the record is durable when this returns. In
    /// debounced mode the id is returned once the record is *accepted*, not
    /// once it is durable: a later commit failure is only reported by
    /// [`flush`](Self::flush). Call `flush` when durability matters.
    ///
    /// # Errors
    ///
    /// - Immediate mode: any commit error.
    /// - Debounced mode: [`AuditError::WriterClosed`] after shutdown.
    #[instrument(skip_all, fields(category = %event.category, action = %event.action))]
    pub async fn log(&self, event: AuditEvent) -> AuditResult<RecordId> {
        let record = self.encoder.encode(event);
        let id = record.id.clone();
        self.batcher.enqueue(record).await?;
        Ok(id)
    }

    /// Record an event attributed from a request context.
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log).
    pub async fn log_from_context(
        &self,
        context: &ActorContext,
        action: impl Into<AuditAction>,
        category: impl Into<AuditCategory>,
        details: Map<String, Value>,
    ) -> AuditResult<RecordId> {
        let event = AuditEvent::new(category, action)
            .with_context(context)
            .with_details(details);
        self.log(event).await
    }

    /// Run a filtered, paginated query.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn query(&self, options: &QueryOptions) -> AuditResult<QueryPage> {
        self.planner.query(options).await
    }

    /// Look up one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_by_id(&self, id: &RecordId) -> AuditResult<Option<AuditRecord>> {
        self.maintainer.get(id).await
    }

    /// Current aggregate statistics. Eventually consistent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_stats(&self) -> AuditResult<AggregateStats> {
        self.stats.snapshot().await
    }

    /// Run one retention pass with the configured policy.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning or deleting fails.
    pub async fn apply_retention(&self) -> AuditResult<RetentionReport> {
        self.retention.apply().await
    }

    /// Wait until every queued write was attempted and every pending stats
    /// update settled.
    ///
    /// # Errors
    ///
    /// - [`AuditError::FlushFailed`] listing the records that failed since
    ///   the previous flush.
    /// - [`AuditError::WriterClosed`] after shutdown.
    pub async fn flush(&self) -> AuditResult<FlushReport> {
        let report = self.batcher.flush().await?;
        self.stats.settle().await;
        into_result(report)
    }

    /// Delete one record and its index entries. Returns `false` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete(&self, id: &RecordId) -> AuditResult<bool> {
        self.maintainer.remove(id).await
    }

    /// Recompute the aggregate statistics from the stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or concurrent updates outlast the
    /// contention policy.
    pub async fn rebuild_stats(&self) -> AuditResult<AggregateStats> {
        self.stats.rebuild().await
    }

    /// Updates to the aggregate that were dropped under contention.
    #[must_use]
    pub fn dropped_stats_updates(&self) -> u64 {
        self.stats.dropped_updates()
    }

    /// Apply retention every `interval` until `cancel` fires.
    #[must_use]
    pub fn spawn_retention(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        self.retention.clone().spawn_periodic(interval, cancel)
    }

    /// Drain outstanding writes and stop the batch worker.
    ///
    /// # Errors
    ///
    /// [`AuditError::FlushFailed`] if any drained write failed.
    pub async fn shutdown(&self) -> AuditResult<FlushReport> {
        let report = self.batcher.shutdown().await?;
        self.stats.settle().await;
        info!(committed = report.committed, "Audit store shut down");
        into_result(report)
    }
}

fn into_result(report: FlushReport) -> AuditResult<FlushReport> {
    if report.is_clean() {
        Ok(report)
    } else {
        Err(AuditError::FlushFailed {
            failures: report.failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_log_from_context_attributes_actor() {
        let store = AuditStore::in_memory();
        let ctx = ActorContext::user("u1", "alice").with_ip("10.0.0.9");
        let mut details = Map::new();
        details.insert("password".into(), json!("hunter2"));

        let id = store
            .log_from_context(&ctx, AuditAction::PasswordChange, AuditCategory::Auth, details)
            .await
            .unwrap();
        store.flush().await.unwrap();

        let record = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.username.as_deref(), Some("alice"));
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.9"));
        assert_eq!(record.details["password"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let store = AuditStore::builder(Arc::new(MemoryKvStore::new()))
            .batch_mode(BatchMode::Immediate)
            .build();
        let id = store
            .log(AuditEvent::new(AuditCategory::Data, AuditAction::Delete))
            .await
            .unwrap();

        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_then_log_is_rejected() {
        let store = AuditStore::in_memory();
        store
            .log(AuditEvent::new(AuditCategory::System, AuditAction::Backup))
            .await
            .unwrap();
        let report = store.shutdown().await.unwrap();
        assert_eq!(report.committed, 1);

        let err = store
            .log(AuditEvent::new(AuditCategory::System, AuditAction::Restore))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::WriterClosed));
    }
}
