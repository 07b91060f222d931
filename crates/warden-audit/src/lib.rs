//! Warden Audit - durable, indexed audit event store.
//!
//! This crate provides:
//! - Canonical, redacted audit records ([`EntryEncoder`])
//! - Primary records plus user, category, resource and time indexes,
//!   written and deleted atomically ([`IndexMaintainer`])
//! - Immediate or debounced batched writes ([`WriteBatcher`])
//! - Best-effort aggregate statistics under optimistic concurrency
//!   ([`StatsAggregator`])
//! - Index-driven filtered queries with pagination ([`QueryPlanner`])
//! - Age and count retention with a minimum floor ([`RetentionEnforcer`])
//!
//! Everything runs on any [`warden_storage::KvStore`].
//!
//! # Consistency
//!
//! A record and its index entries always exist together or not at all. The
//! aggregate statistics are a hint: under sustained contention an update may
//! be dropped, and [`AuditStore::rebuild_stats`] recomputes them from the
//! records.
//!
//! # Example
//!
//! ```
//! use warden_audit::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> AuditResult<()> {
//! let store = AuditStore::in_memory();
//!
//! store
//!     .log(AuditEvent::new(AuditCategory::Auth, AuditAction::Login).with_user("alice"))
//!     .await?;
//! store.flush().await?;
//!
//! let page = store
//!     .query(&QueryOptions::new().with_filter(AuditFilter::new().user("alice")))
//!     .await?;
//! assert_eq!(page.returned, 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod keys;
pub mod prelude;

mod batcher;
mod contention;
mod encoder;
mod error;
mod index;
mod query;
mod record;
mod retention;
mod stats;
mod store;

pub use batcher::{
    BatchMode, DEFAULT_DEBOUNCE, DEFAULT_QUEUE_CAPACITY, FailedWrite, FlushReport, WriteBatcher,
};
pub use contention::{ContentionPolicy, DEFAULT_MAX_ATTEMPTS};
pub use encoder::{
    DEFAULT_REDACTION_MARKER, DEFAULT_SENSITIVE_FIELDS, EntryEncoder, RedactionPolicy,
};
pub use error::{AuditError, AuditResult};
pub use index::IndexMaintainer;
pub use query::{
    AuditFilter, DEFAULT_QUERY_LIMIT, QueryOptions, QueryPage, QueryPlanner, SortOrder,
};
pub use record::{
    ActorContext, AuditAction, AuditCategory, AuditEvent, AuditRecord, FieldChange, RecordId,
};
pub use retention::{RetentionEnforcer, RetentionPolicy, RetentionReport};
pub use stats::{AggregateStats, StatsAggregator, UpdateOutcome};
pub use store::{AuditStore, AuditStoreBuilder};
