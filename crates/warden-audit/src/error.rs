//! Audit store error types.

use thiserror::Error;
use warden_storage::StorageError;

use crate::batcher::FailedWrite;

/// Errors that can occur in the audit store.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The underlying key-value store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record or stats document could not be (de)serialized.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// An atomic commit was rejected because a checked key changed.
    #[error("commit conflict on {key}")]
    Conflict {
        /// The key whose precondition failed.
        key: String,
    },

    /// The background writer has shut down and accepts no more records.
    #[error("audit writer is closed")]
    WriterClosed,

    /// One or more queued writes failed to commit.
    #[error("{} queued audit write(s) failed to commit", .failures.len())]
    FlushFailed {
        /// Every write that failed since the previous flush.
        failures: Vec<FailedWrite>,
    },
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
