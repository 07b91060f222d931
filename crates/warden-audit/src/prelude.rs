//! Prelude module - commonly used types for convenient import.
//!
//! Use `use warden_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Records
pub use crate::{
    ActorContext, AuditAction, AuditCategory, AuditEvent, AuditRecord, FieldChange, RecordId,
};

// Store
pub use crate::{AggregateStats, AuditStore, AuditStoreBuilder, BatchMode, FlushReport};

// Queries
pub use crate::{AuditFilter, QueryOptions, QueryPage, SortOrder};

// Policies
pub use crate::{ContentionPolicy, RedactionPolicy, RetentionPolicy, RetentionReport};
