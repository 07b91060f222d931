//! Key layout for records and secondary indexes.
//!
//! ```text
//! audit/entry/{id}                                        -> record JSON
//! audit/idx/time/{ts}/{id}                                -> id
//! audit/idx/user/{hex(user_id)}/{ts}/{id}                 -> id
//! audit/idx/category/{hex(category)}/{ts}/{id}            -> id
//! audit/idx/resource/{hex(resource)}/{hex(res_id)}/{ts}/{id} -> id
//! audit/stats                                             -> AggregateStats JSON
//! ```
//!
//! `{ts}` is a fixed-width, order-preserving rendering of the timestamp in
//! microseconds, so a lexicographic prefix scan is chronological within a
//! dimension and `id` breaks ties. Dimension values are hex-encoded so an
//! arbitrary user id can never contain the `/` separator.

use chrono::{DateTime, Utc};

use crate::record::{AuditRecord, RecordId};

/// Prefix of every primary record key.
pub const ENTRY_PREFIX: &str = "audit/entry/";
/// Prefix of the time index.
pub const TIME_INDEX_PREFIX: &str = "audit/idx/time/";
/// Prefix of the user index.
pub const USER_INDEX_PREFIX: &str = "audit/idx/user/";
/// Prefix of the category index.
pub const CATEGORY_INDEX_PREFIX: &str = "audit/idx/category/";
/// Prefix of the resource index.
pub const RESOURCE_INDEX_PREFIX: &str = "audit/idx/resource/";
/// Key of the aggregate statistics document.
pub const STATS_KEY: &str = "audit/stats";

const SIGN_BIT: u64 = 1 << 63;

/// Primary key of a record.
#[must_use]
pub fn entry_key(id: &RecordId) -> String {
    format!("{ENTRY_PREFIX}{id}")
}

/// Order-preserving encoding of a timestamp.
///
/// Flipping the sign bit maps `i64` onto `u64` monotonically, so records
/// before the epoch still sort correctly.
#[must_use]
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    let micros = u64::from_be_bytes(ts.timestamp_micros().to_be_bytes()) ^ SIGN_BIT;
    format!("{micros:020}")
}

/// Inverse of [`encode_timestamp`].
#[must_use]
pub fn decode_timestamp(encoded: &str) -> Option<DateTime<Utc>> {
    if encoded.len() != 20 {
        return None;
    }
    let raw: u64 = encoded.parse().ok()?;
    let micros = i64::from_be_bytes((raw ^ SIGN_BIT).to_be_bytes());
    DateTime::from_timestamp_micros(micros)
}

/// A secondary index, scoped to one dimension value where applicable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexScope {
    /// Every record, by time.
    Time,
    /// Records of one user.
    User(String),
    /// Records of one category.
    Category(String),
    /// Records about one resource.
    Resource {
        /// Resource kind.
        resource: String,
        /// Resource identifier.
        resource_id: String,
    },
}

impl IndexScope {
    /// Key prefix covering exactly the entries of this scope.
    #[must_use]
    pub fn prefix(&self) -> String {
        match self {
            Self::Time => TIME_INDEX_PREFIX.to_owned(),
            Self::User(user) => format!("{USER_INDEX_PREFIX}{}/", hex::encode(user)),
            Self::Category(category) => {
                format!("{CATEGORY_INDEX_PREFIX}{}/", hex::encode(category))
            },
            Self::Resource {
                resource,
                resource_id,
            } => format!(
                "{RESOURCE_INDEX_PREFIX}{}/{}/",
                hex::encode(resource),
                hex::encode(resource_id)
            ),
        }
    }

    /// Full index key for a record with this scope.
    #[must_use]
    pub fn key(&self, timestamp: DateTime<Utc>, id: &RecordId) -> String {
        format!("{}{}/{id}", self.prefix(), encode_timestamp(timestamp))
    }

    /// Short label used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::User(_) => "user",
            Self::Category(_) => "category",
            Self::Resource { .. } => "resource",
        }
    }
}

/// Every index scope a record belongs to.
#[must_use]
pub fn scopes_for(record: &AuditRecord) -> Vec<IndexScope> {
    let mut scopes = vec![
        IndexScope::Time,
        IndexScope::Category(record.category.as_str().to_owned()),
    ];
    if let Some(user) = &record.user_id {
        scopes.push(IndexScope::User(user.clone()));
    }
    if let Some((resource, resource_id)) = record.resource_ref() {
        scopes.push(IndexScope::Resource {
            resource: resource.to_owned(),
            resource_id: resource_id.to_owned(),
        });
    }
    scopes
}

/// Every index key a record owns.
#[must_use]
pub fn index_keys(record: &AuditRecord) -> Vec<String> {
    scopes_for(record)
        .iter()
        .map(|scope| scope.key(record.timestamp, &record.id))
        .collect()
}

/// Split the part of an index key after its scope prefix into
/// `(timestamp, id)`.
#[must_use]
pub fn parse_index_suffix(suffix: &str) -> Option<(DateTime<Utc>, RecordId)> {
    let (ts, id) = suffix.split_once('/')?;
    if id.is_empty() {
        return None;
    }
    Some((decode_timestamp(ts)?, RecordId::from(id)))
}
