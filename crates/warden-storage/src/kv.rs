//! Ordered key-value store trait and the in-memory implementation.
//!
//! The [`KvStore`] trait is the only storage boundary the audit core relies
//! on. It provides:
//!
//! - point reads, optionally paired with an opaque [`Version`] token
//! - ordered prefix listing (forward or reverse, with a cursor and limit)
//! - atomic [`Transaction`]s whose `check` entries make the whole commit
//!   fail with `ok = false` when a key changed since it was read
//!
//! Implementations:
//!
//! - **In-memory** (always available): for tests and ephemeral stores
//! - **`SurrealKV`** (behind the `kv` feature): persistent, see [`crate::surreal`]

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::transaction::{CommitOutcome, Mutation, Transaction};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a key is safe for storage.
///
/// Keys must be non-empty and must not contain the null byte.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Validate a listing prefix. The empty prefix selects the whole keyspace.
pub(crate) fn validate_prefix(prefix: &str) -> StorageResult<()> {
    if prefix.contains('\0') {
        return Err(StorageError::InvalidKey(
            "prefix must not contain null bytes".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Opaque version token returned alongside a versioned read.
///
/// Only equality is meaningful: a token read earlier equals the current one
/// iff the key has not been written since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub(crate) u64);

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// The raw value bytes.
    pub value: Vec<u8>,
    /// Version token for use in [`Transaction::check`].
    pub version: Version,
}

/// A key-value entry returned by [`KvStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The full key.
    pub key: String,
    /// The raw value bytes.
    pub value: Vec<u8>,
}

/// Options for [`KvStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Iterate from the largest key down.
    pub reverse: bool,
    /// Exclusive cursor in iteration order: forward listings return keys
    /// strictly greater than it, reverse listings keys strictly smaller.
    pub after: Option<String>,
}

impl ListOptions {
    /// Ascending listing with no limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of returned entries.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Iterate in descending key order.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Resume after the given key.
    #[must_use]
    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.after = Some(key.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Ordered key-value store with optimistic-concurrency transactions.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.get_versioned(key).await?.map(|v| v.value))
    }

    /// Get a value together with its current version token.
    async fn get_versioned(&self, key: &str) -> StorageResult<Option<Versioned>>;

    /// List entries whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<Vec<KvEntry>>;

    /// Atomically apply a transaction.
    ///
    /// Every check is evaluated first; if any fails nothing is written and
    /// the outcome has `ok = false`.
    async fn commit(&self, tx: Transaction) -> StorageResult<CommitOutcome>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<String, (Vec<u8>, u64)>,
    /// Last version handed out. Every write takes the next value.
    sequence: u64,
}

/// In-memory ordered key-value store for tests and ephemeral data.
///
/// Versions come from a store-wide write sequence, so a key that is
/// rewritten with identical bytes still gets a new version.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    state: RwLock<MemoryState>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn len(&self) -> StorageResult<usize> {
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(state.data.len())
    }

    /// Whether the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the lock is poisoned.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn forward_range<'a>(
    data: &'a BTreeMap<String, (Vec<u8>, u64)>,
    prefix: &'a str,
    after: Option<&'a str>,
) -> impl Iterator<Item = (&'a String, &'a (Vec<u8>, u64))> + 'a {
    let start = match after {
        Some(cursor) if cursor >= prefix => Bound::Excluded(cursor),
        _ => Bound::Included(prefix),
    };
    data.range::<str, _>((start, Bound::Unbounded))
        .take_while(move |(k, _)| k.starts_with(prefix))
}

fn reverse_range<'a>(
    data: &'a BTreeMap<String, (Vec<u8>, u64)>,
    prefix: &'a str,
    after: Option<&'a str>,
) -> Box<dyn Iterator<Item = (&'a String, &'a (Vec<u8>, u64))> + 'a> {
    let end = match after {
        Some(cursor) if cursor <= prefix => return Box::new(std::iter::empty()),
        Some(cursor) => Bound::Excluded(cursor),
        None => Bound::Unbounded,
    };
    Box::new(
        data.range::<str, _>((Bound::Included(prefix), end))
            .rev()
            .skip_while(move |(k, _)| !k.starts_with(prefix))
            .take_while(move |(k, _)| k.starts_with(prefix)),
    )
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_versioned(&self, key: &str) -> StorageResult<Option<Versioned>> {
        validate_key(key)?;
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(state.data.get(key).map(|(value, version)| Versioned {
            value: value.clone(),
            version: Version(*version),
        }))
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<Vec<KvEntry>> {
        validate_prefix(prefix)?;
        let state = self
            .state
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let after = options.after.as_deref();
        let limit = options.limit.unwrap_or(usize::MAX);

        let to_entry = |(k, (v, _)): (&String, &(Vec<u8>, u64))| KvEntry {
            key: k.clone(),
            value: v.clone(),
        };

        let entries = if options.reverse {
            reverse_range(&state.data, prefix, after)
                .take(limit)
                .map(to_entry)
                .collect()
        } else {
            forward_range(&state.data, prefix, after)
                .take(limit)
                .map(to_entry)
                .collect()
        };
        Ok(entries)
    }

    async fn commit(&self, tx: Transaction) -> StorageResult<CommitOutcome> {
        tx.validate()?;
        let mut state = self
            .state
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        for check in tx.checks() {
            let current = state.data.get(&check.key).map(|(_, v)| Version(*v));
            if current != check.expected {
                tracing::trace!(key = %check.key, "transaction check failed");
                return Ok(CommitOutcome::conflict());
            }
        }

        let (_, mutations) = tx.into_parts();
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    state.sequence = state.sequence.checked_add(1).ok_or_else(|| {
                        StorageError::Internal("version sequence exhausted".into())
                    })?;
                    let version = state.sequence;
                    state.data.insert(key, (value, version));
                },
                Mutation::Delete { key } => {
                    state.data.remove(&key);
                },
            }
        }
        Ok(CommitOutcome::committed())
    }
}
