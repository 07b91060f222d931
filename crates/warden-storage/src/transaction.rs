//! Atomic multi-key transactions.

use crate::error::StorageResult;
use crate::kv::{Version, validate_key};

/// A precondition evaluated at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Key whose version is compared.
    pub key: String,
    /// Expected version; `None` means the key must be absent.
    pub expected: Option<Version>,
}

/// A write applied when every check passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite a key.
    Set {
        /// Target key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove a key. Deleting an absent key is not an error.
    Delete {
        /// Target key.
        key: String,
    },
}

impl Mutation {
    /// The key this mutation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An all-or-nothing unit of checks and mutations.
///
/// ```rust
/// use warden_storage::Transaction;
///
/// let mut tx = Transaction::new();
/// tx.check("stats", None)
///     .set("stats", b"{}".to_vec())
///     .delete("stale");
/// assert_eq!(tx.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    checks: Vec<Check>,
    mutations: Vec<Mutation>,
}

impl Transaction {
    /// Begin an empty transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to still be at `expected` when the transaction commits.
    pub fn check(&mut self, key: impl Into<String>, expected: Option<Version>) -> &mut Self {
        self.checks.push(Check {
            key: key.into(),
            expected,
        });
        self
    }

    /// Set `key` to `value`.
    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.mutations.push(Mutation::Set {
            key: key.into(),
            value,
        });
        self
    }

    /// Delete `key`.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.mutations.push(Mutation::Delete { key: key.into() });
        self
    }

    /// Preconditions, in insertion order.
    #[must_use]
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Mutations, in insertion order.
    #[must_use]
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Number of mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether the transaction writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Split into checks and mutations.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Check>, Vec<Mutation>) {
        (self.checks, self.mutations)
    }

    /// Validate every key the transaction touches.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`](crate::StorageError::InvalidKey)
    /// for the first empty or null-containing key.
    pub fn validate(&self) -> StorageResult<()> {
        for check in &self.checks {
            validate_key(&check.key)?;
        }
        for mutation in &self.mutations {
            validate_key(mutation.key())?;
        }
        Ok(())
    }
}

/// Result of [`KvStore::commit`](crate::KvStore::commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// `false` when a check failed and nothing was written.
    pub ok: bool,
}

impl CommitOutcome {
    /// All checks passed and every mutation was applied.
    #[must_use]
    pub const fn committed() -> Self {
        Self { ok: true }
    }

    /// A check failed; nothing was applied.
    #[must_use]
    pub const fn conflict() -> Self {
        Self { ok: false }
    }
}
