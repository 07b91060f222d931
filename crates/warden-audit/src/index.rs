//! Atomic maintenance of primary records and their secondary indexes.

use std::sync::Arc;

use tracing::{debug, instrument};
use warden_storage::{KvStore, Transaction};

use crate::error::{AuditError, AuditResult};
use crate::keys::{entry_key, index_keys};
use crate::record::{AuditRecord, RecordId};

/// Writes and deletes a record together with every index entry it owns.
///
/// Each operation is a single KV transaction. Nothing here retries: a
/// conflict is reported to the caller.
#[derive(Clone)]
pub struct IndexMaintainer {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for IndexMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexMaintainer").finish_non_exhaustive()
    }
}

impl IndexMaintainer {
    /// Maintainer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Insert `record` and all of its index entries.
    ///
    /// The primary key must not exist yet, so a duplicate id is a conflict
    /// rather than an overwrite.
    ///
    /// # Errors
    ///
    /// - [`AuditError::Conflict`] if a record with the same id exists.
    /// - [`AuditError::Storage`] if the store fails.
    #[instrument(skip_all, fields(record_id = %record.id))]
    pub async fn commit(&self, record: &AuditRecord) -> AuditResult<()> {
        let primary = entry_key(&record.id);
        let body =
            serde_json::to_vec(record).map_err(|e| AuditError::SerializationError(e.to_string()))?;

        let mut tx = Transaction::new();
        tx.check(primary.clone(), None).set(primary.clone(), body);
        for key in index_keys(record) {
            tx.set(key, record.id.as_str().as_bytes().to_vec());
        }
        let writes = tx.len();

        let outcome = self.store.commit(tx).await?;
        if !outcome.ok {
            return Err(AuditError::Conflict { key: primary });
        }
        debug!(writes, "Committed audit record");
        Ok(())
    }

    /// Read a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored bytes do not decode.
    pub async fn get(&self, id: &RecordId) -> AuditResult<Option<AuditRecord>> {
        match self.store.get(&entry_key(id)).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a record and every index entry derived from it.
    ///
    /// Returns `false` if the record does not exist (including when it
    /// vanished concurrently).
    ///
    /// # Errors
    ///
    /// - [`AuditError::Conflict`] if the record changed between read and delete.
    /// - [`AuditError::Storage`] if the store fails.
    #[instrument(skip(self), fields(record_id = %id))]
    pub async fn remove(&self, id: &RecordId) -> AuditResult<bool> {
        let primary = entry_key(id);
        let Some(current) = self.store.get_versioned(&primary).await? else {
            return Ok(false);
        };
        let record = decode_record(&current.value)?;

        let mut tx = Transaction::new();
        tx.check(primary.clone(), Some(current.version))
            .delete(primary.clone());
        for key in index_keys(&record) {
            tx.delete(key);
        }

        if self.store.commit(tx).await?.ok {
            debug!("Removed audit record");
            return Ok(true);
        }

        // Lost a race: a concurrent remove is fine, anything else is a conflict.
        if self.store.get(&primary).await?.is_none() {
            Ok(false)
        } else {
            Err(AuditError::Conflict { key: primary })
        }
    }
}

pub(crate) fn decode_record(bytes: &[u8]) -> AuditResult<AuditRecord> {
    serde_json::from_slice(bytes).map_err(|e| AuditError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use warden_storage::{ListOptions, MemoryKvStore};

    use super::*;
    use crate::encoder::EntryEncoder;
    use crate::record::{AuditAction, AuditCategory, AuditEvent};

    fn setup() -> (Arc<MemoryKvStore>, IndexMaintainer) {
        let store = Arc::new(MemoryKvStore::new());
        let maintainer = IndexMaintainer::new(store.clone());
        (store, maintainer)
    }

    fn full_record() -> AuditRecord {
        EntryEncoder::default().encode(
            AuditEvent::new(AuditCategory::Data, AuditAction::Update)
                .with_user("u1")
                .with_resource("doc", "7"),
        )
    }

    #[tokio::test]
    async fn test_commit_writes_primary_and_indexes() {
        let (store, maintainer) = setup();
        let record = full_record();
        maintainer.commit(&record).await.unwrap();

        assert_eq!(store.len().unwrap(), 5);
        assert_eq!(maintainer.get(&record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_conflict() {
        let (store, maintainer) = setup();
        let record = full_record();
        maintainer.commit(&record).await.unwrap();

        let mut twin = record.clone();
        twin.category = AuditCategory::Security;
        let err = maintainer.commit(&twin).await.unwrap_err();
        assert!(matches!(err, AuditError::Conflict { .. }));

        // The first record's indexes are untouched and no new ones appeared.
        assert_eq!(store.len().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_remove_deletes_everything() {
        let (store, maintainer) = setup();
        let record = full_record();
        maintainer.commit(&record).await.unwrap();

        assert!(maintainer.remove(&record.id).await.unwrap());
        assert!(store.is_empty().unwrap());
        let leftovers = store.list("audit/", ListOptions::new()).await.unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let (_, maintainer) = setup();
        assert!(!maintainer.remove(&RecordId::from("nope")).await.unwrap());
    }
}
