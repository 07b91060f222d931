//! Persistent key-value store backed by `SurrealKV`.
//!
//! `SurrealKV` is an embedded, ACID-compliant LSM-tree store. Every trait
//! call runs in its own `SurrealKV` transaction. Version tokens are derived
//! from the stored bytes (a truncated blake3 digest), so a check compares
//! content rather than a write counter. A checked key must also be written
//! in the same transaction: `SurrealKV` detects races on the write set only,
//! and a lost race is reported as [`CommitOutcome::conflict`].

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::kv::{KvEntry, KvStore, ListOptions, Version, Versioned, validate_key, validate_prefix};
use crate::transaction::{CommitOutcome, Mutation, Transaction};

/// Persistent key-value store backed by `SurrealKV`.
///
/// # Example
///
/// ```rust,ignore
/// use warden_storage::SurrealKvStore;
///
/// let store = SurrealKvStore::open("./data/audit")?;
/// ```
pub struct SurrealKvStore {
    tree: surrealkv::Tree,
}

impl std::fmt::Debug for SurrealKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvStore").finish_non_exhaustive()
    }
}

impl SurrealKvStore {
    /// Open a persistent KV store at the given directory path.
    ///
    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the store cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { tree })
    }

    /// Close the store, flushing any pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// Commit errors that mean another transaction won the race.
fn is_conflict(e: &surrealkv::Error) -> bool {
    matches!(
        e,
        surrealkv::Error::TransactionWriteConflict | surrealkv::Error::TransactionRetry
    )
}

fn content_version(value: &[u8]) -> Version {
    let digest = blake3::hash(value);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    Version(u64::from_le_bytes(head))
}

/// Smallest byte string greater than every key starting with `prefix`.
///
/// Keys are UTF-8 and never contain `0xFF`, so a trailing `0xFF` bounds
/// the whole keyspace when the prefix is empty.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last.saturating_add(1));
            return end;
        }
    }
    vec![u8::MAX]
}

fn key_string(raw: &[u8]) -> StorageResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[async_trait]
impl KvStore for SurrealKvStore {
    async fn get_versioned(&self, key: &str) -> StorageResult<Option<Versioned>> {
        validate_key(key)?;
        let ck = key.as_bytes().to_vec();
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let value: Option<Vec<u8>> = tx.get(&ck).map_err(|ref e| map_kv_err(e))?;
        Ok(value.map(|value| Versioned {
            version: content_version(&value),
            value,
        }))
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<Vec<KvEntry>> {
        validate_prefix(prefix)?;
        let mut start = prefix.as_bytes().to_vec();
        let mut end = prefix_end(prefix.as_bytes());

        // Keys never contain NUL, so `cursor + \0` is the successor of the cursor.
        match options.after.as_deref() {
            Some(cursor) if options.reverse => {
                if cursor.as_bytes() <= start.as_slice() {
                    return Ok(Vec::new());
                }
                end = cursor.as_bytes().to_vec().min(end);
            },
            Some(cursor) => {
                let mut successor = cursor.as_bytes().to_vec();
                successor.push(0);
                start = successor.max(start);
            },
            None => {},
        }
        if start >= end {
            return Ok(Vec::new());
        }

        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let limit = options.limit.unwrap_or(usize::MAX);

        let mut entries = Vec::new();
        let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
        if options.reverse {
            iter.seek_last().map_err(|ref e| map_kv_err(e))?;
        } else {
            iter.seek_first().map_err(|ref e| map_kv_err(e))?;
        }
        while iter.valid() && entries.len() < limit {
            let raw_key = iter.key();
            let value = match iter.value().map_err(|ref e| map_kv_err(e))? {
                Some(value) => Some(value),
                None => tx.get(&raw_key).map_err(|ref e| map_kv_err(e))?,
            };
            if let Some(value) = value {
                entries.push(KvEntry {
                    key: key_string(&raw_key)?,
                    value,
                });
            }
            if options.reverse {
                iter.prev().map_err(|ref e| map_kv_err(e))?;
            } else {
                iter.next().map_err(|ref e| map_kv_err(e))?;
            }
        }
        Ok(entries)
    }

    async fn commit(&self, tx: Transaction) -> StorageResult<CommitOutcome> {
        tx.validate()?;
        let (checks, mutations) = tx.into_parts();
        if mutations.is_empty() && checks.is_empty() {
            return Ok(CommitOutcome::committed());
        }

        let mut kv_tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;

        for check in &checks {
            let ck = check.key.as_bytes().to_vec();
            let current: Option<Vec<u8>> = kv_tx.get(&ck).map_err(|ref e| map_kv_err(e))?;
            if current.as_deref().map(content_version) != check.expected {
                tracing::trace!(key = %check.key, "transaction check failed");
                return Ok(CommitOutcome::conflict());
            }
        }

        for mutation in &mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    let ck = key.as_bytes().to_vec();
                    kv_tx.set(&ck, value).map_err(|ref e| map_kv_err(e))?;
                },
                Mutation::Delete { key } => {
                    let ck = key.as_bytes().to_vec();
                    kv_tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
                },
            }
        }

        match kv_tx.commit().await {
            Ok(()) => Ok(CommitOutcome::committed()),
            Err(ref e) if is_conflict(e) => {
                tracing::trace!("transaction lost a write race");
                Ok(CommitOutcome::conflict())
            },
            Err(ref e) => Err(map_kv_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), b"ac".to_vec());
        assert_eq!(prefix_end(&[b'a', 0xFF]), b"b".to_vec());
        assert_eq!(prefix_end(b""), vec![0xFF]);
    }

    #[test]
    fn test_content_version_tracks_bytes() {
        assert_eq!(content_version(b"same"), content_version(b"same"));
        assert_ne!(content_version(b"one"), content_version(b"two"));
    }

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurrealKvStore::open(dir.path()).unwrap();

        let mut tx = Transaction::new();
        tx.check("k/1", None).set("k/1", b"v1".to_vec()).set("k/2", b"v2".to_vec());
        assert!(store.commit(tx).await.unwrap().ok);

        let listed = store.list("k/", ListOptions::new().reversed()).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["k/2", "k/1"]);

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_pages_in_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SurrealKvStore::open(dir.path()).unwrap();

        let mut tx = Transaction::new();
        for i in 0..6 {
            tx.set(format!("p/{i}"), vec![u8::try_from(i).unwrap()]);
        }
        tx.set("q/0", b"other".to_vec());
        assert!(store.commit(tx).await.unwrap().ok);

        let keys = |entries: Vec<KvEntry>| entries.into_iter().map(|e| e.key).collect::<Vec<_>>();

        let newest = store
            .list("p/", ListOptions::new().reversed().with_limit(2))
            .await
            .unwrap();
        assert_eq!(newest[0].value, vec![5]);
        assert_eq!(keys(newest), vec!["p/5", "p/4"]);

        let older = store
            .list("p/", ListOptions::new().reversed().with_limit(3).after("p/4"))
            .await
            .unwrap();
        assert_eq!(keys(older), vec!["p/3", "p/2", "p/1"]);

        let forward = store
            .list("p/", ListOptions::new().with_limit(2).after("p/3"))
            .await
            .unwrap();
        assert_eq!(keys(forward), vec!["p/4", "p/5"]);

        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checked_writes_report_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SurrealKvStore::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    // Every lost race must come back as a conflict, never an error.
                    loop {
                        let current = store.get_versioned("counter").await.unwrap();
                        let n = current
                            .as_ref()
                            .map_or(0u64, |v| u64::from_le_bytes(v.value[..8].try_into().unwrap()));
                        let mut tx = Transaction::new();
                        tx.check("counter", current.map(|v| v.version))
                            .set("counter", n.saturating_add(1).to_le_bytes().to_vec());
                        if store.commit(tx).await.unwrap().ok {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = store.get("counter").await.unwrap().unwrap();
        assert_eq!(u64::from_le_bytes(value[..8].try_into().unwrap()), 200);
        store.close().await.unwrap();
    }
}
