//! Mock key-value stores for failure injection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use warden_storage::{
    CommitOutcome, KvEntry, KvStore, ListOptions, MemoryKvStore, Mutation, StorageError,
    StorageResult, Transaction, Versioned,
};

/// How an injected commit failure shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The commit returns a storage error.
    Error,
    /// The commit reports a failed check (`ok = false`).
    Conflict,
}

#[derive(Debug, Clone)]
enum Trigger {
    /// The n-th commit overall (1-based).
    Nth(usize),
    /// Every commit writing or checking a key under the prefix.
    Touching(String),
}

#[derive(Debug, Clone)]
struct Rule {
    trigger: Trigger,
    fault: Fault,
}

/// [`MemoryKvStore`] wrapper that fails selected commits.
///
/// A failed commit never reaches the inner store, so it writes nothing.
/// Reads and listings always pass through. Every commit attempt is logged
/// with the keys it wrote, and can be slowed down with
/// [`set_commit_latency`](Self::set_commit_latency).
#[derive(Debug, Default)]
pub struct FaultyKvStore {
    inner: MemoryKvStore,
    rules: Mutex<Vec<Rule>>,
    commits: AtomicUsize,
    injected: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    written: Mutex<Vec<String>>,
}

impl FaultyKvStore {
    /// A store with no faults armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th commit (1-based, counting every commit attempt).
    pub fn fail_commit(&self, n: usize, fault: Fault) {
        self.push(Trigger::Nth(n), fault);
    }

    /// Fail every commit that checks or mutates a key under `prefix`.
    pub fn fail_commits_touching(&self, prefix: impl Into<String>, fault: Fault) {
        self.push(Trigger::Touching(prefix.into()), fault);
    }

    /// Disarm every fault.
    pub fn clear_faults(&self) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Sleep for `latency` before every commit reaches the inner store.
    pub fn set_commit_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Keys set by successful commits, in commit order.
    #[must_use]
    pub fn written_keys(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commit attempts seen so far, including failed ones.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Commits that were failed on purpose.
    #[must_use]
    pub fn injected_faults(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    /// The wrapped store, for inspecting what actually got written.
    #[must_use]
    pub fn inner(&self) -> &MemoryKvStore {
        &self.inner
    }

    fn push(&self, trigger: Trigger, fault: Fault) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule { trigger, fault });
    }

    fn fault_for(&self, nth: usize, tx: &Transaction) -> Option<Fault> {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        rules.iter().find_map(|rule| {
            let hit = match &rule.trigger {
                Trigger::Nth(n) => *n == nth,
                Trigger::Touching(prefix) => {
                    tx.checks().iter().any(|c| c.key.starts_with(prefix.as_str()))
                        || tx
                            .mutations()
                            .iter()
                            .any(|m| m.key().starts_with(prefix.as_str()))
                },
            };
            hit.then_some(rule.fault)
        })
    }
}

#[async_trait]
impl KvStore for FaultyKvStore {
    async fn get_versioned(&self, key: &str) -> StorageResult<Option<Versioned>> {
        self.inner.get_versioned(key).await
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> StorageResult<Vec<KvEntry>> {
        self.inner.list(prefix, options).await
    }

    async fn commit(&self, tx: Transaction) -> StorageResult<CommitOutcome> {
        let nth = self.commits.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        match self.fault_for(nth, &tx) {
            Some(fault) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(commit = nth, ?fault, "Injecting commit fault");
                match fault {
                    Fault::Error => Err(StorageError::Internal(format!(
                        "injected failure on commit {nth}"
                    ))),
                    Fault::Conflict => Ok(CommitOutcome::conflict()),
                }
            },
            None => {
                let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                let keys: Vec<String> = tx
                    .mutations()
                    .iter()
                    .filter(|m| matches!(m, Mutation::Set { .. }))
                    .map(|m| m.key().to_owned())
                    .collect();
                let outcome = self.inner.commit(tx).await?;
                if outcome.ok {
                    self.written
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend(keys);
                }
                Ok(outcome)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nth_commit_fails_without_writing() {
        let store = FaultyKvStore::new();
        store.fail_commit(2, Fault::Error);

        let mut tx = Transaction::new();
        tx.set("a", vec![1]);
        assert!(store.commit(tx).await.unwrap().ok);

        let mut tx = Transaction::new();
        tx.set("b", vec![2]);
        assert!(store.commit(tx).await.is_err());

        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.written_keys(), vec!["a"]);
        assert_eq!(store.commit_count(), 2);
        assert_eq!(store.injected_faults(), 1);
    }

    #[tokio::test]
    async fn test_prefix_conflict() {
        let store = FaultyKvStore::new();
        store.fail_commits_touching("stats", Fault::Conflict);

        let mut tx = Transaction::new();
        tx.check("stats", None).set("stats", vec![]);
        assert!(!store.commit(tx).await.unwrap().ok);

        store.clear_faults();
        let mut tx = Transaction::new();
        tx.check("stats", None).set("stats", vec![]);
        assert!(store.commit(tx).await.unwrap().ok);
    }
}
