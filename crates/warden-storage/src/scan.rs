//! Cursor-based prefix scanning.
//!
//! [`KvStore::list`] returns a bounded page. [`PrefixScanner`] walks an
//! entire prefix page by page so callers can stop early without the whole
//! range ever being materialized.

use std::collections::VecDeque;

use crate::error::StorageResult;
use crate::kv::{KvEntry, KvStore, ListOptions};

/// Default number of entries fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Lazy, ordered iteration over every key under a prefix.
pub struct PrefixScanner<'a> {
    store: &'a dyn KvStore,
    prefix: String,
    reverse: bool,
    page_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<KvEntry>,
    exhausted: bool,
}

impl std::fmt::Debug for PrefixScanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixScanner")
            .field("prefix", &self.prefix)
            .field("reverse", &self.reverse)
            .field("cursor", &self.cursor)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl<'a> PrefixScanner<'a> {
    /// Scan `prefix` in ascending (or, with `reverse`, descending) key order.
    #[must_use]
    pub fn new(store: &'a dyn KvStore, prefix: impl Into<String>, reverse: bool) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            reverse,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Override the page size. Zero is treated as one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch the next entry, or `None` once the prefix is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying store.
    pub async fn next(&mut self) -> StorageResult<Option<KvEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Drain the rest of the scan into a vector.
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying store.
    pub async fn collect_remaining(mut self) -> StorageResult<Vec<KvEntry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    async fn fill(&mut self) -> StorageResult<()> {
        let mut options = ListOptions::new().with_limit(self.page_size);
        options.reverse = self.reverse;
        options.after.clone_from(&self.cursor);

        let page = self.store.list(&self.prefix, options).await?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(last.key.clone());
        } else {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::transaction::Transaction;

    async fn seeded(n: usize) -> MemoryKvStore {
        let store = MemoryKvStore::new();
        let mut tx = Transaction::new();
        for i in 0..n {
            tx.set(format!("idx/{i:03}"), vec![]);
        }
        tx.set("other/1", vec![]);
        store.commit(tx).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_scan_crosses_page_boundaries() {
        let store = seeded(10).await;
        let entries = PrefixScanner::new(&store, "idx/", false)
            .with_page_size(3)
            .collect_remaining()
            .await
            .unwrap();

        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].key, "idx/000");
        assert_eq!(entries[9].key, "idx/009");
    }

    #[tokio::test]
    async fn test_reverse_scan_stops_early() {
        let store = seeded(10).await;
        let mut scanner = PrefixScanner::new(&store, "idx/", true).with_page_size(4);

        let first = scanner.next().await.unwrap().unwrap();
        let second = scanner.next().await.unwrap().unwrap();
        assert_eq!(first.key, "idx/009");
        assert_eq!(second.key, "idx/008");
    }

    #[tokio::test]
    async fn test_empty_prefix_scan() {
        let store = seeded(0).await;
        let mut scanner = PrefixScanner::new(&store, "idx/", false);
        assert!(scanner.next().await.unwrap().is_none());
        assert!(scanner.next().await.unwrap().is_none());
    }
}
