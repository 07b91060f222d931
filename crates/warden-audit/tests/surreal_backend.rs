//! The audit store over the persistent `SurrealKV` adapter.

mod common;

use std::sync::Arc;

use warden_audit::prelude::*;
use warden_storage::SurrealKvStore;

use common::{auth_event, batched_store};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_stats_updates_are_retried_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let kv = Arc::new(SurrealKvStore::open(dir.path()).unwrap());
    let store = batched_store(kv.clone());

    for i in 0..200 {
        store.log(auth_event(&format!("user-{i}"))).await.unwrap();
    }
    let report = store.flush().await.unwrap();
    assert_eq!(report.committed, 200);

    let stats = store.get_stats().await.unwrap();
    assert_eq!(
        stats.total_entries.saturating_add(store.dropped_stats_updates()),
        200
    );

    let page = store
        .query(&QueryOptions::default().with_limit(500))
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 200);

    store.shutdown().await.unwrap();
    kv.close().await.unwrap();
}
