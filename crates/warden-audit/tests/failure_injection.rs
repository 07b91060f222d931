//! Behavior under injected storage failures and contention.

mod common;

use std::sync::Arc;

use warden_audit::keys::STATS_KEY;
use warden_audit::prelude::*;
use warden_test::{Fault, FaultyKvStore, init_test_logging};

use common::{auth_event, batched_store, keys_under};

#[tokio::test]
async fn failed_commit_leaves_no_record_or_index() {
    init_test_logging();
    let kv = Arc::new(FaultyKvStore::new());
    kv.fail_commit(1, Fault::Error);
    let store = batched_store(kv.clone());

    let lost = store.log(auth_event("alice")).await.unwrap();
    let kept = store.log(auth_event("bob")).await.unwrap();

    let err = store.flush().await.unwrap_err();
    let AuditError::FlushFailed { failures } = err else {
        panic!("expected FlushFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, lost);

    assert!(store.get_by_id(&lost).await.unwrap().is_none());
    assert!(store.get_by_id(&kept).await.unwrap().is_some());

    let leftovers: Vec<_> = keys_under(kv.inner(), "audit/")
        .await
        .into_iter()
        .filter(|k| k.ends_with(lost.as_str()))
        .collect();
    assert!(leftovers.is_empty(), "orphaned keys: {leftovers:?}");

    // The failure was reported once; the next flush is clean.
    assert!(store.flush().await.unwrap().is_clean());
}

#[tokio::test]
async fn immediate_mode_propagates_commit_error() {
    let kv = Arc::new(FaultyKvStore::new());
    kv.fail_commit(1, Fault::Error);
    let store = AuditStore::builder(kv.clone())
        .batch_mode(BatchMode::Immediate)
        .build();

    let err = store.log(auth_event("carol")).await.unwrap_err();
    assert!(matches!(err, AuditError::Storage(_)));
    assert!(keys_under(kv.inner(), "audit/").await.is_empty());
}

#[tokio::test]
async fn contended_stats_update_is_dropped_and_counted() {
    init_test_logging();
    let kv = Arc::new(FaultyKvStore::new());
    kv.fail_commits_touching(STATS_KEY, Fault::Conflict);
    let store = AuditStore::builder(kv.clone())
        .batch_mode(BatchMode::Immediate)
        .contention(ContentionPolicy::new(
            3,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(2),
        ))
        .build();

    let id = store.log(auth_event("dave")).await.unwrap();
    store.flush().await.unwrap();

    // The write itself is unaffected.
    assert!(store.get_by_id(&id).await.unwrap().is_some());
    assert_eq!(store.dropped_stats_updates(), 1);
    assert_eq!(store.get_stats().await.unwrap().total_entries, 0);
    // One record commit plus three stats attempts.
    assert_eq!(kv.commit_count(), 4);

    kv.clear_faults();
    let rebuilt = store.rebuild_stats().await.unwrap();
    assert_eq!(rebuilt.total_entries, 1);
}

#[tokio::test]
async fn stats_store_error_does_not_fail_the_write() {
    let kv = Arc::new(FaultyKvStore::new());
    kv.fail_commits_touching(STATS_KEY, Fault::Error);
    let store = batched_store(kv.clone());

    store.log(auth_event("erin")).await.unwrap();
    let report = store.flush().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(store.dropped_stats_updates(), 0);
}
