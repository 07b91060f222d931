//! Shared fixtures for the audit store integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use warden_audit::prelude::*;
use warden_storage::{KvStore, ListOptions, MemoryKvStore};

/// A fixed point in time plus `minutes`.
pub fn minute(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .unwrap()
        .checked_add_signed(chrono::TimeDelta::minutes(minutes))
        .unwrap()
}

/// A successful event in `category`.
pub fn test_event(category: AuditCategory) -> AuditEvent {
    AuditEvent::new(category, AuditAction::Update)
}

/// A login event for `user`.
pub fn auth_event(user: &str) -> AuditEvent {
    AuditEvent::new(AuditCategory::Auth, AuditAction::Login)
        .with_user(user)
        .with_username(user)
        .with_ip("192.0.2.10")
}

/// Store over `kv` with a debounce long enough that only `flush` drains.
pub fn batched_store(kv: Arc<dyn KvStore>) -> AuditStore {
    AuditStore::builder(kv)
        .batch_mode(BatchMode::Debounced {
            delay: Duration::from_secs(3600),
        })
        .build()
}

/// Fresh in-memory KV plus a batched store over it.
pub fn memory_store() -> (Arc<MemoryKvStore>, AuditStore) {
    let kv = Arc::new(MemoryKvStore::new());
    let store = batched_store(kv.clone());
    (kv, store)
}

/// Every key currently under `prefix`.
pub async fn keys_under(kv: &dyn KvStore, prefix: &str) -> Vec<String> {
    kv.list(prefix, ListOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect()
}
