//! Warden Storage - the ordered key-value contract the audit store runs on.
//!
//! The audit core never talks to a database directly. It consumes the
//! [`KvStore`] trait:
//!
//! - `get` / `get_versioned` point reads
//! - ordered prefix `list` with limit, direction and cursor
//! - atomic [`Transaction`]s with optimistic `check` preconditions
//!
//! # Backends
//!
//! | Backend | Feature | Use |
//! |---------|---------|-----|
//! | [`MemoryKvStore`] | always | tests, ephemeral stores |
//! | `SurrealKvStore` | `kv` | persistent embedded storage |
//!
//! # Example
//!
//! ```rust
//! use warden_storage::{KvStore, MemoryKvStore, Transaction};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> warden_storage::StorageResult<()> {
//! let store = MemoryKvStore::new();
//!
//! let mut tx = Transaction::new();
//! tx.check("doc", None).set("doc", b"v1".to_vec());
//! assert!(store.commit(tx).await?.ok);
//!
//! let read = store.get_versioned("doc").await?.expect("written above");
//! let mut tx = Transaction::new();
//! tx.check("doc", Some(read.version)).set("doc", b"v2".to_vec());
//! assert!(store.commit(tx).await?.ok);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;
pub mod scan;
pub mod transaction;

#[cfg(feature = "kv")]
pub mod surreal;

pub use error::{StorageError, StorageResult};
pub use kv::{KvEntry, KvStore, ListOptions, MemoryKvStore, Version, Versioned};
pub use scan::PrefixScanner;
pub use transaction::{Check, CommitOutcome, Mutation, Transaction};

#[cfg(feature = "kv")]
pub use surreal::SurrealKvStore;
