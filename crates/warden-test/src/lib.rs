//! Warden Test - Shared test utilities for the Warden crates.
//!
//! This crate provides a fault-injecting [`KvStore`](warden_storage::KvStore)
//! and logging setup for tests, used as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! warden-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use warden_test::{Fault, FaultyKvStore};
//!
//! let store = Arc::new(FaultyKvStore::new());
//! store.fail_commit(1, Fault::Error);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod harness;
pub mod mocks;

pub use harness::*;
pub use mocks::*;
