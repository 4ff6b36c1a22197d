//! Embedded single-file key-value store.
//!
//! Keys are kept in byte order in a disk-backed B-tree. A [`storage::Store`]
//! owns the file, its page allocator and its metadata page; a
//! [`storage::btree::Collection`] borrowed from it provides `find` and `put`.

// Forbid unwrap() and expect() in production code to prevent panics from
// corrupt data. Test code is allowed to use them for convenience.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod storage;
#[cfg(test)]
mod testing;

pub use config::{ConfigError, StoreConfig};
pub use storage::btree::{Collection, CollectionError, Item};
pub use storage::{Store, StoreError};
