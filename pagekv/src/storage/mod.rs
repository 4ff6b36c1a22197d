//! Single-file paged storage engine.
//!
//! # File Format
//!
//! The database is one file of fixed-size pages (8KB by default). Page `n`
//! starts at byte `n * page_size`. All integers are little-endian.
//!
//! - Page 0: metadata (`root: u64`, `freelist_page: u64`)
//! - Page 1: freelist (`max_page: u64`, `count: u16`, `count` released page ids)
//! - Remaining pages: B-tree nodes, see [`btree`]
//!
//! A root of 0 means the tree is empty.

pub mod btree;
mod freelist;
mod meta;
mod page;
mod store;

pub use freelist::{Freelist, FreelistError, freelist_capacity};
pub use meta::Metadata;
pub use page::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, META_PAGE_ID, MIN_PAGE_SIZE, PAGE_ID_SIZE, Page, PageId,
};
pub use store::{IoStats, Store, StoreError};
