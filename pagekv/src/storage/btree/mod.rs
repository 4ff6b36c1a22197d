//! On-disk B-tree.
//!
//! # Structure
//!
//! Every node occupies one page. Both leaves and internal nodes carry
//! key-value items; internal nodes additionally hold `items + 1` child page
//! ids. Keys and values are at most 255 bytes each.
//!
//! Inserts that push a node past the store's maximum fill threshold split it
//! at the point where its leading items first exceed the minimum threshold.
//! The middle item moves into the parent, and a split root grows the tree by
//! one level.
//!
//! # Usage
//!
//! ```no_run
//! use pagekv::config::StoreConfig;
//! use pagekv::storage::Store;
//!
//! let mut store = Store::open("data.db".as_ref(), StoreConfig::new())?;
//! let mut collection = store.collection("default");
//! collection.put("hello", "world")?;
//!
//! let item = collection.find(b"hello")?;
//! assert_eq!(item.map(|item| item.value), Some(b"world".to_vec()));
//! store.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod collection;
mod node;

pub use collection::{Collection, CollectionError};
pub use node::{
    Item, MAX_ELEMENT_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, NODE_HEADER_SIZE, Node, NodeError,
};
