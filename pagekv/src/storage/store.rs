//! Page store: the only component that touches the database file.
//!
//! The store reads and writes fixed-size pages at `page_id * page_size`,
//! owns the freelist and metadata for one open file, and decides when a node
//! has to be split.

#![allow(clippy::cast_precision_loss)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{ConfigError, StoreConfig};
use crate::storage::btree::{Collection, NODE_HEADER_SIZE, Node, NodeError};
use crate::storage::freelist::{Freelist, FreelistError};
use crate::storage::meta::Metadata;
use crate::storage::page::{META_PAGE_ID, PAGE_ID_SIZE, Page, PageId};

/// Page I/O counters for one open store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub page_reads: u64,
    pub page_writes: u64,
}

/// An open database file with its allocator and metadata.
///
/// A store has a single owner. Every operation that reads or writes the file
/// takes `&mut self`.
pub struct Store {
    file: File,
    path: PathBuf,
    config: StoreConfig,
    freelist: Freelist,
    meta: Metadata,
    stats: IoStats,
}

impl Store {
    /// Open the database file at `path`, creating it if absent.
    ///
    /// A missing or empty file is initialized with empty metadata and an
    /// empty freelist stored at page 1. Otherwise both are loaded from disk.
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            config,
            freelist: Freelist::new(),
            meta: Metadata::new(),
            stats: IoStats::default(),
        };

        if len == 0 {
            store.meta.freelist_page = store.freelist.next_page();
            store.write_freelist()?;
            store.write_metadata()?;
            tracing::info!(
                "Created store at {} (page_size={}, freelist_page={})",
                path.display(),
                config.page_size,
                store.meta.freelist_page
            );
        } else {
            let page = store.read_page(META_PAGE_ID)?;
            store.meta = Metadata::from_page(&page);

            let freelist_page = store.meta.freelist_page;
            let page = store.read_page(freelist_page)?;
            store.freelist = Freelist::from_page(&page).map_err(|source| StoreError::Freelist {
                page_id: freelist_page,
                source,
            })?;
            tracing::info!(
                "Opened store at {} (page_size={}, root={}, max_page={})",
                path.display(),
                config.page_size,
                store.meta.root,
                store.freelist.max_page()
            );
        }

        Ok(store)
    }

    /// Flush the freelist and metadata, sync, and close the file.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()?;
        tracing::debug!(
            "Closed store at {} (reads={}, writes={})",
            self.path.display(),
            self.stats.page_reads,
            self.stats.page_writes
        );
        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.config.page_size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.meta
    }

    #[must_use]
    pub const fn freelist(&self) -> &Freelist {
        &self.freelist
    }

    /// Mutable access to the allocator. Changes reach disk on the next
    /// `write_freelist`, `flush` or `close`.
    pub const fn freelist_mut(&mut self) -> &mut Freelist {
        &mut self.freelist
    }

    #[must_use]
    pub const fn io_stats(&self) -> IoStats {
        self.stats
    }

    /// Root page of the tree, 0 when empty.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.meta.root
    }

    /// Point the metadata at a new root and persist it.
    pub fn set_root(&mut self, root: PageId) -> Result<(), StoreError> {
        self.meta.root = root;
        self.write_metadata()
    }

    /// A collection over the tree rooted at the persisted root page.
    pub fn collection(&mut self, name: impl Into<Vec<u8>>) -> Collection<'_> {
        let root = self.meta.root;
        Collection::new(name, root, self)
    }

    /// Get a zero-filled page buffer.
    #[must_use]
    pub fn allocate_empty_page(&self) -> Page {
        Page::new(self.config.page_size)
    }

    const fn offset_of(&self, page_id: PageId) -> Result<u64, StoreError> {
        match page_id.checked_mul(self.config.page_size as u64) {
            Some(offset) => Ok(offset),
            None => Err(StoreError::PageOutOfRange { page_id }),
        }
    }

    /// Read a page from the file.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        let offset = self.offset_of(page_id)?;
        let mut page = self.allocate_empty_page();

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(page.as_bytes_mut()))
            .map_err(|source| StoreError::Io {
                operation: "read",
                page_id,
                offset,
                source,
            })?;

        self.stats.page_reads += 1;
        tracing::trace!("read page {page_id}");
        Ok(page)
    }

    /// Write a page to the file.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        let offset = self.offset_of(page_id)?;

        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(page.as_bytes()))
            .map_err(|source| StoreError::Io {
                operation: "write",
                page_id,
                offset,
                source,
            })?;

        self.stats.page_writes += 1;
        tracing::trace!("wrote page {page_id}");
        Ok(())
    }

    /// Write the metadata to page 0.
    pub fn write_metadata(&mut self) -> Result<(), StoreError> {
        let mut page = self.allocate_empty_page();
        self.meta.write_to_page(&mut page);
        self.write_page(META_PAGE_ID, &page)
    }

    /// Write the freelist to its page.
    pub fn write_freelist(&mut self) -> Result<(), StoreError> {
        let page_id = self.meta.freelist_page;
        let mut page = self.allocate_empty_page();
        self.freelist
            .write_to_page(&mut page)
            .map_err(|source| StoreError::Freelist { page_id, source })?;
        self.write_page(page_id, &page)
    }

    /// Persist the freelist and metadata and sync the file.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.write_freelist()?;
        self.write_metadata()?;
        self.sync()
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.file.sync_all().map_err(|source| StoreError::Io {
            operation: "sync",
            page_id: META_PAGE_ID,
            offset: 0,
            source,
        })
    }

    /// Read and decode the node stored at `page_id`.
    pub fn get_node(&mut self, page_id: PageId) -> Result<Node, StoreError> {
        let page = self.read_page(page_id)?;
        let mut node =
            Node::from_page(&page).map_err(|source| StoreError::Node { page_id, source })?;
        node.page_id = page_id;
        Ok(node)
    }

    /// Encode and write `node`, assigning it a page first if it has none.
    ///
    /// Returns the page the node was written to.
    pub fn write_node(&mut self, node: &mut Node) -> Result<PageId, StoreError> {
        let mut page = self.allocate_empty_page();
        node.write_to_page(&mut page)
            .map_err(|source| StoreError::Node {
                page_id: node.page_id,
                source,
            })?;

        if node.page_id == 0 {
            node.page_id = self.freelist.next_page();
        }
        let page_id = node.page_id;
        self.write_page(page_id, &page)?;
        Ok(page_id)
    }

    /// Release a node's page back to the freelist. The page is not cleared.
    pub fn delete_node(&mut self, page_id: PageId) {
        self.freelist.release(page_id);
    }

    /// Size above which a node is over-populated.
    #[must_use]
    pub fn max_threshold(&self) -> f64 {
        self.config.max_threshold()
    }

    /// Size below which a node is under-populated.
    #[must_use]
    pub fn min_threshold(&self) -> f64 {
        self.config.min_threshold()
    }

    #[must_use]
    pub fn is_over_populated(&self, node: &Node) -> bool {
        node.size() as f64 > self.max_threshold()
    }

    #[must_use]
    pub fn is_under_populated(&self, node: &Node) -> bool {
        (node.size() as f64) < self.min_threshold()
    }

    /// Whether the node holds enough to give up an item and stay above the
    /// minimum threshold.
    #[must_use]
    pub fn can_spare_element(&self, node: &Node) -> bool {
        self.split_index(node).is_some()
    }

    /// Index of the item to promote when splitting `node`.
    ///
    /// Accumulates element sizes front to back and returns `i + 1` for the
    /// first `i` that pushes the total past the minimum threshold, unless `i`
    /// is the last item. Returns `None` if no such index exists.
    #[must_use]
    pub fn split_index(&self, node: &Node) -> Option<usize> {
        let threshold = self.min_threshold();
        let last = node.items.len().checked_sub(1)?;

        let mut size = NODE_HEADER_SIZE + PAGE_ID_SIZE;
        for i in 0..last {
            size += node.element_size(i);
            if size as f64 > threshold {
                return Some(i + 1);
            }
        }
        None
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("meta", &self.meta)
            .field("max_page", &self.freelist.max_page())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The file could not be opened or created.
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A page read, write or sync failed.
    Io {
        operation: &'static str,
        page_id: PageId,
        offset: u64,
        source: std::io::Error,
    },
    /// The page's byte offset does not fit in a `u64`.
    PageOutOfRange { page_id: PageId },
    /// Invalid configuration.
    Config(ConfigError),
    /// The freelist page could not be encoded or decoded.
    Freelist {
        page_id: PageId,
        source: FreelistError,
    },
    /// A node page could not be encoded or decoded.
    Node { page_id: PageId, source: NodeError },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "could not open {}: {source}", path.display())
            }
            Self::Io {
                operation,
                page_id,
                offset,
                source,
            } => write!(
                f,
                "failed to {operation} page {page_id} at offset {offset}: {source}"
            ),
            Self::PageOutOfRange { page_id } => {
                write!(f, "page {page_id} is beyond the addressable file size")
            }
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Freelist { page_id, source } => {
                write!(f, "freelist error on page {page_id}: {source}")
            }
            Self::Node { page_id, source } => write!(f, "node error on page {page_id}: {source}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Io { source, .. } => Some(source),
            Self::Config(e) => Some(e),
            Self::Freelist { source, .. } => Some(source),
            Self::Node { source, .. } => Some(source),
            Self::PageOutOfRange { .. } => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::Item;
    use crate::storage::freelist::freelist_capacity;
    use crate::testing::{split_config, test_path};
    use std::fs;

    #[test]
    fn test_create_and_reopen() {
        let (_dir, path) = test_path();

        {
            let store = Store::open(&path, StoreConfig::new()).expect("create store");
            assert_eq!(store.metadata().freelist_page, 1);
            assert_eq!(store.root(), 0);
            assert_eq!(store.freelist().max_page(), 1);
            assert_eq!(store.io_stats().page_writes, 2);
            store.close().expect("close");
        }

        let len = fs::metadata(&path).expect("stat").len();
        assert_eq!(len, 2 * 8192);

        {
            let store = Store::open(&path, StoreConfig::new()).expect("open store");
            assert_eq!(store.metadata().freelist_page, 1);
            assert_eq!(store.freelist().max_page(), 1);
        }
    }

    #[test]
    fn test_empty_existing_file_is_initialized() {
        let (_dir, path) = test_path();
        fs::write(&path, b"").expect("write file");

        let store = Store::open(&path, StoreConfig::new()).expect("open store");
        assert_eq!(store.metadata().freelist_page, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (_dir, path) = test_path();
        let config = StoreConfig::new().with_page_size(100);

        let result = Store::open(&path, config);
        assert!(matches!(result, Err(StoreError::Config(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_freelist_survives_reopen() {
        let (_dir, path) = test_path();

        // Allocate page 2 and commit the freelist
        {
            let mut store = Store::open(&path, StoreConfig::new()).expect("create store");
            let page_id = store.freelist_mut().next_page();
            assert_eq!(page_id, 2);

            let mut page = store.allocate_empty_page();
            page.write_bytes(0, b"data");
            store.write_page(page_id, &page).expect("write page");
            store.write_freelist().expect("write freelist");
        }

        // The next page must be 3, not an overwrite of page 2
        {
            let mut store = Store::open(&path, StoreConfig::new()).expect("open store");
            let page_id = store.freelist_mut().next_page();
            assert_eq!(page_id, 3);

            let released = store.freelist_mut().next_page();
            store.delete_node(released);
            store.close().expect("close");
        }

        {
            let store = Store::open(&path, StoreConfig::new()).expect("open store");
            assert_eq!(store.freelist().max_page(), 4);
            assert_eq!(store.freelist().released_pages(), &[4]);
        }
    }

    #[test]
    fn test_page_data_persistence() {
        let (_dir, path) = test_path();

        {
            let mut store = Store::open(&path, StoreConfig::new()).expect("create store");
            let mut page = store.allocate_empty_page();
            page.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
            store.write_page(5, &page).expect("write");
            store.sync().expect("sync");
        }

        {
            let mut store = Store::open(&path, StoreConfig::new()).expect("open store");
            let page = store.read_page(5).expect("read");
            assert_eq!(page.read_u64(100), 0xDEAD_BEEF_CAFE_BABE);
        }
    }

    #[test]
    fn test_read_past_end_reports_context() {
        let (_dir, path) = test_path();
        let mut store = Store::open(&path, StoreConfig::new()).expect("create store");

        let err = store.read_page(100).expect_err("should fail");
        assert!(matches!(
            err,
            StoreError::Io {
                operation: "read",
                page_id: 100,
                offset: 819_200,
                ..
            }
        ));
        assert!(err.to_string().contains("page 100"));
    }

    #[test]
    fn test_huge_page_id_is_out_of_range() {
        let (_dir, path) = test_path();
        let mut store = Store::open(&path, StoreConfig::new()).expect("create store");
        let page_id = u64::MAX / 2;

        let err = store.read_page(page_id).expect_err("should fail");
        assert!(matches!(err, StoreError::PageOutOfRange { page_id: id } if id == page_id));

        let page = store.allocate_empty_page();
        let err = store.write_page(page_id, &page).expect_err("should fail");
        assert!(matches!(err, StoreError::PageOutOfRange { .. }));

        let err = store.get_node(page_id).expect_err("should fail");
        assert!(err.to_string().contains(&page_id.to_string()));
        assert_eq!(
            store.io_stats(),
            IoStats {
                page_reads: 0,
                page_writes: 2,
            }
        );
    }

    #[test]
    fn test_freelist_overflow_fails_flush_and_close() {
        let (_dir, path) = test_path();
        let mut store = Store::open(&path, split_config()).expect("create store");

        let capacity = freelist_capacity(store.page_size());
        for page_id in 0..=capacity as PageId {
            store.delete_node(100 + page_id);
        }

        let err = store.flush().expect_err("should fail");
        assert!(matches!(
            err,
            StoreError::Freelist {
                page_id: 1,
                source: FreelistError::Overflow { released, capacity: c },
            } if released == capacity + 1 && c == capacity
        ));

        let err = store.close().expect_err("should fail");
        assert!(matches!(err, StoreError::Freelist { .. }));
    }

    #[test]
    fn test_write_node_assigns_then_reuses_page() {
        let (_dir, path) = test_path();
        let mut store = Store::open(&path, StoreConfig::new()).expect("create store");

        let mut node = Node::with_items(vec![Item::new(*b"a", *b"1")], Vec::new());
        let page_id = store.write_node(&mut node).expect("write node");
        assert_eq!(page_id, 2);
        assert_eq!(node.page_id, 2);

        node.items[0].value = b"2".to_vec();
        assert_eq!(store.write_node(&mut node).expect("rewrite node"), 2);
        assert_eq!(store.freelist().max_page(), 2);

        let restored = store.get_node(2).expect("get node");
        assert_eq!(restored.page_id, 2);
        assert_eq!(restored.items[0].value, b"2");
    }

    #[test]
    fn test_deleted_node_page_is_reused() {
        let (_dir, path) = test_path();
        let mut store = Store::open(&path, StoreConfig::new()).expect("create store");

        let mut first = Node::new();
        let mut second = Node::new();
        store.write_node(&mut first).expect("write first");
        store.write_node(&mut second).expect("write second");

        store.delete_node(first.page_id);

        let mut third = Node::new();
        store.write_node(&mut third).expect("write third");
        assert_eq!(third.page_id, first.page_id);
    }

    #[test]
    fn test_population_thresholds() {
        let (_dir, path) = test_path();
        let store = Store::open(&path, split_config()).expect("create store");

        // size = 11 + 22 * n against thresholds of 51.2 and 102.4
        let node = |n: usize| {
            Node::with_items(
                (0..n)
                    .map(|i| Item::new(format!("Key{i}"), format!("Value{i}")))
                    .collect(),
                Vec::new(),
            )
        };

        assert!(store.is_under_populated(&node(1)));
        assert!(!store.is_under_populated(&node(2)));
        assert!(!store.is_over_populated(&node(4)));
        assert!(store.is_over_populated(&node(5)));

        assert_eq!(store.split_index(&node(0)), None);
        assert_eq!(store.split_index(&node(1)), None);
        assert_eq!(store.split_index(&node(2)), None);
        assert_eq!(store.split_index(&node(3)), Some(2));
        assert_eq!(store.split_index(&node(5)), Some(2));

        assert!(!store.can_spare_element(&node(2)));
        assert!(store.can_spare_element(&node(3)));
    }

    #[test]
    fn test_oversized_node_is_reported() {
        let (_dir, path) = test_path();
        let config = StoreConfig::new()
            .with_page_size(2048)
            .with_fill_percents(0.1, 0.2);
        let mut store = Store::open(&path, config).expect("create store");

        let items = (0..20u8)
            .map(|i| Item::new(vec![i; 100], vec![i; 100]))
            .collect();
        let mut node = Node::with_items(items, Vec::new());

        let result = store.write_node(&mut node);
        assert!(matches!(
            result,
            Err(StoreError::Node {
                source: NodeError::Overflow { .. },
                ..
            })
        ));
    }
}
