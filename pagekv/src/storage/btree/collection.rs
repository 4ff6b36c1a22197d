//! Tree-level API over a page store.
//!
//! A collection is bound to a root page. Lookups walk from the root down,
//! decoding one page per level. Inserts land where the search ends; any node
//! that grows past the store's maximum threshold is split, and the split is
//! propagated up the recorded ancestor path. The tree only grows in height
//! when the root itself splits.

use crate::storage::btree::node::{Item, MAX_KEY_SIZE, MAX_VALUE_SIZE, Node};
use crate::storage::page::PageId;
use crate::storage::store::{Store, StoreError};

/// A B-tree rooted at `root`, stored in `store`.
pub struct Collection<'a> {
    name: Vec<u8>,
    root: PageId,
    store: &'a mut Store,
}

/// Where a search ended.
struct KeyLocation {
    /// Index of the key in `node`, or where it would be inserted.
    index: usize,
    node: Node,
    /// Child indexes taken from the root, starting with 0 for the root itself.
    path: Vec<usize>,
    found: bool,
}

impl<'a> Collection<'a> {
    /// Bind a collection to `root`. A root of 0 is an empty tree.
    pub fn new(name: impl Into<Vec<u8>>, root: PageId, store: &'a mut Store) -> Self {
        Self {
            name: name.into(),
            root,
            store,
        }
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Get the root page ID.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.root
    }

    /// Look up `key`.
    ///
    /// Returns `Ok(None)` when the key is absent. An empty tree is answered
    /// without any I/O.
    pub fn find(&mut self, key: &[u8]) -> Result<Option<Item>, CollectionError> {
        if self.root == 0 {
            return Ok(None);
        }

        let root = self.store.get_node(self.root)?;
        let KeyLocation {
            index,
            mut node,
            found,
            ..
        } = self.find_key(root, key)?;
        Ok(found.then(|| node.items.swap_remove(index)))
    }

    /// Insert `key` with `value`, replacing the value if the key exists.
    pub fn put(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<(), CollectionError> {
        let item = Item::new(key, value);
        if item.key.len() > MAX_KEY_SIZE {
            return Err(CollectionError::KeyTooLarge(item.key.len()));
        }
        if item.value.len() > MAX_VALUE_SIZE {
            return Err(CollectionError::ValueTooLarge(item.value.len()));
        }

        // First insertion: the root does not exist yet
        if self.root == 0 {
            let mut root = Node::with_items(vec![item], Vec::new());
            let root_page = self.store.write_node(&mut root)?;
            return self.set_root(root_page);
        }

        let root = self.store.get_node(self.root)?;
        let KeyLocation {
            index,
            mut node,
            path,
            found,
        } = self.find_key(root, &item.key)?;

        if found {
            node.items[index] = item;
        } else {
            node.add_item(item, index);
        }
        self.store.write_node(&mut node)?;

        // Rebalance bottom-up, excluding the root
        let mut ancestors = self.resolve_path(&path)?;
        for i in (0..ancestors.len().saturating_sub(1)).rev() {
            let (upper, lower) = ancestors.split_at_mut(i + 1);
            let (parent, child) = (&mut upper[i], &mut lower[0]);

            if self.store.is_over_populated(child) {
                self.split(parent, child, path[i + 1])?;
            }
        }

        let old_root = &mut ancestors[0];
        if self.store.is_over_populated(old_root) {
            let mut new_root = Node::with_items(Vec::new(), vec![old_root.page_id]);
            if self.split(&mut new_root, old_root, 0)? {
                tracing::debug!(
                    "tree grew: root moved from page {} to page {}",
                    old_root.page_id,
                    new_root.page_id
                );
                self.set_root(new_root.page_id)?;
            }
        }

        Ok(())
    }

    /// All items in ascending key order.
    pub fn items(&mut self) -> Result<Vec<Item>, CollectionError> {
        let mut items = Vec::new();
        if self.root != 0 {
            let root = self.store.get_node(self.root)?;
            self.collect_items(root, &mut items)?;
        }
        Ok(items)
    }

    fn collect_items(&mut self, node: Node, out: &mut Vec<Item>) -> Result<(), CollectionError> {
        if node.is_leaf() {
            out.extend(node.items);
            return Ok(());
        }

        for (index, item) in node.items.iter().enumerate() {
            let child = self.child(&node, index)?;
            self.collect_items(child, out)?;
            out.push(item.clone());
        }
        let last = self.child(&node, node.items.len())?;
        self.collect_items(last, out)
    }

    /// Search the tree under `root` for `key`.
    ///
    /// Stops at the node holding `key`, or at the leaf position where it
    /// belongs when it is absent.
    fn find_key(&mut self, root: Node, key: &[u8]) -> Result<KeyLocation, CollectionError> {
        let mut path = vec![0];
        let (index, node, found) = self.locate_from(root, key, &mut path)?;
        Ok(KeyLocation {
            index,
            node,
            path,
            found,
        })
    }

    fn locate_from(
        &mut self,
        node: Node,
        key: &[u8],
        path: &mut Vec<usize>,
    ) -> Result<(usize, Node, bool), CollectionError> {
        let index = match node.find_key_in_node(key) {
            Ok(index) => return Ok((index, node, true)),
            Err(index) => index,
        };
        if node.is_leaf() {
            return Ok((index, node, false));
        }

        path.push(index);
        let child = self.child(&node, index)?;
        self.locate_from(child, key, path)
    }

    /// Re-read the nodes along `path`, root first.
    fn resolve_path(&mut self, path: &[usize]) -> Result<Vec<Node>, CollectionError> {
        let mut nodes = Vec::with_capacity(path.len());
        let mut node = self.store.get_node(self.root)?;

        for &index in path.iter().skip(1) {
            let child = self.child(&node, index)?;
            nodes.push(std::mem::replace(&mut node, child));
        }
        nodes.push(node);
        Ok(nodes)
    }

    fn child(&mut self, parent: &Node, index: usize) -> Result<Node, CollectionError> {
        let child = *parent
            .children
            .get(index)
            .ok_or(CollectionError::MissingChild {
                page_id: parent.page_id,
                index,
            })?;

        self.store
            .get_node(child)
            .map_err(|source| CollectionError::Traversal {
                parent: parent.page_id,
                child,
                source,
            })
    }

    /// Split an over-populated `child` of `parent`.
    ///
    /// The middle item moves up into `parent` at `child_index` and the items
    /// after it move to a new sibling page. Returns `false` if the child has
    /// no split point.
    fn split(
        &mut self,
        parent: &mut Node,
        child: &mut Node,
        child_index: usize,
    ) -> Result<bool, CollectionError> {
        let Some(split_index) = self.store.split_index(child) else {
            tracing::debug!(
                "page {} is over-populated but has no split point",
                child.page_id
            );
            return Ok(false);
        };

        let (middle, mut sibling) = child.split(split_index);
        let sibling_page = self.store.write_node(&mut sibling)?;

        parent.add_item(middle, child_index);
        parent.children.insert(child_index + 1, sibling_page);

        self.store.write_node(parent)?;
        self.store.write_node(child)?;

        tracing::debug!(
            "split page {} at item {split_index}: sibling page {sibling_page}, parent page {}",
            child.page_id,
            parent.page_id
        );
        Ok(true)
    }

    fn set_root(&mut self, root: PageId) -> Result<(), CollectionError> {
        self.root = root;
        self.store.set_root(root)?;
        Ok(())
    }
}

/// Errors that can occur during collection operations.
#[derive(Debug)]
pub enum CollectionError {
    /// Store error.
    Store(StoreError),
    /// A child page could not be read or decoded while walking the tree.
    Traversal {
        parent: PageId,
        child: PageId,
        source: StoreError,
    },
    /// A recorded child index does not exist in its parent.
    MissingChild { page_id: PageId, index: usize },
    /// Key longer than a cell can hold.
    KeyTooLarge(usize),
    /// Value longer than a cell can hold.
    ValueTooLarge(usize),
}

impl std::fmt::Display for CollectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Traversal {
                parent,
                child,
                source,
            } => write!(
                f,
                "could not load child page {child} of page {parent}: {source}"
            ),
            Self::MissingChild { page_id, index } => {
                write!(f, "page {page_id} has no child at index {index}")
            }
            Self::KeyTooLarge(len) => {
                write!(f, "key too large: {len} bytes (max {MAX_KEY_SIZE})")
            }
            Self::ValueTooLarge(len) => {
                write!(f, "value too large: {len} bytes (max {MAX_VALUE_SIZE})")
            }
        }
    }
}

impl std::error::Error for CollectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) | Self::Traversal { source: e, .. } => Some(e),
            Self::MissingChild { .. } | Self::KeyTooLarge(_) | Self::ValueTooLarge(_) => None,
        }
    }
}

impl From<StoreError> for CollectionError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
