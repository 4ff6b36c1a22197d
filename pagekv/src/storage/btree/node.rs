//! B-tree node types and serialization.
//!
//! A node is stored in exactly one page:
//!
//! - `is_leaf`: 1 byte (1 = leaf, 0 = internal)
//! - `item_count`: 2 bytes
//! - per item: an 8-byte child page id (internal nodes only) followed by the
//!   2-byte offset of the item's cell
//! - trailing 8-byte child page id (internal nodes only)
//! - cells, packed backward from the end of the page. Read forward from its
//!   offset a cell is `[key_len: u8][key][value_len: u8][value]`.
//!
//! The final byte of the page is never written, matching files produced by
//! earlier versions of the format.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_ID_SIZE, Page, PageId};

/// Size of the node header: leaf flag + item count.
pub const NODE_HEADER_SIZE: usize = 3;

/// Size of a cell offset in the header area.
const OFFSET_SIZE: usize = 2;

/// Size of the key and value length prefixes.
const LENGTH_PREFIX_SIZE: usize = 1;

/// Unused byte at the very end of every node page.
const TRAILING_PAD: usize = 1;

/// Largest key a cell can hold.
pub const MAX_KEY_SIZE: usize = u8::MAX as usize;

/// Largest value a cell can hold.
pub const MAX_VALUE_SIZE: usize = u8::MAX as usize;

/// Largest value `Node::element_size` can return.
pub const MAX_ELEMENT_SIZE: usize =
    MAX_KEY_SIZE + MAX_VALUE_SIZE + 2 * LENGTH_PREFIX_SIZE + OFFSET_SIZE + PAGE_ID_SIZE;

/// A key-value pair stored in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Item {
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A decoded B-tree page.
///
/// Leaves have no children. Internal nodes have `items.len() + 1` children,
/// where `children[i]` leads to keys between `items[i - 1]` and `items[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Page this node lives in, 0 until it is first written.
    pub page_id: PageId,
    /// Items in ascending key order.
    pub items: Vec<Item>,
    /// Child page ids, empty for leaves.
    pub children: Vec<PageId>,
}

impl Node {
    /// Create an empty, unwritten leaf.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            page_id: 0,
            items: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an unwritten node from items and children.
    #[must_use]
    pub const fn with_items(items: Vec<Item>, children: Vec<PageId>) -> Self {
        Self {
            page_id: 0,
            items,
            children,
        }
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Size charged for the item at `index` when deciding on splits: the
    /// key and value, their length prefixes, the cell offset and one child
    /// slot.
    #[must_use]
    pub fn element_size(&self, index: usize) -> usize {
        let item = &self.items[index];
        item.key.len() + item.value.len() + 2 * LENGTH_PREFIX_SIZE + OFFSET_SIZE + PAGE_ID_SIZE
    }

    /// Size charged for the whole node when comparing against fill thresholds.
    #[must_use]
    pub fn size(&self) -> usize {
        let elements: usize = (0..self.items.len()).map(|i| self.element_size(i)).sum();
        NODE_HEADER_SIZE + elements + PAGE_ID_SIZE
    }

    /// Exact number of page bytes the encoding occupies.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let child_size = if self.is_leaf() { 0 } else { PAGE_ID_SIZE };
        let cells: usize = self
            .items
            .iter()
            .map(|item| {
                child_size
                    + OFFSET_SIZE
                    + 2 * LENGTH_PREFIX_SIZE
                    + item.key.len()
                    + item.value.len()
            })
            .sum();
        NODE_HEADER_SIZE + cells + child_size + TRAILING_PAD
    }

    /// Find `key` among this node's items.
    ///
    /// Returns `Ok(index)` on an exact match, otherwise `Err(index)` of the
    /// first item whose key is greater (the insertion point).
    pub fn find_key_in_node(&self, key: &[u8]) -> Result<usize, usize> {
        self.items
            .binary_search_by(|item| item.key.as_slice().cmp(key))
    }

    /// Insert `item` at `index`, shifting later items right.
    pub fn add_item(&mut self, item: Item, index: usize) {
        self.items.insert(index, item);
    }

    /// Split the node around the item at `index`.
    ///
    /// Returns the middle item and a new unwritten sibling holding everything
    /// after it. This node keeps the items before `index` and, when internal,
    /// the children up to and including the middle boundary.
    #[must_use]
    pub fn split(&mut self, index: usize) -> (Item, Self) {
        let is_leaf = self.is_leaf();

        let sibling_items = self.items.split_off(index + 1);
        let sibling_children = if is_leaf {
            Vec::new()
        } else {
            self.children.split_off(index + 1)
        };
        let middle = self.items.remove(index);

        (middle, Self::with_items(sibling_items, sibling_children))
    }

    /// Encode the node into `page`.
    pub fn write_to_page(&self, page: &mut Page) -> Result<(), NodeError> {
        let is_leaf = self.is_leaf();
        if !is_leaf && self.children.len() != self.items.len() + 1 {
            return Err(NodeError::ChildCount {
                items: self.items.len(),
                children: self.children.len(),
            });
        }
        if let Some(item) = self
            .items
            .iter()
            .find(|item| item.key.len() > MAX_KEY_SIZE || item.value.len() > MAX_VALUE_SIZE)
        {
            return Err(NodeError::ItemTooLarge {
                key_len: item.key.len(),
                value_len: item.value.len(),
            });
        }
        let size = self.encoded_len();
        if size > page.len() {
            return Err(NodeError::Overflow {
                size,
                page_size: page.len(),
            });
        }

        let mut left = 0;
        let mut right = page.len() - TRAILING_PAD;

        page.write_u8(left, u8::from(is_leaf));
        left += 1;
        page.write_u16(left, self.items.len() as u16);
        left += 2;

        for (i, item) in self.items.iter().enumerate() {
            if !is_leaf {
                page.write_u64(left, self.children[i]);
                left += PAGE_ID_SIZE;
            }

            let key_len = item.key.len();
            right -= key_len + item.value.len() + 2 * LENGTH_PREFIX_SIZE;
            page.write_u16(left, right as u16);
            left += OFFSET_SIZE;

            let mut cell = right;
            page.write_u8(cell, key_len as u8);
            cell += LENGTH_PREFIX_SIZE;
            page.write_bytes(cell, &item.key);
            cell += key_len;
            page.write_u8(cell, item.value.len() as u8);
            cell += LENGTH_PREFIX_SIZE;
            page.write_bytes(cell, &item.value);
        }

        if !is_leaf {
            page.write_u64(left, self.children[self.items.len()]);
        }
        Ok(())
    }

    /// Decode a node from `page`. The returned node has page id 0; the
    /// caller stamps the id it read from.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let header = read_checked(page, 0, NODE_HEADER_SIZE)?;
        let is_leaf = header[0] != 0;
        let item_count = usize::from(u16::from_le_bytes([header[1], header[2]]));

        let mut items = Vec::with_capacity(item_count);
        let mut children = Vec::new();
        let mut offset = NODE_HEADER_SIZE;

        for _ in 0..item_count {
            if !is_leaf {
                children.push(read_u64_checked(page, offset)?);
                offset += PAGE_ID_SIZE;
            }
            let cell = read_checked(page, offset, OFFSET_SIZE)?;
            let cell_offset = usize::from(u16::from_le_bytes([cell[0], cell[1]]));
            offset += OFFSET_SIZE;

            items.push(read_cell(page, cell_offset)?);
        }

        if !is_leaf {
            children.push(read_u64_checked(page, offset)?);
        }

        Ok(Self::with_items(items, children))
    }
}

fn read_checked(page: &Page, offset: usize, len: usize) -> Result<&[u8], NodeError> {
    page.get_bytes(offset, len)
        .ok_or(NodeError::Malformed { offset })
}

fn read_u64_checked(page: &Page, offset: usize) -> Result<PageId, NodeError> {
    let bytes = read_checked(page, offset, PAGE_ID_SIZE)?;
    let mut buf = [0u8; PAGE_ID_SIZE];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

fn read_cell(page: &Page, mut offset: usize) -> Result<Item, NodeError> {
    let key_len = usize::from(read_checked(page, offset, LENGTH_PREFIX_SIZE)?[0]);
    offset += LENGTH_PREFIX_SIZE;
    let key = read_checked(page, offset, key_len)?.to_vec();
    offset += key_len;

    let value_len = usize::from(read_checked(page, offset, LENGTH_PREFIX_SIZE)?[0]);
    offset += LENGTH_PREFIX_SIZE;
    let value = read_checked(page, offset, value_len)?.to_vec();

    Ok(Item { key, value })
}

/// Errors that can occur when encoding or decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A header field or cell runs past the end of the page.
    Malformed { offset: usize },
    /// The encoded node does not fit in one page.
    Overflow { size: usize, page_size: usize },
    /// A key or value exceeds its 1-byte length prefix.
    ItemTooLarge { key_len: usize, value_len: usize },
    /// An internal node whose child count is not `items + 1`.
    ChildCount { items: usize, children: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { offset } => write!(f, "malformed node at byte {offset}"),
            Self::Overflow { size, page_size } => {
                write!(f, "node needs {size} bytes but a page holds {page_size}")
            }
            Self::ItemTooLarge { key_len, value_len } => write!(
                f,
                "item too large: key {key_len} bytes (max {MAX_KEY_SIZE}), value {value_len} bytes (max {MAX_VALUE_SIZE})"
            ),
            Self::ChildCount { items, children } => write!(
                f,
                "internal node with {items} items has {children} children"
            ),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[&str]) -> Node {
        Node::with_items(
            keys.iter()
                .map(|k| Item::new(k.as_bytes(), format!("v-{k}")))
                .collect(),
            Vec::new(),
        )
    }

    #[test]
    fn test_leaf_node_roundtrip() {
        let node = leaf(&["apple", "banana", "cherry"]);

        let mut page = Page::new(1024);
        node.write_to_page(&mut page).expect("should encode");

        let restored = Node::from_page(&page).expect("should parse");
        assert!(restored.is_leaf());
        assert_eq!(restored.items, node.items);
        assert!(restored.children.is_empty());
    }

    #[test]
    fn test_internal_node_roundtrip() {
        let mut node = leaf(&["b", "d", "f"]);
        node.children = vec![10, 20, 30, 40];

        let mut page = Page::new(1024);
        node.write_to_page(&mut page).expect("should encode");

        let restored = Node::from_page(&page).expect("should parse");
        assert!(!restored.is_leaf());
        assert_eq!(restored.items, node.items);
        assert_eq!(restored.children, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_empty_internal_node_roundtrip() {
        let node = Node::with_items(Vec::new(), vec![7]);

        let mut page = Page::new(1024);
        node.write_to_page(&mut page).expect("should encode");

        let restored = Node::from_page(&page).expect("should parse");
        assert!(restored.items.is_empty());
        assert_eq!(restored.children, vec![7]);
    }

    #[test]
    fn test_leaf_byte_layout() {
        let node = Node::with_items(vec![Item::new(*b"a", *b"bc")], Vec::new());

        let mut page = Page::new(1024);
        node.write_to_page(&mut page).expect("should encode");

        // Header: leaf flag, count, one cell offset
        assert_eq!(page.read_u8(0), 1);
        assert_eq!(page.read_u16(1), 1);
        let cell = usize::from(page.read_u16(3));
        assert_eq!(cell, 1024 - 1 - 5);

        // Cell: key_len, key, value_len, value; last byte untouched
        assert_eq!(page.read_bytes(cell, 5), &[1, b'a', 2, b'b', b'c']);
        assert_eq!(page.read_u8(1023), 0);
    }

    #[test]
    fn test_internal_byte_layout() {
        let node = Node::with_items(vec![Item::new(*b"k", *b"v")], vec![3, 9]);

        let mut page = Page::new(1024);
        node.write_to_page(&mut page).expect("should encode");

        assert_eq!(page.read_u8(0), 0);
        assert_eq!(page.read_u16(1), 1);
        assert_eq!(page.read_u64(3), 3);
        let cell = usize::from(page.read_u16(11));
        assert_eq!(page.read_u64(13), 9);
        assert_eq!(page.read_bytes(cell, 4), &[1, b'k', 1, b'v']);
    }

    #[test]
    fn test_find_key_in_node() {
        let node = leaf(&["b", "d", "f"]);

        assert_eq!(node.find_key_in_node(b"a"), Err(0));
        assert_eq!(node.find_key_in_node(b"b"), Ok(0));
        assert_eq!(node.find_key_in_node(b"c"), Err(1));
        assert_eq!(node.find_key_in_node(b"f"), Ok(2));
        assert_eq!(node.find_key_in_node(b"g"), Err(3));
        assert_eq!(Node::new().find_key_in_node(b"a"), Err(0));
    }

    #[test]
    fn test_add_item_keeps_order() {
        let mut node = leaf(&["a", "c"]);
        let index = node.find_key_in_node(b"b").expect_err("should be absent");
        node.add_item(Item::new(*b"b", *b"x"), index);

        let keys: Vec<&[u8]> = node.items.iter().map(|i| i.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c"]);
    }

    #[test]
    fn test_leaf_split() {
        let mut node = leaf(&["a", "b", "c", "d", "e"]);

        let (middle, sibling) = node.split(2);

        assert_eq!(middle.key, b"c");
        assert_eq!(node.items.len(), 2);
        assert_eq!(sibling.items.len(), 2);
        assert_eq!(sibling.items[0].key, b"d");
        assert!(sibling.is_leaf());
        assert_eq!(sibling.page_id, 0);
    }

    #[test]
    fn test_internal_split() {
        let mut node = leaf(&["a", "b", "c", "d", "e"]);
        node.children = vec![1, 2, 3, 4, 5, 6];

        let (middle, sibling) = node.split(2);

        assert_eq!(middle.key, b"c");
        assert_eq!(node.children, vec![1, 2, 3]);
        assert_eq!(sibling.children, vec![4, 5, 6]);
        assert_eq!(node.children.len(), node.items.len() + 1);
        assert_eq!(sibling.children.len(), sibling.items.len() + 1);
    }

    #[test]
    fn test_sizes() {
        let node = Node::with_items(vec![Item::new(*b"Key1", *b"Value1")], Vec::new());
        assert_eq!(node.element_size(0), 4 + 6 + 2 + 2 + 8);
        assert_eq!(node.size(), NODE_HEADER_SIZE + 22 + PAGE_ID_SIZE);
        assert_eq!(node.encoded_len(), NODE_HEADER_SIZE + 2 + 2 + 10 + 1);
        assert!(node.encoded_len() <= node.size());
    }

    #[test]
    fn test_overflow_is_rejected() {
        let items = (0..10u8)
            .map(|i| Item::new(vec![i; 200], vec![i; 200]))
            .collect();
        let node = Node::with_items(items, Vec::new());

        let mut page = Page::new(1024);
        let result = node.write_to_page(&mut page);
        assert!(matches!(result, Err(NodeError::Overflow { .. })));
    }

    #[test]
    fn test_oversized_item_is_rejected() {
        let node = Node::with_items(vec![Item::new(vec![0u8; 256], *b"v")], Vec::new());

        let mut page = Page::new(4096);
        let result = node.write_to_page(&mut page);
        assert!(matches!(result, Err(NodeError::ItemTooLarge { key_len: 256, .. })));
    }

    #[test]
    fn test_malformed_cell_is_reported() {
        let mut page = Page::new(1024);
        page.write_u8(0, 1);
        page.write_u16(1, 1);
        page.write_u16(3, 1023);
        page.write_u8(1023, 200);

        let result = Node::from_page(&page);
        assert!(matches!(result, Err(NodeError::Malformed { .. })));
    }
}
