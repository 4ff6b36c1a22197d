//! Store metadata.
//!
//! The metadata record occupies page 0 and points at the tree root and at the
//! page holding the freelist.

use crate::storage::page::{Page, PageId};

/// Metadata field offsets.
mod offsets {
    pub const ROOT: usize = 0;
    pub const FREELIST_PAGE: usize = 8;
}

/// Root pointer and freelist location, persisted at page 0.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Root page of the tree, 0 when the tree is empty.
    pub root: PageId,
    /// Page holding the serialized freelist.
    pub freelist_page: PageId,
}

impl Metadata {
    /// Create empty metadata for a fresh file.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: 0,
            freelist_page: 0,
        }
    }

    /// Serialize into `page`.
    pub fn write_to_page(&self, page: &mut Page) {
        page.write_u64(offsets::ROOT, self.root);
        page.write_u64(offsets::FREELIST_PAGE, self.freelist_page);
    }

    /// Deserialize from `page`.
    #[must_use]
    pub fn from_page(page: &Page) -> Self {
        Self {
            root: page.read_u64(offsets::ROOT),
            freelist_page: page.read_u64(offsets::FREELIST_PAGE),
        }
    }
}
