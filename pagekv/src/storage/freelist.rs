//! Page allocator backed by a high-water mark and a stack of released pages.
//!
//! The freelist lives in a single page whose id is recorded in the metadata.
//!
//! Layout:
//! - `max_page`: 8 bytes
//! - `released_count`: 2 bytes
//! - `released_count` page ids, 8 bytes each
//!
//! Older files stored `max_page` in 2 bytes, which silently truncated once a
//! file grew past 65 535 pages. It is 8 bytes wide here, so those files are
//! not readable by this format.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_ID_SIZE, Page, PageId};

/// Offset of `max_page`.
const MAX_PAGE_OFFSET: usize = 0;

/// Offset of the released page count.
const RELEASED_COUNT_OFFSET: usize = 8;

/// Size of the fixed part of a freelist page.
pub const FREELIST_HEADER_SIZE: usize = 10;

/// Number of released page ids one freelist page can hold.
#[must_use]
pub fn freelist_capacity(page_size: usize) -> usize {
    let slots = page_size.saturating_sub(FREELIST_HEADER_SIZE) / PAGE_ID_SIZE;
    slots.min(usize::from(u16::MAX))
}

/// Tracks which pages of the file are in use and which can be reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Freelist {
    /// Highest page ever handed out. `max_page * page_size` is the file size.
    max_page: PageId,
    /// Pages that were allocated and later released, most recent last.
    released_pages: Vec<PageId>,
}

impl Freelist {
    /// Create an empty freelist for a fresh file.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_page: 0,
            released_pages: Vec::new(),
        }
    }

    /// Hand out a page id.
    ///
    /// The most recently released page is reused first; otherwise the
    /// high-water mark grows by one. Page 0 is never returned.
    pub fn next_page(&mut self) -> PageId {
        if let Some(page_id) = self.released_pages.pop() {
            return page_id;
        }
        self.max_page += 1;
        self.max_page
    }

    /// Return a page to the freelist. Callers must not release a page twice.
    pub fn release(&mut self, page_id: PageId) {
        self.released_pages.push(page_id);
    }

    #[must_use]
    pub const fn max_page(&self) -> PageId {
        self.max_page
    }

    #[must_use]
    pub fn released_pages(&self) -> &[PageId] {
        &self.released_pages
    }

    /// Serialize into `page`.
    pub fn write_to_page(&self, page: &mut Page) -> Result<(), FreelistError> {
        let capacity = freelist_capacity(page.len());
        if self.released_pages.len() > capacity {
            return Err(FreelistError::Overflow {
                released: self.released_pages.len(),
                capacity,
            });
        }

        page.write_u64(MAX_PAGE_OFFSET, self.max_page);
        page.write_u16(RELEASED_COUNT_OFFSET, self.released_pages.len() as u16);

        let mut offset = FREELIST_HEADER_SIZE;
        for &page_id in &self.released_pages {
            page.write_u64(offset, page_id);
            offset += PAGE_ID_SIZE;
        }
        Ok(())
    }

    /// Deserialize from `page`.
    pub fn from_page(page: &Page) -> Result<Self, FreelistError> {
        let capacity = freelist_capacity(page.len());
        let max_page = page.read_u64(MAX_PAGE_OFFSET);
        let count = usize::from(page.read_u16(RELEASED_COUNT_OFFSET));
        if count > capacity {
            return Err(FreelistError::Truncated { count, capacity });
        }

        let released_pages = (0..count)
            .map(|i| page.read_u64(FREELIST_HEADER_SIZE + i * PAGE_ID_SIZE))
            .collect();

        Ok(Self {
            max_page,
            released_pages,
        })
    }
}

/// Errors that can occur when persisting or loading the freelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreelistError {
    /// More released pages than one freelist page can hold.
    Overflow { released: usize, capacity: usize },
    /// The stored released count runs past the end of the page.
    Truncated { count: usize, capacity: usize },
}

impl std::fmt::Display for FreelistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow { released, capacity } => write!(
                f,
                "freelist holds {released} released pages but a page fits {capacity}"
            ),
            Self::Truncated { count, capacity } => write!(
                f,
                "freelist page claims {count} released pages but fits {capacity}"
            ),
        }
    }
}

impl std::error::Error for FreelistError {}
