//! Page types and constants for the storage engine.
//!
//! Pages are the fundamental unit of I/O. Their size is fixed when a store is
//! opened and every buffer handed to or returned from the file is exactly one
//! page long.

/// Default page size in bytes (8KB).
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size a store accepts. A node that cannot be split plus one
/// more maximum-size item needs just over 1KB.
pub const MIN_PAGE_SIZE: usize = 2048;

/// Largest page size a store accepts. Cell offsets inside a node are stored
/// as `u16`, so no offset may reach past this.
pub const MAX_PAGE_SIZE: usize = 65_536;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Size of an encoded page id in bytes.
pub const PAGE_ID_SIZE: usize = 8;

/// Page 0 always holds the store metadata.
pub const META_PAGE_ID: PageId = 0;

/// A raw page buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Page length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw page data.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Read bytes at a specific offset, or `None` if the range leaves the page.
    #[must_use]
    pub fn get_bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u16 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a u16 (little-endian) at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview = self.data.len().min(16);
        f.debug_struct("Page")
            .field("len", &self.data.len())
            .field("first_16_bytes", &&self.data[..preview])
            .finish_non_exhaustive()
    }
}
