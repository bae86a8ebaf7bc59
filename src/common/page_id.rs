//! Page identifier type.

use std::fmt;

use super::StorageId;

/// Identifies a page by its byte offset in the file.
///
/// A page id is always a multiple of the file's page size. The page size
/// is a property of the open file, so alignment helpers take it as an
/// argument.
///
/// # Example
/// ```
/// use pagevault::PageId;
///
/// let page_id = PageId::containing(5000, 4096);
/// assert_eq!(page_id.0, 4096);
/// assert_eq!(page_id.offset_of(5000), 904);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// Create a new PageId.
    #[inline]
    pub fn new(position: u64) -> Self {
        PageId(position)
    }

    /// The page holding byte `position`.
    #[inline]
    pub fn containing(position: u64, page_size: usize) -> Self {
        let page_size = page_size as u64;
        PageId(position - position % page_size)
    }

    /// Offset of `position` within this page.
    #[inline]
    pub fn offset_of(&self, position: u64) -> usize {
        (position - self.0) as usize
    }

    /// Whether the id sits on a page boundary.
    #[inline]
    pub fn is_aligned(&self, page_size: usize) -> bool {
        self.0 % page_size as u64 == 0
    }

    /// Whether this is the header page of `storage_id`.
    ///
    /// Header pages are pinned in the strong tier of the page cache.
    #[inline]
    pub fn is_header_of(&self, storage_id: StorageId) -> bool {
        self.0 == storage_id.0
    }

    /// The page that follows this one.
    #[inline]
    pub fn next(&self, page_size: usize) -> Self {
        PageId(self.0 + page_size as u64)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}
