//! Storage unit identifier type.

use std::fmt;

/// Identifies a logical storage unit (a table, an index) inside a file.
///
/// The id is the byte offset of the unit's header page, so the header
/// page's [`PageId`](super::PageId) equals the storage id.
///
/// # Example
/// ```
/// use pagevault::{PageId, StorageId};
///
/// let sid = StorageId::new(4096);
/// assert!(PageId::new(4096).is_header_of(sid));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u64);

impl StorageId {
    /// Create a new StorageId.
    #[inline]
    pub fn new(id: u64) -> Self {
        StorageId(id)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage({})", self.0)
    }
}
