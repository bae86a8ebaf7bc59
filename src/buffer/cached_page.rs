//! CachedPage - a page held by the page cache.
//!
//! A [`CachedPage`] holds a [`Page`] plus the metadata the cache needs:
//! - Which storage unit owns it
//! - Header flag, fixed once the owning storage unit touches it
//! - Dirty flag for write-back tracking

use crate::common::{PageId, StorageId};
use crate::storage::page::Page;

/// A page resident in the cache.
///
/// All access goes through the owning cache's mutex, so the fields need no
/// interior mutability.
pub struct CachedPage {
    page_id: PageId,
    storage_id: StorageId,
    page: Page,
    header: bool,
    dirty: bool,
}

impl CachedPage {
    /// Create a zeroed, clean page.
    pub fn new(storage_id: StorageId, page_id: PageId, page_size: usize) -> Self {
        Self {
            page_id,
            storage_id,
            page: Page::new(page_size),
            header: page_id.is_header_of(storage_id),
            dirty: false,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Storage unit the page belongs to.
    #[inline]
    pub fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    /// Whether this is its storage unit's header page.
    #[inline]
    pub fn is_header(&self) -> bool {
        self.header
    }

    /// Record a touch by `storage_id`.
    ///
    /// A page first loaded for another storage unit becomes a header page,
    /// owned by `storage_id`, once that unit touches it at its own offset.
    /// The header flag never clears.
    pub fn touched_by(&mut self, storage_id: StorageId) {
        if !self.header && self.page_id.is_header_of(storage_id) {
            self.storage_id = storage_id;
            self.header = true;
        }
    }

    #[inline]
    pub fn page(&self) -> &Page {
        &self.page
    }

    #[inline]
    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the page must live in the strong tier.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.dirty || self.is_header()
    }
}
