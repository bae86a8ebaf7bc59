//! Page Cache - the in-memory page layer over one file.
//!
//! The [`PageCache`] provides:
//! - Byte-range reads and writes split into page-sized segments
//! - A strong tier holding every dirty page and every header page
//! - A bounded weak tier of clean pages, evicted least recently used first
//! - Write-back of dirty pages on flush

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{CacheStats, CachedPage};
use crate::common::{Error, PageId, Result, StorageId};
use crate::storage::DiskManager;

/// Called with the id of each page evicted from the weak tier.
///
/// Runs while the cache mutex is held, so it must not call back into the
/// cache.
pub type EvictionListener = Box<dyn Fn(PageId) + Send + Sync>;

/// Which tier a resident page lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Strong,
    Weak,
}

/// How a page is about to be used.
#[derive(Debug, Clone, Copy)]
enum Touch {
    /// Copy bytes out; `force` re-reads clean pages from disk first.
    Read { force: bool },
    /// Copy bytes in; a write covering the whole page needs no disk read.
    Write { whole_page: bool },
}

/// A page checked out for a write, with the slice of the request it takes.
struct Staged {
    page: CachedPage,
    offset: usize,
    start: usize,
    len: usize,
    /// Holds bytes from disk or an earlier write, so it can go back as is.
    loaded: bool,
}

fn check_span(position: u64, len: usize) -> Result<()> {
    match position.checked_add(len as u64) {
        Some(_) => Ok(()),
        None => Err(Error::InvalidArgument(format!(
            "range of {} bytes at {} overflows",
            len, position
        ))),
    }
}

/// The tables behind the cache mutex.
///
/// A page id is a key of at most one of `strong` and `weak`, and `replacer`
/// tracks exactly the keys of `weak`.
struct CacheTables {
    strong: HashMap<PageId, CachedPage>,
    weak: HashMap<PageId, CachedPage>,
    replacer: LruReplacer,
}

/// Caches the pages of one file.
///
/// # Architecture
/// ```text
/// ┌───────────────────────────────────────────────────────┐
/// │                       PageCache                       │
/// │  ┌──────────────────────┐  ┌───────────────────────┐  │
/// │  │ strong               │  │ weak (≤ capacity)     │  │
/// │  │ dirty + header pages │  │ clean pages, LRU      │  │
/// │  └──────────┬───────────┘  └───────────▲───────────┘  │
/// │             │ flush: write back, demote clean ───┘    │
/// │  ┌──────────▼───────────┐                             │
/// │  │ DiskManager          │                             │
/// │  └──────────────────────┘                             │
/// └───────────────────────────────────────────────────────┘
/// ```
///
/// # Touching a page
/// A touched page is taken out of its tier, used, and put back into the
/// tier its state calls for. If loading it fails it is simply not put
/// back, so a failed touch never leaves a half-filled page resident.
///
/// # Thread Safety
/// One `Mutex` guards both tiers and the replacer. Disk I/O for a refresh
/// or write-back happens under that mutex.
pub struct PageCache {
    name: String,
    disk: Arc<DiskManager>,
    page_size: usize,
    weak_capacity: usize,
    tables: Mutex<CacheTables>,
    stats: CacheStats,
    on_evict: Option<EvictionListener>,
}

impl PageCache {
    /// Create a cache over `disk` keeping at most `weak_capacity` clean pages.
    pub fn new(disk: Arc<DiskManager>, weak_capacity: usize) -> Self {
        Self {
            name: disk.path().display().to_string(),
            page_size: disk.page_size(),
            disk,
            weak_capacity,
            tables: Mutex::new(CacheTables {
                strong: HashMap::new(),
                weak: HashMap::new(),
                replacer: LruReplacer::new(),
            }),
            stats: CacheStats::new(),
            on_evict: None,
        }
    }

    /// Attach a listener called for every weak-tier eviction.
    #[must_use]
    pub fn with_eviction_listener(mut self, listener: EvictionListener) -> Self {
        self.on_evict = Some(listener);
        self
    }

    // ========================================================================
    // Public API: Byte-range I/O
    // ========================================================================

    /// Copy `buf.len()` bytes starting at `position` out of the cache.
    ///
    /// Missing pages are loaded from disk; bytes past the end of the file
    /// read as zero. With `force_read`, clean resident pages are reloaded
    /// first. Returns the number of bytes copied.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` if the range runs past `u64::MAX`
    /// - `Error::PageIo` if a page cannot be loaded; that page is no longer
    ///   cached when the error returns
    pub fn read(
        &self,
        storage_id: StorageId,
        position: u64,
        buf: &mut [u8],
        force_read: bool,
    ) -> Result<usize> {
        check_span(position, buf.len())?;
        let mut tables = self.tables.lock();
        let mut done = 0;

        while done < buf.len() {
            let (page_id, offset, n) = self.segment(position + done as u64, buf.len() - done);
            let page = self.check_out(
                &mut tables,
                storage_id,
                page_id,
                Touch::Read { force: force_read },
            )?;
            page.page().read_into(offset, &mut buf[done..done + n]);
            self.check_in(&mut tables, page);
            done += n;
        }
        Ok(done)
    }

    /// Copy `buf` into the cache starting at `position`.
    ///
    /// Every touched page becomes dirty and moves to the strong tier.
    /// Returns the number of bytes copied.
    ///
    /// All pages are checked out before any byte is copied, so a failed
    /// write changes nothing that was resident.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` if the range runs past `u64::MAX`
    /// - `Error::PageIo` if a partially overwritten page cannot be loaded
    ///   first; that page is no longer cached when the error returns
    pub fn write(&self, storage_id: StorageId, position: u64, buf: &[u8]) -> Result<usize> {
        check_span(position, buf.len())?;
        let mut tables = self.tables.lock();
        let mut staged = Vec::with_capacity(buf.len() / self.page_size + 2);
        let mut done = 0;

        while done < buf.len() {
            let (page_id, offset, n) = self.segment(position + done as u64, buf.len() - done);
            let whole_page = offset == 0 && n == self.page_size;
            let loaded = !whole_page || Self::is_resident(&tables, page_id);
            match self.check_out(&mut tables, storage_id, page_id, Touch::Write { whole_page }) {
                Ok(page) => staged.push(Staged {
                    page,
                    offset,
                    start: done,
                    len: n,
                    loaded,
                }),
                Err(e) => {
                    // Pages created without a disk read hold no real bytes.
                    for staged in staged.into_iter().filter(|s| s.loaded) {
                        self.check_in(&mut tables, staged.page);
                    }
                    return Err(e);
                }
            }
            done += n;
        }

        for Staged {
            mut page,
            offset,
            start,
            len,
            ..
        } in staged
        {
            page.page_mut().write_from(offset, &buf[start..start + len]);
            page.mark_dirty();
            self.check_in(&mut tables, page);
        }
        Ok(done)
    }

    // ========================================================================
    // Public API: Invalidation
    // ========================================================================

    /// Drop a page from both tiers, discarding unflushed changes.
    ///
    /// Returns whether the page was resident.
    pub fn remove_page(&self, page_id: PageId) -> bool {
        let mut tables = self.tables.lock();
        Self::remove_locked(&mut tables, page_id)
    }

    /// Drop every page overlapping `[position, position + len)`.
    ///
    /// Returns how many pages were resident.
    pub fn remove_range(&self, position: u64, len: u64) -> usize {
        if len == 0 {
            return 0;
        }
        let mut tables = self.tables.lock();
        let last = PageId::containing(position.saturating_add(len - 1), self.page_size);
        let mut page_id = PageId::containing(position, self.page_size);
        let mut removed = 0;
        loop {
            if Self::remove_locked(&mut tables, page_id) {
                removed += 1;
            }
            if page_id >= last {
                break;
            }
            page_id = page_id.next(self.page_size);
        }
        removed
    }

    /// Drop every page belonging to `storage_id`, including its header
    /// page once `storage_id` has touched it.
    pub fn clear_for_storage(&self, storage_id: StorageId) -> usize {
        let mut tables = self.tables.lock();
        let before = tables.strong.len() + tables.weak.len();

        tables.strong.retain(|_, page| page.storage_id() != storage_id);
        let CacheTables { weak, replacer, .. } = &mut *tables;
        weak.retain(|page_id, page| {
            let keep = page.storage_id() != storage_id;
            if !keep {
                replacer.remove(*page_id);
            }
            keep
        });

        before - (tables.strong.len() + tables.weak.len())
    }

    /// Drop every page, header and dirty pages included.
    pub fn clear(&self) {
        let mut tables = self.tables.lock();
        tables.strong.clear();
        tables.weak.clear();
        tables.replacer.clear();
    }

    // ========================================================================
    // Public API: Write-back
    // ========================================================================

    /// Write every dirty page to disk, then demote clean non-header pages
    /// to the weak tier.
    ///
    /// Pages are written in position order. Returns how many were written.
    ///
    /// # Errors
    /// `Error::PageIo` on the first failed write; the failing page is
    /// dropped from the cache and later pages stay dirty.
    pub fn flush(&self) -> Result<usize> {
        let mut tables = self.tables.lock();

        let mut dirty: Vec<PageId> = tables
            .strong
            .values()
            .filter(|page| page.is_dirty())
            .map(CachedPage::page_id)
            .collect();
        dirty.sort_unstable();

        for &page_id in &dirty {
            let written = match tables.strong.get_mut(&page_id) {
                Some(page) => self
                    .disk
                    .write_at(page_id.0, page.page().as_slice())
                    .map(|()| page.clear_dirty()),
                None => continue,
            };
            if let Err(source) = written {
                tables.strong.remove(&page_id);
                return Err(self.page_error(page_id, source));
            }
            self.stats.written_back();
        }

        let demoted: Vec<PageId> = tables
            .strong
            .values()
            .filter(|page| !page.is_pinned())
            .map(CachedPage::page_id)
            .collect();
        for page_id in demoted {
            if let Some(page) = tables.strong.remove(&page_id) {
                self.check_in(&mut tables, page);
            }
        }

        if !dirty.is_empty() {
            debug!("Flushed {} pages of '{}'", dirty.len(), self.name);
        }
        Ok(dirty.len())
    }

    // ========================================================================
    // Public API: Inspection
    // ========================================================================

    /// Tier currently holding `page_id`, if resident.
    pub fn tier_of(&self, page_id: PageId) -> Option<Tier> {
        let tables = self.tables.lock();
        if tables.strong.contains_key(&page_id) {
            Some(Tier::Strong)
        } else if tables.weak.contains_key(&page_id) {
            Some(Tier::Weak)
        } else {
            None
        }
    }

    /// Whether `page_id` is resident and dirty.
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.tables
            .lock()
            .strong
            .get(&page_id)
            .is_some_and(CachedPage::is_dirty)
    }

    /// Number of dirty pages.
    pub fn dirty_count(&self) -> usize {
        self.tables
            .lock()
            .strong
            .values()
            .filter(|page| page.is_dirty())
            .count()
    }

    /// Number of pages in the strong tier.
    pub fn strong_len(&self) -> usize {
        self.tables.lock().strong.len()
    }

    /// Number of pages in the weak tier.
    pub fn weak_len(&self) -> usize {
        self.tables.lock().weak.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// Split off the segment of a request that falls in one page:
    /// `(page, offset in page, length)`.
    #[inline]
    fn segment(&self, position: u64, remaining: usize) -> (PageId, usize, usize) {
        let page_id = PageId::containing(position, self.page_size);
        let offset = page_id.offset_of(position);
        (page_id, offset, (self.page_size - offset).min(remaining))
    }

    fn is_resident(tables: &CacheTables, page_id: PageId) -> bool {
        tables.strong.contains_key(&page_id) || tables.weak.contains_key(&page_id)
    }

    /// Take a page out of its tier, creating or loading it as needed.
    fn check_out(
        &self,
        tables: &mut CacheTables,
        storage_id: StorageId,
        page_id: PageId,
        touch: Touch,
    ) -> Result<CachedPage> {
        let mut resident = tables.strong.remove(&page_id);
        if resident.is_none() {
            resident = tables.weak.remove(&page_id);
            tables.replacer.remove(page_id);
        }

        match resident {
            Some(mut page) => {
                self.stats.hit();
                page.touched_by(storage_id);
                if matches!(touch, Touch::Read { force: true }) && !page.is_dirty() {
                    self.refresh(&mut page)?;
                }
                Ok(page)
            }
            None => {
                self.stats.miss();
                let mut page = CachedPage::new(storage_id, page_id, self.page_size);
                if !matches!(touch, Touch::Write { whole_page: true }) {
                    self.refresh(&mut page)?;
                }
                Ok(page)
            }
        }
    }

    /// Put a page back into the tier its state calls for.
    fn check_in(&self, tables: &mut CacheTables, page: CachedPage) {
        let page_id = page.page_id();
        if page.is_pinned() {
            tables.strong.insert(page_id, page);
            return;
        }

        tables.replacer.record_access(page_id);
        tables.weak.insert(page_id, page);

        while tables.weak.len() > self.weak_capacity {
            let Some(victim) = tables.replacer.evict() else {
                break;
            };
            tables.weak.remove(&victim);
            self.stats.evicted();
            trace!("Evicted {} from '{}'", victim, self.name);
            if let Some(listener) = &self.on_evict {
                listener(victim);
            }
        }
    }

    /// Reload a page's bytes from disk, zero-filling past end of file.
    fn refresh(&self, page: &mut CachedPage) -> Result<()> {
        let page_id = page.page_id();
        let n = self
            .disk
            .read_at(page_id.0, page.page_mut().as_mut_slice())
            .map_err(|source| self.page_error(page_id, source))?;
        page.page_mut().zero_from(n);

        self.stats.refreshed();
        trace!("Loaded {} of '{}' ({} bytes on disk)", page_id, self.name, n);
        Ok(())
    }

    fn remove_locked(tables: &mut CacheTables, page_id: PageId) -> bool {
        let strong = tables.strong.remove(&page_id).is_some();
        let weak = tables.weak.remove(&page_id).is_some();
        tables.replacer.remove(page_id);
        strong || weak
    }

    fn page_error(&self, page_id: PageId, source: std::io::Error) -> Error {
        Error::PageIo {
            storage: self.name.clone(),
            position: page_id.0,
            source,
        }
    }
}
