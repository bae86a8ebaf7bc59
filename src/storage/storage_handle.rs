//! Storage Handle - one open physical file.
//!
//! A [`StorageHandle`] routes page and row I/O either straight to the file
//! or through its [`PageCache`], hands out and reclaims disk space through
//! its [`FreeSpaceAllocator`], and keeps the byte-range lock table that the
//! [`LockManager`](crate::lock::LockManager) builds on.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::buffer::{PageCache, StatsSnapshot};
use crate::common::config::{StorageConfig, MAX_POSITION, OPEN_LOCK_POSITION};
use crate::common::{Error, PageId, Result, StorageId};
use crate::storage::disk_manager::round_up;
use crate::storage::free_space::FreeSpaceAllocator;
use crate::storage::range_lock::{Probe, RangeLockTable};
use crate::storage::{DiskManager, OpenMode};

/// Chunk size used when copying between files.
const COPY_CHUNK: usize = 64 * 1024;

/// State guarded by the handle mutex.
struct HandleState {
    free_space: FreeSpaceAllocator,
    locks: RangeLockTable,
}

/// One open physical file, possibly shared by several logical opens.
///
/// # Components
/// ```text
/// ┌──────────────────────────────────────────────────────────┐
/// │                      StorageHandle                       │
/// │  ┌──────────────┐   ┌──────────────────────────────────┐ │
/// │  │ PageCache    │   │ Mutex<HandleState>               │ │
/// │  │ (own mutex)  │   │  FreeSpaceAllocator              │ │
/// │  └──────┬───────┘   │  RangeLockTable                  │ │
/// │         │           └──────────────────────────────────┘ │
/// │  ┌──────▼──────────────────────────────────────────────┐ │
/// │  │ DiskManager (file + cached length + OS locks)       │ │
/// │  └─────────────────────────────────────────────────────┘ │
/// └──────────────────────────────────────────────────────────┘
/// ```
///
/// # Length
/// [`StorageHandle::length`] is the logical length: the on-disk length
/// plus space handed out by [`StorageHandle::get_free_cluster`] and cached
/// writes past the end. Flushing materialises it on disk.
///
/// # Lock Ordering
/// The handle mutex may be held while calling into the page cache, never
/// the other way round.
pub struct StorageHandle {
    name: String,
    mode: OpenMode,
    config: StorageConfig,
    disk: Arc<DiskManager>,
    cache: PageCache,
    length: AtomicU64,
    state: Mutex<HandleState>,
    ref_count: AtomicUsize,
    closed: AtomicBool,
}

impl StorageHandle {
    /// Open `path` under `mode`.
    ///
    /// Unless `mode.virtual_locks` is set, the share mode is enforced with
    /// an OS lock on a sentinel byte: exclusive opens take it for writing,
    /// shared opens for reading.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` for unusable settings
    /// - `Error::FileInUse` if another handle holds the file incompatibly
    /// - I/O errors from opening the file
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode, config: StorageConfig) -> Result<Self> {
        mode.validate()?;
        config.validate()?;

        let disk = Arc::new(DiskManager::open(&path, &mode, config.page_size)?);
        let name = path.as_ref().display().to_string();

        if !mode.virtual_locks {
            let exclusive = !mode.is_shared();
            if !disk.try_lock_range(OPEN_LOCK_POSITION, 1, exclusive)? {
                return Err(Error::FileInUse(name));
            }
        }

        let cache = PageCache::new(Arc::clone(&disk), config.weak_capacity);
        let length = disk.len();
        debug!("Opened '{}' ({}, {} bytes)", name, mode, length);

        Ok(Self {
            name,
            mode,
            config,
            cache,
            length: AtomicU64::new(length),
            disk,
            state: Mutex::new(HandleState {
                free_space: FreeSpaceAllocator::new(),
                locks: RangeLockTable::new(),
            }),
            ref_count: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Page and row I/O
    // ========================================================================

    /// Read `length` bytes of the page at `page_id` into
    /// `buf[offset..offset + length]`.
    ///
    /// A window running past the end of `buf` is shortened; the return value
    /// is the number of bytes transferred.
    pub fn read_page(
        &self,
        storage_id: StorageId,
        page_id: PageId,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        self.ensure_open()?;
        self.ensure_aligned(page_id)?;
        let window = window(buf.len(), offset, length);
        self.ensure_span(page_id.0, window.len() as u64)?;
        self.read_bytes(storage_id, page_id.0, &mut buf[window], false)
    }

    /// Write `buf[offset..offset + length]` to the page at `page_id`.
    pub fn write_page(
        &self,
        storage_id: StorageId,
        page_id: PageId,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        self.ensure_writable()?;
        self.ensure_aligned(page_id)?;
        let window = window(buf.len(), offset, length);
        self.ensure_span(page_id.0, window.len() as u64)?;
        self.write_bytes(storage_id, page_id.0, &buf[window])
    }

    /// Read up to `max_length` bytes of a row at `position`.
    ///
    /// Returns `false` if the row lies past the end of the storage. With
    /// `force`, cached clean pages are reloaded from disk first.
    pub fn read_row(
        &self,
        storage_id: StorageId,
        position: u64,
        buf: &mut [u8],
        max_length: usize,
        force: bool,
    ) -> Result<bool> {
        self.ensure_open()?;
        if position >= self.length() {
            return Ok(false);
        }
        let n = max_length.min(buf.len());
        self.ensure_span(position, n as u64)?;
        Ok(self.read_bytes(storage_id, position, &mut buf[..n], force)? > 0)
    }

    /// Write the first `length` bytes of `buf` as a row at `position`.
    ///
    /// Returns `false` if there was nothing to write.
    pub fn write_row(
        &self,
        storage_id: StorageId,
        position: u64,
        buf: &[u8],
        length: usize,
    ) -> Result<bool> {
        self.ensure_writable()?;
        let n = length.min(buf.len());
        if n == 0 {
            return Ok(false);
        }
        self.ensure_span(position, n as u64)?;
        self.write_bytes(storage_id, position, &buf[..n])?;
        Ok(true)
    }

    // ========================================================================
    // Free space
    // ========================================================================

    /// Find room for `page_count` pages.
    ///
    /// Reuses a committed free cluster of exactly that size, or else grows
    /// the storage and returns the old tail position.
    pub fn get_free_cluster(&self, page_count: u32) -> Result<u64> {
        self.ensure_writable()?;
        if page_count == 0 {
            return Err(Error::InvalidArgument(
                "cluster must span at least one page".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if let Some(position) = state.free_space.get_cluster(page_count) {
            trace!("Reused {} free pages at {} in '{}'", page_count, position, self.name);
            return Ok(position);
        }

        let position = round_up(self.length(), self.page_size());
        let end = position + page_count as u64 * self.page_size() as u64;
        self.length.fetch_max(end, Ordering::AcqRel);
        drop(state);

        trace!("Extended '{}' by {} pages at {}", self.name, page_count, position);
        Ok(position)
    }

    /// Mark a cluster as free right away, e.g. from a free list read at
    /// open time. Cached pages over the cluster are dropped.
    ///
    /// Returns `false` if the position was already free or pending.
    pub fn set_free_cluster(&self, position: u64, page_count: u32) -> Result<bool> {
        self.ensure_writable()?;
        let len = page_count as u64 * self.page_size() as u64;
        self.ensure_span(position, len)?;
        let mut state = self.state.lock();
        let inserted = state.free_space.put_cluster(position, page_count);
        if inserted {
            self.cache.remove_range(position, len);
        }
        Ok(inserted)
    }

    /// Release a cluster on behalf of `storage_id`; it becomes reusable at
    /// the next [`StorageHandle::flush_cache`].
    pub fn pending_free_cluster(
        &self,
        storage_id: StorageId,
        position: u64,
        page_count: u32,
    ) -> Result<bool> {
        self.ensure_writable()?;
        self.ensure_span(position, page_count as u64 * self.page_size() as u64)?;
        Ok(self
            .state
            .lock()
            .free_space
            .put_pending(storage_id, position, page_count))
    }

    /// Forget the clusters `storage_id` released since the last flush.
    pub fn rollback_free_clusters(&self, storage_id: StorageId) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.state.lock().free_space.rollback_pending(storage_id))
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Commit released space, drop cached pages over it, then write every
    /// dirty page back.
    ///
    /// The commit and the invalidation happen under the handle mutex, so
    /// no caller can be handed a freed cluster while stale pages for it
    /// are still cached.
    pub fn flush_cache(&self) -> Result<()> {
        self.ensure_open()?;
        self.flush_cache_inner()
    }

    /// [`StorageHandle::flush_cache`], then sync the file.
    pub fn flush(&self) -> Result<()> {
        self.flush_cache()?;
        self.disk.sync()?;
        Ok(())
    }

    /// Discard every cached page, unflushed writes included, and fall
    /// back to the on-disk length.
    pub fn clear_cache(&self) -> Result<()> {
        self.ensure_open()?;
        self.cache.clear();
        let len = self.disk.refresh_len()?;
        self.length.store(len, Ordering::Release);
        Ok(())
    }

    // ========================================================================
    // Byte-range locks
    // ========================================================================

    /// Lock `[position, position + count)` for `storage_id` without waiting.
    ///
    /// Re-locking the exact same range nests. Returns `Ok(false)` if another
    /// storage id or process holds an overlapping range.
    ///
    /// # Errors
    /// `Error::LockConflict` if `storage_id` already holds a range that
    /// overlaps without matching exactly.
    pub fn lock(&self, position: u64, count: u64, storage_id: StorageId) -> Result<bool> {
        self.ensure_open()?;
        if count == 0 {
            return Err(Error::InvalidArgument("lock range is empty".to_string()));
        }
        self.ensure_span(position, count)?;

        let mut state = self.state.lock();
        match state.locks.probe(storage_id, position, count) {
            Probe::Reentered => Ok(true),
            Probe::Busy => Ok(false),
            Probe::Conflict => Err(Error::LockConflict {
                storage: self.name.clone(),
                position,
                count,
            }),
            Probe::Free => {
                if !self.mode.virtual_locks
                    && !self
                        .disk
                        .try_lock_range(position, count, self.mode.is_writable())?
                {
                    return Ok(false);
                }
                state.locks.record(storage_id, position, count);
                Ok(true)
            }
        }
    }

    /// Undo one [`StorageHandle::lock`] of the exact same range.
    ///
    /// The OS lock is released when the nesting depth reaches zero.
    pub fn unlock(&self, position: u64, count: u64, storage_id: StorageId) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match state.locks.release(storage_id, position, count) {
            None => Err(Error::LockNotHeld {
                storage: self.name.clone(),
                position,
                count,
            }),
            Some(false) => Ok(()),
            Some(true) if self.mode.virtual_locks => Ok(()),
            Some(true) => self.disk.unlock_range(position, count),
        }
    }

    /// Nesting depth of an exact range held by `storage_id`.
    pub fn lock_depth(&self, position: u64, count: u64, storage_id: StorageId) -> u32 {
        self.state.lock().locks.depth(storage_id, position, count)
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    /// Read straight from the file, ignoring the cache.
    pub fn raw_read(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        self.ensure_span(position, buf.len() as u64)?;
        Ok(self.disk.read_at(position, buf)?)
    }

    /// Write straight to the file and drop cached pages over the range.
    pub fn raw_write(&self, position: u64, buf: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.ensure_span(position, buf.len() as u64)?;
        self.disk.write_at(position, buf)?;
        self.cache.remove_range(position, buf.len() as u64);
        self.length.fetch_max(self.disk.len(), Ordering::AcqRel);
        Ok(())
    }

    /// Length of the file as reported by the OS.
    pub fn raw_length(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.disk.refresh_len()?)
    }

    /// Replace this file's contents with `other`'s.
    ///
    /// `other` is flushed first. This handle's cache and free-space pools
    /// are reset since they describe the old contents. Returns the number
    /// of bytes copied.
    pub fn copy_from(&self, other: &StorageHandle) -> Result<u64> {
        self.ensure_writable()?;
        if Arc::ptr_eq(&self.disk, &other.disk) {
            return Err(Error::InvalidArgument(format!(
                "cannot copy '{}' onto itself",
                self.name
            )));
        }
        other.flush_cache()?;

        let len = other.raw_length()?;
        let mut state = self.state.lock();
        self.cache.clear();
        state.free_space.clear();

        let mut chunk = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;
        while copied < len {
            let want = (len - copied).min(COPY_CHUNK as u64) as usize;
            let n = other.disk.read_at(copied, &mut chunk[..want])?;
            if n == 0 {
                break;
            }
            self.disk.write_at(copied, &chunk[..n])?;
            copied += n as u64;
        }
        self.disk.set_len(len)?;
        self.length.store(len, Ordering::Release);
        drop(state);

        debug!("Copied {} bytes from '{}' into '{}'", copied, other.name, self.name);
        Ok(copied)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Flush, release every lock, and delete the file if temporary.
    ///
    /// Idempotent. Every step runs even if an earlier one fails; the first
    /// failure is returned.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;

        if self.mode.is_writable() {
            let flushed = self.flush_cache_inner().and_then(|()| Ok(self.disk.sync()?));
            if let Err(e) = flushed {
                first_error.get_or_insert(e);
            }
        }

        let held = {
            let mut state = self.state.lock();
            if !state.locks.is_empty() {
                debug!("Releasing byte-range locks still held on '{}'", self.name);
            }
            state.locks.drain()
        };
        if !self.mode.virtual_locks {
            for (position, count) in held
                .into_iter()
                .chain(std::iter::once((OPEN_LOCK_POSITION, 1)))
            {
                if let Err(e) = self.disk.unlock_range(position, count) {
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.mode.temporary {
            if let Err(e) = std::fs::remove_file(self.disk.path()) {
                first_error.get_or_insert(e.into());
            }
        }

        debug!("Closed '{}'", self.name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of logical opens sharing this handle.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one logical open; the count never goes below zero.
    pub(crate) fn release(&self) -> usize {
        match self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(old) => old - 1,
            Err(_) => {
                warn!("Released '{}' with no logical opens left", self.name);
                0
            }
        }
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Display name (the path as opened).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.disk.path()
    }

    pub(crate) fn path_buf(&self) -> PathBuf {
        self.disk.path().to_path_buf()
    }

    pub fn mode(&self) -> &OpenMode {
        &self.mode
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Logical length in bytes.
    pub fn length(&self) -> u64 {
        self.length.load(Ordering::Acquire)
    }

    pub fn page_cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> StatsSnapshot {
        self.cache.stats().snapshot()
    }

    /// Committed free clusters available for reuse.
    pub fn free_cluster_count(&self) -> usize {
        self.state.lock().free_space.committed_len()
    }

    /// Released clusters waiting for the next flush.
    pub fn pending_cluster_count(&self) -> usize {
        self.state.lock().free_space.pending_len()
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn flush_cache_inner(&self) -> Result<()> {
        if !self.mode.is_writable() {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            for cluster in state.free_space.commit_pending() {
                self.cache
                    .remove_range(cluster.position, cluster.byte_len(self.page_size()));
            }
        }

        self.cache.flush()?;

        let length = self.length();
        if self.disk.len() < length {
            self.disk.set_len(length)?;
        }
        Ok(())
    }

    fn read_bytes(
        &self,
        storage_id: StorageId,
        position: u64,
        buf: &mut [u8],
        force: bool,
    ) -> Result<usize> {
        if self.config.cache_mode.caches_reads() {
            self.cache.read(storage_id, position, buf, force)
        } else {
            Ok(self.disk.read_at(position, buf)?)
        }
    }

    fn write_bytes(&self, storage_id: StorageId, position: u64, buf: &[u8]) -> Result<usize> {
        let cache_mode = self.config.cache_mode;
        let written = if cache_mode.caches_writes() {
            self.cache.write(storage_id, position, buf)?
        } else {
            self.disk.write_at(position, buf)?;
            if cache_mode.caches_reads() {
                self.cache.remove_range(position, buf.len() as u64);
            }
            buf.len()
        };

        let end = round_up(position + buf.len() as u64, self.page_size());
        self.length.fetch_max(end, Ordering::AcqRel);
        Ok(written)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed(self.name.clone()));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.mode.is_writable() {
            return Err(Error::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    /// Reject ranges whose last byte lies beyond [`MAX_POSITION`].
    fn ensure_span(&self, position: u64, len: u64) -> Result<()> {
        let last = position.checked_add(len.saturating_sub(1));
        if !last.is_some_and(|last| last <= MAX_POSITION) {
            return Err(Error::InvalidArgument(format!(
                "{} bytes at {} run past the addressable end of '{}'",
                len, position, self.name
            )));
        }
        Ok(())
    }

    fn ensure_aligned(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_aligned(self.page_size()) {
            return Err(Error::InvalidArgument(format!(
                "{} is not aligned to {} bytes",
                page_id,
                self.page_size()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("length", &self.length())
            .field("ref_count", &self.ref_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for StorageHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close '{}' on drop: {}", self.name, e);
        }
    }
}

/// Clamp `offset..offset + length` to a buffer of `len` bytes.
fn window(len: usize, offset: usize, length: usize) -> Range<usize> {
    let start = offset.min(len);
    start..start + length.min(len - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::CacheMode;
    use crate::storage::{AccessMode, CreateMode, ShareMode};
    use tempfile::{tempdir, TempDir};

    const PS: usize = 1024;
    const SID: StorageId = StorageId(0);

    fn config() -> StorageConfig {
        StorageConfig::new().page_size(PS).weak_capacity(16)
    }

    fn create_handle() -> (StorageHandle, TempDir) {
        let dir = tempdir().unwrap();
        let mode = OpenMode::new().create(CreateMode::Create);
        let handle = StorageHandle::open(dir.path().join("h.db"), mode, config()).unwrap();
        (handle, dir)
    }

    #[test]
    fn test_window_clamps() {
        assert_eq!(window(10, 2, 4), 2..6);
        assert_eq!(window(10, 8, 4), 8..10);
        assert_eq!(window(10, 12, 4), 10..10);
    }

    #[test]
    fn test_page_round_trip_through_cache() {
        let (handle, _dir) = create_handle();
        let data = vec![0x5Au8; PS];

        assert_eq!(handle.write_page(SID, PageId(PS as u64), &data, 0, PS).unwrap(), PS);

        let mut out = vec![0u8; PS];
        assert_eq!(handle.read_page(SID, PageId(PS as u64), &mut out, 0, PS).unwrap(), PS);
        assert_eq!(out, data);
        assert_eq!(handle.length(), 2 * PS as u64);
    }

    #[test]
    fn test_short_buffer_gives_short_transfer() {
        let (handle, _dir) = create_handle();
        let mut out = vec![0u8; 100];
        assert_eq!(handle.read_page(SID, PageId(0), &mut out, 60, PS).unwrap(), 40);
    }

    #[test]
    fn test_unaligned_page_is_rejected() {
        let (handle, _dir) = create_handle();
        let mut out = vec![0u8; 10];
        let err = handle.read_page(SID, PageId(10), &mut out, 0, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_read_row_past_end_is_false() {
        let (handle, _dir) = create_handle();
        let mut buf = [0u8; 8];
        assert!(!handle.read_row(SID, 0, &mut buf, 8, false).unwrap());

        assert!(handle.write_row(SID, 100, b"row", 3).unwrap());
        assert!(handle.read_row(SID, 100, &mut buf, 3, false).unwrap());
        assert_eq!(&buf[..3], b"row");
        assert!(!handle.write_row(SID, 100, b"row", 0).unwrap());
    }

    #[test]
    fn test_free_cluster_extends_then_reuses() {
        let (handle, _dir) = create_handle();

        assert_eq!(handle.get_free_cluster(2).unwrap(), 0);
        assert_eq!(handle.get_free_cluster(1).unwrap(), 2 * PS as u64);
        assert_eq!(handle.length(), 3 * PS as u64);

        assert!(handle.pending_free_cluster(SID, 0, 2).unwrap());
        assert_eq!(handle.get_free_cluster(2).unwrap(), 3 * PS as u64);

        handle.flush_cache().unwrap();
        assert_eq!(handle.get_free_cluster(2).unwrap(), 0);
        assert_eq!(handle.raw_length().unwrap(), 5 * PS as u64);
    }

    #[test]
    fn test_flush_drops_pages_over_released_space() {
        let (handle, _dir) = create_handle();
        let pos = handle.get_free_cluster(1).unwrap();
        handle.write_row(SID, pos, b"stale", 5).unwrap();

        handle.pending_free_cluster(StorageId(4096), pos, 1).unwrap();
        handle.flush_cache().unwrap();
        assert_eq!(handle.page_cache().tier_of(PageId(pos)), None);
    }

    #[test]
    fn test_rollback_free_clusters() {
        let (handle, _dir) = create_handle();
        handle.pending_free_cluster(SID, 4096, 1).unwrap();
        assert_eq!(handle.rollback_free_clusters(SID).unwrap(), 1);
        handle.flush_cache().unwrap();
        assert_eq!(handle.free_cluster_count(), 0);
    }

    #[test]
    fn test_byte_range_locks() {
        let (handle, _dir) = create_handle();

        assert!(handle.lock(100, 50, SID).unwrap());
        assert!(matches!(
            handle.lock(120, 20, SID),
            Err(Error::LockConflict { .. })
        ));
        assert!(handle.lock(100, 50, SID).unwrap());
        assert_eq!(handle.lock_depth(100, 50, SID), 2);
        assert!(handle.lock(200, 50, SID).unwrap());

        assert!(!handle.lock(100, 50, StorageId(8192)).unwrap());

        handle.unlock(100, 50, SID).unwrap();
        handle.unlock(100, 50, SID).unwrap();
        assert!(matches!(
            handle.unlock(100, 50, SID),
            Err(Error::LockNotHeld { .. })
        ));
        assert!(handle.lock(100, 50, StorageId(8192)).unwrap());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.db");
        drop(StorageHandle::open(&path, OpenMode::new().create(CreateMode::Create), config()).unwrap());

        let mode = OpenMode::new().access(AccessMode::ReadOnly);
        let handle = StorageHandle::open(&path, mode, config()).unwrap();
        assert!(matches!(
            handle.write_row(SID, 0, b"x", 1),
            Err(Error::ReadOnly(_))
        ));
        assert!(matches!(handle.get_free_cluster(1), Err(Error::ReadOnly(_))));
    }

    #[test]
    fn test_write_through_invalidates_cached_page() {
        let dir = tempdir().unwrap();
        let config = config().cache_mode(CacheMode::ReadOnly);
        let mode = OpenMode::new().create(CreateMode::Create);
        let handle = StorageHandle::open(dir.path().join("wt.db"), mode, config).unwrap();

        handle.write_row(SID, 0, b"one", 3).unwrap();
        let mut buf = [0u8; 3];
        handle.read_row(SID, 0, &mut buf, 3, false).unwrap();
        handle.write_row(SID, 0, b"two", 3).unwrap();
        handle.read_row(SID, 0, &mut buf, 3, false).unwrap();
        assert_eq!(&buf, b"two");
        assert_eq!(handle.page_cache().dirty_count(), 0);
    }

    #[test]
    fn test_raw_write_bypasses_and_invalidates() {
        let (handle, _dir) = create_handle();
        handle.write_row(SID, 0, b"cached", 6).unwrap();
        handle.raw_write(0, b"direct").unwrap();

        let mut buf = [0u8; 6];
        handle.read_row(SID, 0, &mut buf, 6, false).unwrap();
        assert_eq!(&buf, b"direct");
    }

    #[test]
    fn test_exclusive_open_blocks_second_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.db");
        let first = StorageHandle::open(&path, OpenMode::new().create(CreateMode::Create), config())
            .unwrap();

        if cfg!(target_os = "linux") {
            let second = StorageHandle::open(&path, OpenMode::new(), config());
            assert!(matches!(second, Err(Error::FileInUse(_))));
        }

        first.close().unwrap();
        let shared = OpenMode::new().share(ShareMode::Shared);
        assert!(StorageHandle::open(&path, shared, config()).is_ok());
    }

    #[test]
    fn test_closed_handle_rejects_operations() {
        let (handle, _dir) = create_handle();
        handle.close().unwrap();
        handle.close().unwrap();

        let mut buf = [0u8; 1];
        assert!(matches!(
            handle.read_row(SID, 0, &mut buf, 1, false),
            Err(Error::Closed(_))
        ));
    }

    #[test]
    fn test_temporary_file_deleted_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scratch.tmp");
        let handle = StorageHandle::open(&path, OpenMode::temporary(), config()).unwrap();
        handle.write_row(SID, 0, b"tmp", 3).unwrap();

        handle.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_copy_from() {
        let dir = tempdir().unwrap();
        let create = OpenMode::new().create(CreateMode::Create);
        let source = StorageHandle::open(dir.path().join("src.db"), create, config()).unwrap();
        let target = StorageHandle::open(dir.path().join("dst.db"), create, config()).unwrap();

        source.write_row(SID, 10, b"copy me", 7).unwrap();
        target.write_row(SID, 5000, b"old", 3).unwrap();

        assert_eq!(target.copy_from(&source).unwrap(), PS as u64);
        assert_eq!(target.length(), PS as u64);

        let mut buf = [0u8; 7];
        assert!(target.read_row(SID, 10, &mut buf, 7, false).unwrap());
        assert_eq!(&buf, b"copy me");
        assert!(target.copy_from(&target).is_err());
    }

    #[test]
    fn test_ranges_past_addressable_end_are_rejected() {
        let (handle, _dir) = create_handle();
        let mut buf = [0u8; 8];
        let near_end = u64::MAX - 4;

        let err = handle.write_row(SID, near_end, b"overflow", 8).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = handle.raw_write(MAX_POSITION, b"xy").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = handle.raw_read(near_end, &mut buf).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = handle.lock(MAX_POSITION, 2, SID).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = handle.set_free_cluster(u64::MAX - PS as u64 + 1, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = handle.pending_free_cluster(SID, near_end, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        assert_eq!(handle.length(), 0);
        assert_eq!(handle.page_cache().strong_len(), 0);
    }

    #[test]
    fn test_release_stops_at_zero() {
        let (handle, _dir) = create_handle();
        assert_eq!(handle.retain(), 2);
        assert_eq!(handle.release(), 1);
        assert_eq!(handle.release(), 0);
        assert_eq!(handle.release(), 0);
        assert_eq!(handle.ref_count(), 0);
    }

    #[test]
    fn test_debug_names_the_file() {
        let (handle, _dir) = create_handle();
        let shown = format!("{:?}", handle);
        assert!(shown.starts_with("StorageHandle"));
        assert!(shown.contains("h.db"));
        assert!(shown.contains("closed: false"));
    }
}
