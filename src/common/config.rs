//! Configuration constants and per-file storage settings.

use std::time::Duration;

use crate::common::{Error, Result};

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems. The page size is fixed for
/// the lifetime of an open file; it is not recorded in the file itself.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted by [`StorageConfig::validate`].
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted by [`StorageConfig::validate`].
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Default number of clean pages kept in the weak tier of a page cache.
pub const DEFAULT_WEAK_CAPACITY: usize = 1024;

/// Backoff between attempts while waiting for a row or file lock.
pub const LOCK_RETRY_SLICE: Duration = Duration::from_millis(20);

/// Timeout used by callers that do not pick one.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Highest byte offset a file operation or lock may touch (`off_t::MAX`).
pub const MAX_POSITION: u64 = i64::MAX as u64;

/// Byte offset of the lock region.
///
/// Row and file locks are byte-range locks on sentinel offsets far above
/// any real data, so they never collide with page I/O.
///
/// ```text
/// LOCK_REGION_BASE        file lock sentinel
/// LOCK_REGION_BASE + 1    open-mode sentinel
/// LOCK_REGION_BASE + 2+n  row n
/// ```
pub const LOCK_REGION_BASE: u64 = 1 << 62;

/// Sentinel byte for the whole-file lock.
pub const FILE_LOCK_POSITION: u64 = LOCK_REGION_BASE;

/// Sentinel byte locked for the lifetime of a handle to enforce share mode.
pub const OPEN_LOCK_POSITION: u64 = LOCK_REGION_BASE + 1;

/// Lock byte of row `row_id`.
#[inline]
pub const fn row_lock_position(row_id: u64) -> u64 {
    LOCK_REGION_BASE + 2 + row_id
}

/// How a storage handle routes page and row I/O through its page cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Every read and write goes straight to the file.
    Disabled,
    /// Reads are cached; writes go to the file and invalidate cached pages.
    ReadOnly,
    /// Reads and writes are cached; dirty pages reach disk on flush.
    #[default]
    ReadWrite,
}

impl CacheMode {
    /// Whether reads are served from the cache.
    #[inline]
    pub fn caches_reads(&self) -> bool {
        matches!(self, CacheMode::ReadOnly | CacheMode::ReadWrite)
    }

    /// Whether writes are buffered in the cache.
    #[inline]
    pub fn caches_writes(&self) -> bool {
        matches!(self, CacheMode::ReadWrite)
    }
}

/// Settings applied to one open storage file.
///
/// # Example
/// ```
/// use pagevault::common::config::{CacheMode, StorageConfig};
///
/// let config = StorageConfig::new()
///     .page_size(1024)
///     .weak_capacity(64)
///     .cache_mode(CacheMode::ReadOnly);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub(crate) page_size: usize,
    pub(crate) weak_capacity: usize,
    pub(crate) cache_mode: CacheMode,
    pub(crate) lock_retry_slice: Duration,
}

impl StorageConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            weak_capacity: DEFAULT_WEAK_CAPACITY,
            cache_mode: CacheMode::default(),
            lock_retry_slice: LOCK_RETRY_SLICE,
        }
    }

    /// Sets the page size in bytes.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets how many clean pages the weak tier may hold.
    #[must_use]
    pub fn weak_capacity(mut self, pages: usize) -> Self {
        self.weak_capacity = pages;
        self
    }

    /// Sets the cache routing mode.
    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    /// Sets the backoff between lock attempts.
    #[must_use]
    pub fn lock_retry_slice(mut self, slice: Duration) -> Self {
        self.lock_retry_slice = slice;
        self
    }

    /// The configured page size.
    #[inline]
    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    /// The configured cache mode.
    #[inline]
    pub fn get_cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` if the page size is not a power of two
    /// within `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`, or the retry slice is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(Error::InvalidConfig(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.lock_retry_slice.is_zero() {
            return Err(Error::InvalidConfig(
                "lock retry slice must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_size_is_power_of_two() {
        assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
        assert!(StorageConfig::new().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_page_size() {
        assert!(StorageConfig::new().page_size(1000).validate().is_err());
        assert!(StorageConfig::new().page_size(256).validate().is_err());
        assert!(StorageConfig::new()
            .page_size(MAX_PAGE_SIZE * 2)
            .validate()
            .is_err());
        assert!(StorageConfig::new().page_size(1024).validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_retry_slice() {
        let config = StorageConfig::new().lock_retry_slice(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_cache_mode_directions() {
        assert!(!CacheMode::Disabled.caches_reads());
        assert!(CacheMode::ReadOnly.caches_reads());
        assert!(!CacheMode::ReadOnly.caches_writes());
        assert!(CacheMode::ReadWrite.caches_writes());
    }

    #[test]
    fn test_lock_region_fits_in_off_t() {
        assert!(FILE_LOCK_POSITION < OPEN_LOCK_POSITION);
        assert!(OPEN_LOCK_POSITION < row_lock_position(0));
        assert_eq!(row_lock_position(crate::lock::MAX_ROW_ID), MAX_POSITION);
        assert!(MAX_POSITION <= i64::MAX as u64);
    }
}
