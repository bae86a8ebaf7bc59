//! Disk Manager - low-level file I/O for one physical file.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Positional reads and writes
//! - Tracking the file length
//! - OS byte-range locks on the descriptor

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::storage::open_mode::{AccessMode, CreateMode, OpenMode};
use crate::storage::os_lock::{self, OsLockKind};

/// Manages disk I/O for a single file.
///
/// # File Layout
/// Pages are laid out back to back; page `p` starts at byte offset `p`:
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────┐
/// │ 0        │ ps       │ 2·ps     │  ...    │
/// └──────────┴──────────┴──────────┴─────────┘
/// ```
///
/// # Length
/// The length is read from the OS once at open and then cached. Any write
/// that extends the file pads it to the next page boundary, so the length
/// stays a multiple of the page size.
///
/// # Thread Safety
/// The descriptor sits behind a `Mutex` so seek+read and seek+write pairs
/// are atomic. The cached length is an atomic updated under that mutex.
///
/// # Durability
/// Writes are not synced individually; [`DiskManager::sync`] is called by
/// the storage handle at flush time.
pub struct DiskManager {
    path: PathBuf,
    file: Mutex<File>,
    /// Cached file length in bytes.
    len: AtomicU64,
    page_size: usize,
    read_only: bool,
}

impl DiskManager {
    /// Open or create `path` according to `mode`.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be opened, e.g. it is missing
    /// under `CreateMode::Open` or present under `CreateMode::Create`.
    pub fn open<P: AsRef<Path>>(path: P, mode: &OpenMode, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let read_only = mode.access == AccessMode::ReadOnly;

        let mut options = OpenOptions::new();
        options.read(true).write(!read_only);
        match mode.create {
            CreateMode::Open => {}
            CreateMode::Create => {
                options.create_new(true);
            }
            CreateMode::OpenOrCreate => {
                options.create(true);
            }
        }
        let file = options.open(&path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path,
            file: Mutex::new(file),
            len: AtomicU64::new(len),
            page_size,
            read_only,
        })
    }

    /// Read up to `buf.len()` bytes at `position`.
    ///
    /// Returns the number of bytes read, which is short if the file ends
    /// inside the range.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(position))?;

        let mut done = 0;
        while done < buf.len() {
            match file.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// Write all of `buf` at `position`.
    ///
    /// Extending writes pad the file to the next page boundary.
    pub fn write_at(&self, position: u64, buf: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(position))?;
        file.write_all(buf)?;

        let end = position + buf.len() as u64;
        let len = self.len.load(Ordering::Acquire);
        if end > len {
            let padded = round_up(end, self.page_size);
            if padded > end {
                file.set_len(padded)?;
            }
            self.len.store(padded, Ordering::Release);
        }
        Ok(())
    }

    /// Resize the file to `len` bytes.
    pub fn set_len(&self, len: u64) -> std::io::Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        self.len.store(len, Ordering::Release);
        Ok(())
    }

    /// Cached length of the file in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the file is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query the OS for the current length and refresh the cached value.
    pub fn refresh_len(&self) -> std::io::Result<u64> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        self.len.store(len, Ordering::Release);
        Ok(len)
    }

    /// Flush OS buffers to stable storage.
    pub fn sync(&self) -> std::io::Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.lock().sync_all()
    }

    /// Try to take an OS lock on a byte range without blocking.
    ///
    /// Read-only descriptors can only hold shared locks, so the kind is
    /// downgraded for them.
    pub(crate) fn try_lock_range(&self, position: u64, count: u64, exclusive: bool) -> Result<bool> {
        let kind = if exclusive && !self.read_only {
            OsLockKind::Exclusive
        } else {
            OsLockKind::Shared
        };
        let file = self.file.lock();
        Ok(os_lock::try_lock(&file, kind, position, count)?)
    }

    /// Release an OS lock on a byte range.
    pub(crate) fn unlock_range(&self, position: u64, count: u64) -> Result<()> {
        let file = self.file.lock();
        os_lock::unlock(&file, position, count).map_err(Error::from)
    }

    /// Path the file was opened with.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size the file is addressed with.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Whether the descriptor was opened without write access.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Round `value` up to a multiple of `page_size`.
#[inline]
pub(crate) fn round_up(value: u64, page_size: usize) -> u64 {
    let page_size = page_size as u64;
    value.div_ceil(page_size) * page_size
}
