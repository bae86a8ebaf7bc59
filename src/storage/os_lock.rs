//! OS byte-range locks.
//!
//! On Linux these are open-file-description locks, which conflict between
//! two descriptors of the same file even inside one process. Other Unix
//! targets fall back to classic POSIX record locks, which only conflict
//! across processes; in-process exclusion is always provided by the
//! handle's own `RangeLockTable`.
//!
//! Non-Unix targets get no OS locking at all.

use std::fs::File;
use std::io;

/// Kind of OS lock to place on a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OsLockKind {
    /// Read lock; compatible with other read locks.
    Shared,
    /// Write lock; requires a writable descriptor.
    Exclusive,
}

/// Try to lock `[position, position + count)` without blocking.
///
/// Returns `Ok(false)` if another holder owns a conflicting lock.
pub(crate) fn try_lock(file: &File, kind: OsLockKind, position: u64, count: u64) -> io::Result<bool> {
    imp::set_lock(file, Some(kind), position, count)
}

/// Release `[position, position + count)`.
pub(crate) fn unlock(file: &File, position: u64, count: u64) -> io::Result<()> {
    imp::set_lock(file, None, position, count).map(|_| ())
}

#[cfg(unix)]
mod imp {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    use super::OsLockKind;

    #[cfg(target_os = "linux")]
    const SET_LOCK: libc::c_int = libc::F_OFD_SETLK;
    #[cfg(not(target_os = "linux"))]
    const SET_LOCK: libc::c_int = libc::F_SETLK;

    pub(super) fn set_lock(
        file: &File,
        kind: Option<OsLockKind>,
        position: u64,
        count: u64,
    ) -> io::Result<bool> {
        // SAFETY: flock is a plain C struct; all-zero is a valid value and
        // leaves l_pid at 0 as OFD locks require.
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = match kind {
            Some(OsLockKind::Shared) => libc::F_RDLCK as _,
            Some(OsLockKind::Exclusive) => libc::F_WRLCK as _,
            None => libc::F_UNLCK as _,
        };
        fl.l_whence = libc::SEEK_SET as _;
        fl.l_start = position as _;
        fl.l_len = count as _;

        // SAFETY: the descriptor is owned by `file` and outlives the call;
        // `fl` is a valid flock for the duration of the call.
        let ret = unsafe { libc::fcntl(file.as_raw_fd(), SET_LOCK, &mut fl as *mut libc::flock) };
        if ret == 0 {
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EAGAIN || code == libc::EACCES => Ok(false),
            _ => Err(err),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::fs::File;
    use std::io;

    use super::OsLockKind;

    pub(super) fn set_lock(
        _file: &File,
        _kind: Option<OsLockKind>,
        _position: u64,
        _count: u64,
    ) -> io::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn test_lock_and_unlock_range() {
        let dir = tempdir().unwrap();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.path().join("lock.db"))
            .unwrap();

        assert!(try_lock(&file, OsLockKind::Exclusive, 100, 50).unwrap());
        unlock(&file, 100, 50).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_second_descriptor_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock.db");
        let open = || {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)
                .unwrap()
        };
        let first = open();
        let second = open();

        assert!(try_lock(&first, OsLockKind::Exclusive, 0, 10).unwrap());
        assert!(!try_lock(&second, OsLockKind::Exclusive, 5, 10).unwrap());
        assert!(try_lock(&second, OsLockKind::Exclusive, 10, 10).unwrap());

        unlock(&first, 0, 10).unwrap();
        assert!(try_lock(&second, OsLockKind::Exclusive, 5, 5).unwrap());
    }
}
