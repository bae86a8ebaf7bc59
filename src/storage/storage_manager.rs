//! Storage Manager - pools storage handles across logical opens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::config::StorageConfig;
use crate::common::{Error, Result};
use crate::storage::{OpenMode, StorageHandle};

/// Hands out [`StorageHandle`]s, one per physical file.
///
/// In shared (server) mode an open of a path that is already open with a
/// compatible mode returns the existing handle with its reference count
/// bumped. Outside shared mode every open is forced exclusive, so a second
/// open of the same path fails.
///
/// The manager is an explicit context object: create one per process (or
/// per test) and pass it to whoever opens files.
pub struct StorageManager {
    shared_mode: bool,
    config: StorageConfig,
    /// Open handles keyed by normalised path.
    pool: Mutex<HashMap<PathBuf, Arc<StorageHandle>>>,
}

impl StorageManager {
    pub fn new(shared_mode: bool, config: StorageConfig) -> Self {
        Self {
            shared_mode,
            config,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Open `path`, reusing a pooled handle where allowed.
    ///
    /// # Errors
    /// - `Error::IncompatibleMode` in shared mode if the pooled handle cannot
    ///   serve `mode`
    /// - `Error::FileInUse` outside shared mode if the path is already open
    /// - any error from [`StorageHandle::open`]
    pub fn open_storage<P: AsRef<Path>>(&self, path: P, mode: OpenMode) -> Result<Arc<StorageHandle>> {
        mode.validate()?;
        let key = normalize(path.as_ref());
        let mut pool = self.pool.lock();

        if let Some(handle) = pool.get(&key) {
            if !self.shared_mode {
                return Err(Error::FileInUse(key.display().to_string()));
            }
            if !handle.mode().is_compatible_with(&mode) {
                return Err(Error::IncompatibleMode {
                    path: key.display().to_string(),
                    existing: handle.mode().to_string(),
                    requested: mode.to_string(),
                });
            }
            let refs = handle.retain();
            debug!("Reusing '{}' ({} refs)", handle.name(), refs);
            return Ok(Arc::clone(handle));
        }

        let mode = if self.shared_mode { mode } else { mode.exclusive() };
        let handle = Arc::new(StorageHandle::open(&key, mode, self.config.clone())?);
        pool.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop one reference to `handle`, closing it when none remain.
    ///
    /// Returns whether the handle was closed.
    pub fn close_storage(&self, handle: &Arc<StorageHandle>) -> Result<bool> {
        let key = handle.path_buf();
        let mut pool = self.pool.lock();
        match pool.get(&key) {
            Some(pooled) if Arc::ptr_eq(pooled, handle) => {}
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not managed here",
                    handle.name()
                )))
            }
        }

        if handle.release() > 0 {
            return Ok(false);
        }
        pool.remove(&key);
        drop(pool);

        handle.close()?;
        Ok(true)
    }

    /// Close every pooled handle regardless of reference counts.
    ///
    /// Failures are logged and skipped. Returns how many handles were
    /// closed cleanly.
    pub fn close_all(&self) -> usize {
        let handles: Vec<_> = self.pool.lock().drain().map(|(_, handle)| handle).collect();
        let mut closed = 0;
        for handle in handles {
            match handle.close() {
                Ok(()) => closed += 1,
                Err(e) => warn!("Failed to close '{}': {}", handle.name(), e),
            }
        }
        if closed > 0 {
            debug!("Closed {} storage handles", closed);
        }
        closed
    }

    /// Number of distinct files currently open.
    pub fn open_count(&self) -> usize {
        self.pool.lock().len()
    }

    /// The pooled handle for `path`, if open.
    pub fn get(&self, path: &Path) -> Option<Arc<StorageHandle>> {
        self.pool.lock().get(&normalize(path)).cloned()
    }

    pub fn is_shared_mode(&self) -> bool {
        self.shared_mode
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Canonical form of `path` so different spellings share one pool entry.
///
/// Only the parent directory is canonicalised; the file may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccessMode, CreateMode, ShareMode};
    use tempfile::tempdir;

    fn shared() -> OpenMode {
        OpenMode::new()
            .create(CreateMode::OpenOrCreate)
            .share(ShareMode::Shared)
    }

    #[test]
    fn test_normalize_collapses_dot_segments() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("a.db");
        let dotted = dir.path().join(".").join("a.db");
        assert_eq!(normalize(&plain), normalize(&dotted));
    }

    #[test]
    fn test_shared_mode_reuses_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let manager = StorageManager::new(true, StorageConfig::new());

        let first = manager.open_storage(&path, shared()).unwrap();
        let second = manager.open_storage(&path, shared()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.ref_count(), 2);
        assert_eq!(manager.open_count(), 1);

        assert!(!manager.close_storage(&second).unwrap());
        assert!(!first.is_closed());
        assert!(manager.close_storage(&first).unwrap());
        assert!(first.is_closed());
        assert_eq!(manager.open_count(), 0);
    }

    #[test]
    fn test_incompatible_request_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.db");
        std::fs::write(&path, []).unwrap();
        let manager = StorageManager::new(true, StorageConfig::new());

        let reader = OpenMode::new()
            .access(AccessMode::ReadOnly)
            .share(ShareMode::Shared);
        let _reader = manager.open_storage(&path, reader).unwrap();
        let err = manager.open_storage(&path, shared()).unwrap_err();
        assert!(matches!(err, Error::IncompatibleMode { .. }));
    }

    #[test]
    fn test_exclusive_when_not_shared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.db");
        let manager = StorageManager::new(false, StorageConfig::new());

        let handle = manager.open_storage(&path, shared()).unwrap();
        assert!(!handle.mode().is_shared());
        assert!(matches!(
            manager.open_storage(&path, shared()),
            Err(Error::FileInUse(_))
        ));
    }

    #[test]
    fn test_close_foreign_handle_fails() {
        let dir = tempdir().unwrap();
        let one = StorageManager::new(true, StorageConfig::new());
        let two = StorageManager::new(true, StorageConfig::new());

        let handle = one.open_storage(dir.path().join("f.db"), shared()).unwrap();
        assert!(two.close_storage(&handle).is_err());
    }

    #[test]
    fn test_close_all_and_drop() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(true, StorageConfig::new());
        let a = manager.open_storage(dir.path().join("a.db"), shared()).unwrap();
        let _b = manager.open_storage(dir.path().join("b.db"), shared()).unwrap();

        assert_eq!(manager.close_all(), 2);
        assert!(a.is_closed());
        assert_eq!(manager.open_count(), 0);

        let c = manager.open_storage(dir.path().join("c.db"), shared()).unwrap();
        drop(manager);
        assert!(c.is_closed());
    }
}
