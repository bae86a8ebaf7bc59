//! Reference-counted row and file locks on top of a storage handle.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::config::{row_lock_position, FILE_LOCK_POSITION, LOCK_REGION_BASE, MAX_POSITION};
use crate::common::{Error, Result, StorageId};
use crate::storage::StorageHandle;

/// Largest row id whose lock byte still fits in a signed file offset.
pub const MAX_ROW_ID: u64 = MAX_POSITION - LOCK_REGION_BASE - 2;

/// What a lock covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// A single row, keyed by row id.
    Row,
    /// The whole file; the id is ignored.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LockTarget {
    Row(u64),
    File,
}

impl LockTarget {
    fn new(id: u64, kind: LockKind) -> Result<Self> {
        match kind {
            LockKind::File => Ok(LockTarget::File),
            LockKind::Row if id > MAX_ROW_ID => Err(Error::InvalidArgument(format!(
                "row id {} is above the lockable maximum {}",
                id, MAX_ROW_ID
            ))),
            LockKind::Row => Ok(LockTarget::Row(id)),
        }
    }

    /// Byte the handle locks for this target.
    fn position(self) -> u64 {
        match self {
            LockTarget::Row(id) => row_lock_position(id),
            LockTarget::File => FILE_LOCK_POSITION,
        }
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTarget::Row(id) => write!(f, "row {}", id),
            LockTarget::File => write!(f, "file lock"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    /// Outstanding lock_object calls. Zero means released but deferred.
    count: u32,
    /// Held on behalf of the application, not the engine.
    user_lock: bool,
}

/// Row and file locks held by one owner on one [`StorageHandle`].
///
/// Nested requests for a target this manager already holds only bump a
/// count; the handle's byte-range lock is taken once and released when the
/// count returns to zero. Two managers with different owners on the same
/// handle exclude each other, as do handles in other processes unless the
/// file was opened with virtual locks.
///
/// # Deferred release
/// [`LockManager::unlock_object`] with `wait_for_synch` keeps a row's lock
/// byte held at count zero so that a quick re-lock costs nothing.
/// [`LockManager::synch_all`] later releases every such row that is not a
/// user lock. A user lock is only released by an explicit unlock with
/// `is_user_lock` set, or by teardown.
///
/// # Thread Safety
/// The bookkeeping table has its own mutex, never held while waiting for
/// a lock.
pub struct LockManager {
    handle: Arc<StorageHandle>,
    owner: StorageId,
    retry_slice: Duration,
    table: Mutex<HashMap<LockTarget, LockEntry>>,
}

impl LockManager {
    pub fn new(handle: Arc<StorageHandle>, owner: StorageId) -> Self {
        let retry_slice = handle.config().lock_retry_slice;
        Self {
            handle,
            owner,
            retry_slice,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a row or file lock, waiting up to `timeout`.
    ///
    /// Returns `true` if the underlying lock was newly taken, `false` if
    /// this manager already held it and only the count went up.
    ///
    /// # Errors
    /// `Error::LockTimeout` if another owner still holds the target when
    /// `timeout` runs out.
    pub fn lock_object(
        &self,
        is_user_lock: bool,
        id: u64,
        kind: LockKind,
        timeout: Duration,
    ) -> Result<bool> {
        let target = LockTarget::new(id, kind)?;
        if let Some(entry) = self.table.lock().get_mut(&target) {
            entry.count += 1;
            entry.user_lock |= is_user_lock;
            return Ok(false);
        }

        self.acquire(target, timeout)?;

        let mut table = self.table.lock();
        match table.entry(target) {
            // Another thread sharing this manager got there first. The
            // handle lock nested, so give back our extra depth.
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.count += 1;
                entry.user_lock |= is_user_lock;
                drop(table);
                self.handle.unlock(target.position(), 1, self.owner)?;
                Ok(false)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    count: 1,
                    user_lock: is_user_lock,
                });
                Ok(true)
            }
        }
    }

    /// Drop one reference to a lock.
    ///
    /// Returns `true` if the underlying lock was released. With
    /// `wait_for_synch`, a row reaching zero stays held until
    /// [`LockManager::synch_all`]; file locks are always released at zero.
    /// A row still marked as a user lock is likewise kept until a user
    /// unlock clears the mark.
    pub fn unlock_object(
        &self,
        is_user_lock: bool,
        id: u64,
        kind: LockKind,
        wait_for_synch: bool,
    ) -> Result<bool> {
        let target = LockTarget::new(id, kind)?;
        let mut table = self.table.lock();
        let entry = match table.get_mut(&target) {
            Some(entry) if entry.count > 0 => entry,
            _ => return Ok(false),
        };

        entry.count -= 1;
        if is_user_lock {
            entry.user_lock = false;
        }
        if entry.count > 0 {
            return Ok(false);
        }
        if let LockTarget::Row(_) = target {
            if wait_for_synch || entry.user_lock {
                return Ok(false);
            }
        }

        table.remove(&target);
        drop(table);
        self.handle.unlock(target.position(), 1, self.owner)?;
        Ok(true)
    }

    /// Release every row left at count zero that is not a user lock.
    ///
    /// Returns how many rows were released.
    pub fn synch_all(&self) -> Result<usize> {
        let idle: Vec<LockTarget> = {
            let mut table = self.table.lock();
            let idle: Vec<_> = table
                .iter()
                .filter(|(target, entry)| {
                    matches!(target, LockTarget::Row(_)) && entry.count == 0 && !entry.user_lock
                })
                .map(|(target, _)| *target)
                .collect();
            for target in &idle {
                table.remove(target);
            }
            idle
        };

        let mut first_error = None;
        for target in &idle {
            if let Err(e) = self.handle.unlock(target.position(), 1, self.owner) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(idle.len()),
        }
    }

    /// Release the file lock and every row lock, whatever their counts.
    ///
    /// Each release is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn unlock_all_items(&self) -> Result<()> {
        let held: Vec<LockTarget> = self.table.lock().drain().map(|(target, _)| target).collect();
        if held.is_empty() || self.handle.is_closed() {
            return Ok(());
        }

        let mut first_error = None;
        for target in &held {
            if let Err(e) = self.handle.unlock(target.position(), 1, self.owner) {
                first_error.get_or_insert(e);
            }
        }
        debug!("Released {} locks on '{}'", held.len(), self.handle.name());
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether this manager holds the target with a non-zero count.
    pub fn is_locked(&self, id: u64, kind: LockKind) -> bool {
        self.held_count(id, kind) > 0
    }

    /// Outstanding lock count for the target.
    pub fn held_count(&self, id: u64, kind: LockKind) -> u32 {
        LockTarget::new(id, kind)
            .ok()
            .and_then(|target| self.table.lock().get(&target).map(|entry| entry.count))
            .unwrap_or(0)
    }

    /// Targets tracked, deferred ones included.
    pub fn tracked_len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn owner(&self) -> StorageId {
        self.owner
    }

    pub fn handle(&self) -> &Arc<StorageHandle> {
        &self.handle
    }

    /// Take the handle's byte-range lock for `target`, retrying until
    /// `timeout` elapses.
    fn acquire(&self, target: LockTarget, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.handle.lock(target.position(), 1, self.owner)? {
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= timeout {
                debug!(
                    "Timed out after {:?} on {} in '{}'",
                    waited,
                    target,
                    self.handle.name()
                );
                return Err(Error::LockTimeout {
                    storage: self.handle.name().to_string(),
                    target: target.to_string(),
                    waited,
                });
            }
            std::thread::sleep(self.retry_slice.min(timeout - waited));
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if let Err(e) = self.unlock_all_items() {
            warn!("Failed to release locks on '{}': {}", self.handle.name(), e);
        }
    }
}
