//! Byte-range lock bookkeeping for one storage handle.

use std::collections::HashMap;

use crate::common::StorageId;

/// A held byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeLock {
    position: u64,
    count: u64,
    /// Number of times the owner has locked exactly this range.
    depth: u32,
}

impl RangeLock {
    #[inline]
    fn overlaps(&self, position: u64, count: u64) -> bool {
        position < self.position + self.count && self.position < position + count
    }

    #[inline]
    fn is_exact(&self, position: u64, count: u64) -> bool {
        self.position == position && self.count == count
    }
}

/// Outcome of probing the table for a new lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The owner already held the exact range; its depth was incremented.
    Reentered,
    /// Nothing overlaps; the caller must take the OS lock and `record` it.
    Free,
    /// Another owner holds an overlapping range.
    Busy,
    /// The owner holds a range that overlaps without matching exactly.
    Conflict,
}

/// Per-owner lists of held byte ranges.
///
/// An owner re-locking the exact same range nests; an owner locking a range
/// that partially overlaps one it already holds is an addressing error.
/// Ranges held by other owners make the request busy.
#[derive(Debug, Default)]
pub(crate) struct RangeLockTable {
    entries: HashMap<StorageId, Vec<RangeLock>>,
}

impl RangeLockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check a request against the held ranges, nesting on an exact match.
    pub(crate) fn probe(&mut self, owner: StorageId, position: u64, count: u64) -> Probe {
        if let Some(locks) = self.entries.get_mut(&owner) {
            for lock in locks.iter_mut() {
                if lock.is_exact(position, count) {
                    lock.depth += 1;
                    return Probe::Reentered;
                }
                if lock.overlaps(position, count) {
                    return Probe::Conflict;
                }
            }
        }

        let busy = self
            .entries
            .iter()
            .filter(|(sid, _)| **sid != owner)
            .flat_map(|(_, locks)| locks.iter())
            .any(|lock| lock.overlaps(position, count));
        if busy {
            Probe::Busy
        } else {
            Probe::Free
        }
    }

    /// Record a freshly acquired range at depth one.
    pub(crate) fn record(&mut self, owner: StorageId, position: u64, count: u64) {
        self.entries.entry(owner).or_default().push(RangeLock {
            position,
            count,
            depth: 1,
        });
    }

    /// Drop one level of an exact range.
    ///
    /// Returns `Some(true)` when the depth reached zero and the OS lock
    /// should be released, `Some(false)` while still nested, and `None`
    /// if the owner does not hold the range.
    pub(crate) fn release(&mut self, owner: StorageId, position: u64, count: u64) -> Option<bool> {
        let locks = self.entries.get_mut(&owner)?;
        let index = locks.iter().position(|l| l.is_exact(position, count))?;

        locks[index].depth -= 1;
        if locks[index].depth > 0 {
            return Some(false);
        }
        locks.swap_remove(index);
        if locks.is_empty() {
            self.entries.remove(&owner);
        }
        Some(true)
    }

    /// Nesting depth of an exact range, zero if not held.
    pub(crate) fn depth(&self, owner: StorageId, position: u64, count: u64) -> u32 {
        self.entries
            .get(&owner)
            .and_then(|locks| locks.iter().find(|l| l.is_exact(position, count)))
            .map_or(0, |l| l.depth)
    }

    /// Remove every range, returning `(position, count)` pairs to release.
    pub(crate) fn drain(&mut self) -> Vec<(u64, u64)> {
        self.entries
            .drain()
            .flat_map(|(_, locks)| locks.into_iter().map(|l| (l.position, l.count)))
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
