//! Free-space allocator - reusable clusters with pending/commit/rollback.
//!
//! Space released by a storage unit first lands in a *pending* pool keyed
//! by that unit. A commit moves every pending cluster into the *committed*
//! pools where [`FreeSpaceAllocator::get_cluster`] can hand it out again;
//! a rollback discards one unit's pending clusters without touching
//! committed space.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::common::StorageId;

/// A contiguous run of free pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cluster {
    /// Byte offset of the first page.
    pub position: u64,
    /// Number of pages in the run.
    pub page_count: u32,
}

impl Cluster {
    pub fn new(position: u64, page_count: u32) -> Self {
        Self {
            position,
            page_count,
        }
    }

    /// Length of the cluster in bytes.
    #[inline]
    pub fn byte_len(&self, page_size: usize) -> u64 {
        self.page_count as u64 * page_size as u64
    }
}

/// Tracks reusable clusters.
///
/// Clusters are reused by exact size only; clusters of different sizes are
/// never split or merged.
///
/// # Invariants
/// - A position is in at most one of the pending or committed pools.
/// - `committed` and `by_size` always describe the same set of clusters.
///
/// Not internally synchronised; the owning
/// [`StorageHandle`](super::StorageHandle) guards it with its own mutex.
#[derive(Debug, Default)]
pub struct FreeSpaceAllocator {
    /// Pending clusters grouped by the storage unit that released them.
    pending: HashMap<StorageId, Vec<Cluster>>,
    /// Every pending position, for duplicate checks.
    pending_positions: HashSet<u64>,
    /// Committed clusters by position.
    committed: HashMap<u64, Cluster>,
    /// Committed positions by page count.
    by_size: BTreeMap<u32, Vec<u64>>,
}

impl FreeSpaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a committed cluster of exactly `page_count` pages.
    pub fn get_cluster(&mut self, page_count: u32) -> Option<u64> {
        let positions = self.by_size.get_mut(&page_count)?;
        let position = positions.pop()?;
        if positions.is_empty() {
            self.by_size.remove(&page_count);
        }
        self.committed.remove(&position);
        Some(position)
    }

    /// Insert a cluster straight into the committed pools.
    ///
    /// Used for free lists loaded at open time. Returns `false` if the
    /// position is already known, in which case nothing changes.
    pub fn put_cluster(&mut self, position: u64, page_count: u32) -> bool {
        if page_count == 0 || self.pending_positions.contains(&position) {
            return false;
        }
        self.insert_committed(Cluster::new(position, page_count))
    }

    /// Record a cluster released by `storage_id`, reusable after commit.
    ///
    /// Returns `false` if the position is already pending or committed.
    pub fn put_pending(&mut self, storage_id: StorageId, position: u64, page_count: u32) -> bool {
        if page_count == 0
            || self.committed.contains_key(&position)
            || !self.pending_positions.insert(position)
        {
            return false;
        }
        self.pending
            .entry(storage_id)
            .or_default()
            .push(Cluster::new(position, page_count));
        true
    }

    /// Move every pending cluster into the committed pools.
    ///
    /// Returns the clusters that were committed so the caller can drop any
    /// cached pages over them.
    pub fn commit_pending(&mut self) -> Vec<Cluster> {
        let pending = std::mem::take(&mut self.pending);
        self.pending_positions.clear();
        pending
            .into_values()
            .flatten()
            .filter(|&cluster| self.insert_committed(cluster))
            .collect()
    }

    /// Commit only the clusters released by `storage_id`.
    pub fn commit_pending_for(&mut self, storage_id: StorageId) -> Vec<Cluster> {
        let Some(clusters) = self.pending.remove(&storage_id) else {
            return Vec::new();
        };
        clusters
            .into_iter()
            .filter(|cluster| {
                self.pending_positions.remove(&cluster.position);
                self.insert_committed(*cluster)
            })
            .collect()
    }

    /// Discard the clusters released by `storage_id`.
    ///
    /// Returns how many clusters were dropped.
    pub fn rollback_pending(&mut self, storage_id: StorageId) -> usize {
        let Some(clusters) = self.pending.remove(&storage_id) else {
            return 0;
        };
        for cluster in &clusters {
            self.pending_positions.remove(&cluster.position);
        }
        clusters.len()
    }

    /// Whether `position` is committed free space.
    pub fn is_free(&self, position: u64) -> bool {
        self.committed.contains_key(&position)
    }

    /// Whether `position` is waiting for commit.
    pub fn is_pending(&self, position: u64) -> bool {
        self.pending_positions.contains(&position)
    }

    /// Number of committed clusters.
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Number of pending clusters across all storage units.
    pub fn pending_len(&self) -> usize {
        self.pending_positions.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_positions.clear();
        self.committed.clear();
        self.by_size.clear();
    }

    fn insert_committed(&mut self, cluster: Cluster) -> bool {
        if self.committed.contains_key(&cluster.position) {
            return false;
        }
        self.committed.insert(cluster.position, cluster);
        self.by_size
            .entry(cluster.page_count)
            .or_default()
            .push(cluster.position);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: StorageId = StorageId(0);
    const B: StorageId = StorageId(4096);

    #[test]
    fn test_exact_size_reuse() {
        let mut fsa = FreeSpaceAllocator::new();
        fsa.put_cluster(8192, 2);
        fsa.put_cluster(16384, 1);

        assert_eq!(fsa.get_cluster(3), None);
        assert_eq!(fsa.get_cluster(2), Some(8192));
        assert_eq!(fsa.get_cluster(2), None);
        assert_eq!(fsa.get_cluster(1), Some(16384));
        assert_eq!(fsa.committed_len(), 0);
    }

    #[test]
    fn test_duplicate_release_is_ignored() {
        let mut fsa = FreeSpaceAllocator::new();
        assert!(fsa.put_cluster(8192, 1));
        assert!(!fsa.put_cluster(8192, 1));
        assert!(!fsa.put_pending(A, 8192, 1));
        assert_eq!(fsa.committed_len(), 1);
        assert_eq!(fsa.pending_len(), 0);
    }

    #[test]
    fn test_pending_is_not_reusable_until_commit() {
        let mut fsa = FreeSpaceAllocator::new();
        fsa.put_pending(A, 4096, 1);

        assert!(fsa.is_pending(4096));
        assert_eq!(fsa.get_cluster(1), None);

        let committed = fsa.commit_pending();
        assert_eq!(committed, vec![Cluster::new(4096, 1)]);
        assert!(!fsa.is_pending(4096));
        assert!(fsa.is_free(4096));
        assert_eq!(fsa.get_cluster(1), Some(4096));
    }

    #[test]
    fn test_rollback_only_touches_one_storage() {
        let mut fsa = FreeSpaceAllocator::new();
        fsa.put_cluster(0, 1);
        fsa.put_pending(A, 4096, 1);
        fsa.put_pending(A, 8192, 2);
        fsa.put_pending(B, 16384, 1);

        assert_eq!(fsa.rollback_pending(A), 2);
        assert_eq!(fsa.rollback_pending(A), 0);

        let committed = fsa.commit_pending();
        assert_eq!(committed, vec![Cluster::new(16384, 1)]);
        assert!(fsa.is_free(0));
        assert!(!fsa.is_free(4096));
        assert!(!fsa.is_free(8192));
    }

    #[test]
    fn test_commit_for_one_storage() {
        let mut fsa = FreeSpaceAllocator::new();
        fsa.put_pending(A, 4096, 1);
        fsa.put_pending(B, 8192, 1);

        assert_eq!(fsa.commit_pending_for(B), vec![Cluster::new(8192, 1)]);
        assert!(fsa.is_pending(4096));
        assert_eq!(fsa.get_cluster(1), Some(8192));
        assert_eq!(fsa.get_cluster(1), None);
    }

    #[test]
    fn test_rolled_back_position_can_be_released_again() {
        let mut fsa = FreeSpaceAllocator::new();
        fsa.put_pending(A, 4096, 1);
        fsa.rollback_pending(A);
        assert!(fsa.put_pending(B, 4096, 1));
    }

    #[test]
    fn test_zero_page_clusters_are_ignored() {
        let mut fsa = FreeSpaceAllocator::new();
        assert!(!fsa.put_cluster(0, 0));
        assert!(!fsa.put_pending(A, 0, 0));
        assert_eq!(fsa.get_cluster(0), None);
    }

    #[test]
    fn test_cluster_byte_len() {
        assert_eq!(Cluster::new(0, 3).byte_len(1024), 3072);
    }
}
