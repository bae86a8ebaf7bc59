//! Property tests for the page cache, storage handle and free-space pools.

use pagevault::common::config::StorageConfig;
use pagevault::storage::{CreateMode, FreeSpaceAllocator, OpenMode, StorageHandle};
use pagevault::{PageId, StorageId};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use tempfile::tempdir;

const PS: usize = 512;
const SPAN: usize = 16 * PS;

#[derive(Debug, Clone)]
enum Op {
    Write { position: usize, data: Vec<u8> },
    Read { page: usize, force: bool },
    Flush,
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..SPAN - 1, prop::collection::vec(any::<u8>(), 1..3 * PS))
            .prop_map(|(position, mut data)| {
                data.truncate(SPAN - position);
                Op::Write { position, data }
            }),
        3 => (0..SPAN / PS, any::<bool>()).prop_map(|(page, force)| Op::Read { page, force }),
        1 => Just(Op::Flush),
        1 => Just(Op::Clear),
    ]
}

fn open(dir: &tempfile::TempDir) -> StorageHandle {
    let config = StorageConfig::new().page_size(PS).weak_capacity(3);
    let mode = OpenMode::new().create(CreateMode::Create);
    StorageHandle::open(dir.path().join("prop.db"), mode, config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Reads return the last bytes written, whatever evictions, flushes and
    /// forced reloads happen in between. A cache clear drops whatever was
    /// not flushed, so the model rolls back to the last flushed state.
    #[test]
    fn prop_read_after_write(ops in prop::collection::vec(op(), 1..40)) {
        let dir = tempdir().unwrap();
        let handle = open(&dir);
        let sid = StorageId(SPAN as u64 * 4);

        let mut model = vec![0u8; SPAN];
        let mut flushed = model.clone();

        for op in &ops {
            match op {
                Op::Write { position, data } => {
                    handle.write_row(sid, *position as u64, data, data.len()).unwrap();
                    model[*position..*position + data.len()].copy_from_slice(data);
                }
                Op::Read { page, force } => {
                    let mut buf = vec![0u8; PS];
                    handle.read_row(sid, (*page * PS) as u64, &mut buf, PS, *force).unwrap();
                }
                Op::Flush => {
                    handle.flush_cache().unwrap();
                    flushed.copy_from_slice(&model);
                }
                Op::Clear => {
                    handle.clear_cache().unwrap();
                    model.copy_from_slice(&flushed);
                }
            }
        }

        for page in 0..SPAN / PS {
            let mut buf = vec![0u8; PS];
            let n = handle.read_page(sid, PageId((page * PS) as u64), &mut buf, 0, PS).unwrap();
            prop_assert_eq!(n, PS);
            prop_assert_eq!(&buf[..], &model[page * PS..(page + 1) * PS]);
        }
    }

    /// Every resident page sits in exactly one tier, and the weak tier
    /// never exceeds its capacity.
    #[test]
    fn prop_tiers_are_disjoint(ops in prop::collection::vec(op(), 1..40)) {
        let dir = tempdir().unwrap();
        let handle = open(&dir);
        let sid = StorageId(0);

        for op in &ops {
            match op {
                Op::Write { position, data } => {
                    handle.write_row(sid, *position as u64, data, data.len()).unwrap();
                }
                Op::Read { page, .. } => {
                    let mut buf = vec![0u8; PS];
                    handle.read_page(sid, PageId((*page * PS) as u64), &mut buf, 0, PS).unwrap();
                }
                Op::Flush => handle.flush_cache().unwrap(),
                Op::Clear => handle.clear_cache().unwrap(),
            }

            let cache = handle.page_cache();
            let resident = (0..SPAN / PS)
                .filter(|p| cache.tier_of(PageId((p * PS) as u64)).is_some())
                .count();
            prop_assert_eq!(resident, cache.strong_len() + cache.weak_len());
            prop_assert!(cache.weak_len() <= 3);
        }
    }

    /// Committed clusters are handed out only at their released size, and
    /// a rolled-back owner's releases never come back.
    #[test]
    fn prop_free_space_commit_and_rollback(
        releases in prop::collection::vec((0u64..4, 1u32..4), 1..30),
        rolled_back in 0u64..4,
    ) {
        let mut allocator = FreeSpaceAllocator::new();
        let mut expected: HashMap<u64, u32> = HashMap::new();
        let mut discarded: HashSet<u64> = HashSet::new();

        for (i, (owner, pages)) in releases.iter().enumerate() {
            let position = i as u64 * 16 * PS as u64;
            prop_assert!(allocator.put_pending(StorageId(*owner), position, *pages));
            if *owner == rolled_back {
                discarded.insert(position);
            } else {
                expected.insert(position, *pages);
            }
        }

        prop_assert_eq!(allocator.get_cluster(1), None);
        allocator.rollback_pending(StorageId(rolled_back));
        let committed = allocator.commit_pending();
        prop_assert_eq!(committed.len(), expected.len());

        for pages in 1u32..4 {
            while let Some(position) = allocator.get_cluster(pages) {
                prop_assert!(!discarded.contains(&position));
                prop_assert_eq!(expected.remove(&position), Some(pages));
            }
        }
        prop_assert!(expected.is_empty());
        prop_assert_eq!(allocator.pending_len(), 0);
    }
}
