//! LRU (Least Recently Used) replacement order for the weak tier.

use std::collections::{BTreeMap, HashMap};

use crate::common::PageId;

/// Tracks recency of the clean pages held in the weak tier.
///
/// Every access stamps the page with a fresh tick; the victim is the page
/// with the oldest tick. Both maps always hold the same pages.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Page → tick of its last access.
    ticks: HashMap<PageId, u64>,
    /// Tick → page, ordered oldest first.
    order: BTreeMap<u64, PageId>,
    /// Next tick to hand out.
    clock: u64,
}

impl LruReplacer {
    /// Create an empty replacer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a page was touched, making it most recently used.
    pub fn record_access(&mut self, page_id: PageId) {
        if let Some(old) = self.ticks.insert(page_id, self.clock) {
            self.order.remove(&old);
        }
        self.order.insert(self.clock, page_id);
        self.clock += 1;
    }

    /// Select and forget the least recently used page.
    pub fn evict(&mut self) -> Option<PageId> {
        let (_, page_id) = self.order.pop_first()?;
        self.ticks.remove(&page_id);
        Some(page_id)
    }

    /// Forget a page.
    pub fn remove(&mut self, page_id: PageId) -> bool {
        match self.ticks.remove(&page_id) {
            Some(tick) => {
                self.order.remove(&tick);
                true
            }
            None => false,
        }
    }

    /// Number of tracked pages.
    pub fn size(&self) -> usize {
        self.ticks.len()
    }

    /// Forget every page.
    pub fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}
