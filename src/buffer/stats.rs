//! Page cache counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by a [`PageCache`](super::PageCache).
///
/// Relaxed atomics: each counter is independent and only read for
/// reporting, so no cross-counter ordering is needed.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
    write_backs: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn evicted(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn refreshed(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn written_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.refreshes,
            &self.write_backs,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Touches served by a resident page.
    pub hits: u64,
    /// Touches that had to create the page.
    pub misses: u64,
    /// Clean pages dropped from the weak tier.
    pub evictions: u64,
    /// Pages (re)loaded from disk.
    pub refreshes: u64,
    /// Dirty pages written to disk.
    pub write_backs: u64,
}

impl StatsSnapshot {
    /// Fraction of touches served from memory, 0.0 when idle.
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} refreshes={} write_backs={} hit_rate={:.1}%",
            self.hits,
            self.misses,
            self.evictions,
            self.refreshes,
            self.write_backs,
            self.hit_rate() * 100.0
        )
    }
}
