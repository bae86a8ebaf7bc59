//! Page caching.
//!
//! The page cache sits between a storage handle and its file. Dirty and
//! header pages are held strongly until flushed; clean pages live in a
//! bounded weak tier that evicts the least recently used page first.
//!
//! # Components
//! - [`PageCache`] - The two-tier cache
//! - [`CachedPage`] - A resident page + dirty flag
//! - [`CacheStats`] - Hit/miss/eviction counters
//! - [`replacer`] - Weak-tier eviction order

mod cached_page;
mod page_cache;
pub mod replacer;
mod stats;

pub use cached_page::CachedPage;
pub use page_cache::{EvictionListener, PageCache, Tier};
pub use stats::{CacheStats, StatsSnapshot};
