//! Eviction order for the weak tier of the page cache.
//!
//! Currently implements:
//! - [`LruReplacer`] - least recently touched page goes first

mod lru;

pub use lru::LruReplacer;
