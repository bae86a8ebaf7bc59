//! Row and file locking.
//!
//! [`LockManager`] keeps per-owner reference counts for row and whole-file
//! locks and maps them onto byte-range locks of a
//! [`StorageHandle`](crate::storage::StorageHandle) in the sentinel region
//! above any real data.

mod lock_manager;

pub use lock_manager::{LockKind, LockManager, MAX_ROW_ID};
