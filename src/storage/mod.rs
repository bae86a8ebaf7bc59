//! Storage layer - open files, disk space and byte-range locks.
//!
//! - [`StorageManager`] - Pools handles across logical opens
//! - [`StorageHandle`] - One open physical file
//! - [`DiskManager`] - Low-level file I/O
//! - [`FreeSpaceAllocator`] - Pending and committed free clusters
//! - [`OpenMode`] - How a file is opened and shared
//! - [`page`] - Page buffers

mod disk_manager;
mod free_space;
mod open_mode;
pub(crate) mod os_lock;
pub mod page;
pub(crate) mod range_lock;
mod storage_handle;
mod storage_manager;

pub use disk_manager::DiskManager;
pub use free_space::{Cluster, FreeSpaceAllocator};
pub use open_mode::{AccessMode, CreateMode, OpenMode, ShareMode};
pub use storage_handle::StorageHandle;
pub use storage_manager::StorageManager;
