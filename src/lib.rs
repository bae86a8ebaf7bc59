//! pagevault - page caching, free-space tracking and locking for file-backed
//! storage.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   table / index layer (caller)                  │
//! └────────────┬──────────────────────────────────────┬─────────────┘
//!              ↓                                      ↓
//! ┌────────────────────────────┐        ┌─────────────────────────────┐
//! │  StorageManager (storage/) │        │  LockManager (lock/)        │
//! │  pools handles per path    │        │  ref-counted row/file locks │
//! └────────────┬───────────────┘        └──────────────┬──────────────┘
//!              ↓                                       ↓
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    StorageHandle (storage/)                     │
//! │  ┌──────────────────────┐  ┌──────────────────┐  ┌────────────┐ │
//! │  │ PageCache (buffer/)  │  │ FreeSpaceAllocator│  │ range locks│ │
//! │  │ strong + weak (LRU)  │  │ pending/committed │  │ per owner  │ │
//! │  └──────────┬───────────┘  └──────────────────┘  └─────┬──────┘ │
//! │             ↓                                          ↓        │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │        DiskManager: positional I/O + OS byte locks         │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, StorageId, Error, config)
//! - [`buffer`] - The two-tier page cache
//! - [`storage`] - Files, handles, free space and byte-range locks
//! - [`lock`] - Row and file lock bookkeeping
//!
//! # Quick Start
//! ```no_run
//! use pagevault::common::config::StorageConfig;
//! use pagevault::storage::{CreateMode, OpenMode, StorageManager};
//! use pagevault::StorageId;
//!
//! let manager = StorageManager::new(false, StorageConfig::new());
//! let handle = manager
//!     .open_storage("my_data.db", OpenMode::new().create(CreateMode::OpenOrCreate))
//!     .unwrap();
//!
//! let sid = StorageId(0);
//! let position = handle.get_free_cluster(1).unwrap();
//! handle.write_row(sid, position, b"hello", 5).unwrap();
//! handle.flush().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod lock;
pub mod storage;

pub use common::config::{CacheMode, StorageConfig, DEFAULT_PAGE_SIZE};
pub use common::{Error, PageId, Result, StorageId};

pub use buffer::{PageCache, StatsSnapshot};
pub use lock::{LockKind, LockManager};
pub use storage::{OpenMode, StorageHandle, StorageManager};
