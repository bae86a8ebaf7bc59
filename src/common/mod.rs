//! Common types and utilities shared across pagevault.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`config::StorageConfig`]
//! - Error types
//! - Identifiers (PageId, StorageId)

pub mod config;
pub mod error;
mod page_id;
mod storage_id;

pub use error::{Error, Result};
pub use page_id::PageId;
pub use storage_id::StorageId;
