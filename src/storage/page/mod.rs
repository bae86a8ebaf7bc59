//! Page buffer type.
//!
//! This layer does not interpret page contents; the only layout fact it
//! relies on is that a storage unit's header page lives at the offset equal
//! to its [`StorageId`](crate::StorageId).

#[allow(clippy::module_inception)]
mod page;

pub use page::Page;
