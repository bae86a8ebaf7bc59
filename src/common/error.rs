//! Error types for pagevault.

use std::time::Duration;

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error while refreshing or flushing a cached page.
    ///
    /// The page has already been dropped from the cache when this surfaces.
    #[error("I/O error on '{storage}' at position {position}: {source}")]
    PageIo {
        storage: String,
        position: u64,
        #[source]
        source: std::io::Error,
    },

    /// A file is already open in a mode the request cannot share.
    #[error("'{path}' is already open as {existing}, cannot open as {requested}")]
    IncompatibleMode {
        path: String,
        existing: String,
        requested: String,
    },

    /// Write attempted against a read-only handle.
    #[error("storage '{0}' is open read-only")]
    ReadOnly(String),

    /// The file is held exclusively by another handle or process.
    #[error("storage '{0}' is in use by another handle")]
    FileInUse(String),

    /// Operation on a handle that has already been closed.
    #[error("storage '{0}' is closed")]
    Closed(String),

    /// Settings rejected at open time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller passed an argument the storage layer cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A row or file lock could not be acquired within the timeout.
    #[error("timed out after {waited:?} waiting for {target} in '{storage}'")]
    LockTimeout {
        storage: String,
        target: String,
        waited: Duration,
    },

    /// A byte-range lock request partially overlaps a range already held
    /// by the same storage id.
    #[error("lock [{position}, +{count}) partially overlaps a held range in '{storage}'")]
    LockConflict {
        storage: String,
        position: u64,
        count: u64,
    },

    /// Unlock of a byte range that is not held.
    #[error("lock [{position}, +{count}) is not held in '{storage}'")]
    LockNotHeld {
        storage: String,
        position: u64,
        count: u64,
    },
}

impl Error {
    /// Whether the caller may retry the whole operation later.
    ///
    /// Only lock timeouts qualify; everything else is a configuration
    /// error, a caller bug, or an I/O failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }
}
