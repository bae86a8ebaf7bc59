//! File open modes.

use std::fmt;

use crate::common::{Error, Result};

/// Whether opening creates the file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Open an existing file; fail if missing.
    #[default]
    Open,
    /// Create a new file; fail if it exists.
    Create,
    /// Open the file, creating it if missing.
    OpenOrCreate,
}

/// Read or read/write access.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Whether other logical opens may share the handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    #[default]
    Exclusive,
    Shared,
}

/// How a storage file is opened.
///
/// # Example
/// ```
/// use pagevault::storage::{AccessMode, CreateMode, OpenMode, ShareMode};
///
/// let mode = OpenMode::new()
///     .create(CreateMode::OpenOrCreate)
///     .share(ShareMode::Shared);
/// let reader = OpenMode::new()
///     .access(AccessMode::ReadOnly)
///     .share(ShareMode::Shared);
/// assert!(mode.is_compatible_with(&reader));
/// assert!(!reader.is_compatible_with(&mode));
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub create: CreateMode,
    pub access: AccessMode,
    pub share: ShareMode,
    /// Scratch file removed when the handle closes. Never shared.
    pub temporary: bool,
    /// Keep lock bookkeeping but skip every OS lock call.
    pub virtual_locks: bool,
}

impl OpenMode {
    /// Open an existing file read/write, exclusively.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scratch file deleted on close.
    pub fn temporary() -> Self {
        Self {
            create: CreateMode::Create,
            access: AccessMode::ReadWrite,
            share: ShareMode::Exclusive,
            temporary: true,
            virtual_locks: true,
        }
    }

    #[must_use]
    pub fn create(mut self, create: CreateMode) -> Self {
        self.create = create;
        self
    }

    #[must_use]
    pub fn access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn share(mut self, share: ShareMode) -> Self {
        self.share = share;
        self
    }

    #[must_use]
    pub fn virtual_locks(mut self, virtual_locks: bool) -> Self {
        self.virtual_locks = virtual_locks;
        self
    }

    /// Whether writes are allowed.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.access == AccessMode::ReadWrite
    }

    /// Whether the handle may be shared.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.share == ShareMode::Shared && !self.temporary
    }

    /// Reject combinations that cannot be opened.
    pub fn validate(&self) -> Result<()> {
        if self.access == AccessMode::ReadOnly && self.create == CreateMode::Create {
            return Err(Error::InvalidConfig(
                "cannot create a file read-only".to_string(),
            ));
        }
        if self.temporary && self.access == AccessMode::ReadOnly {
            return Err(Error::InvalidConfig(
                "temporary storage must be writable".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a handle opened with `self` can serve a `requested` open.
    ///
    /// Both sides must be shared, the request must not want more access
    /// than the handle has, and both must agree on lock virtualisation.
    /// Creating a file that is already open never matches.
    pub fn is_compatible_with(&self, requested: &OpenMode) -> bool {
        if !self.is_shared() || !requested.is_shared() {
            return false;
        }
        if requested.create == CreateMode::Create {
            return false;
        }
        if requested.is_writable() && !self.is_writable() {
            return false;
        }
        self.virtual_locks == requested.virtual_locks
    }

    /// Tightened to exclusive, used when handle sharing is off.
    #[must_use]
    pub(crate) fn exclusive(mut self) -> Self {
        self.share = ShareMode::Exclusive;
        self
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            AccessMode::ReadOnly => "read-only",
            AccessMode::ReadWrite => "read-write",
        };
        let share = match self.share {
            ShareMode::Exclusive => "exclusive",
            ShareMode::Shared => "shared",
        };
        write!(f, "{} {}", access, share)?;
        if self.temporary {
            write!(f, " temporary")?;
        }
        if self.virtual_locks {
            write!(f, " virtual-locks")?;
        }
        Ok(())
    }
}
