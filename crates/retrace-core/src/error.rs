//! Error types for engine operations.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the engine.
pub type OpResult<T> = Result<T, OpError>;

/// Errors that can occur while performing or reversing a file operation.
#[derive(Debug, Error)]
pub enum OpError {
    /// Path not found.
    #[error("Path not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// Something already exists at the target path.
    #[error("Already exists: {}", .path.display())]
    AlreadyExists { path: PathBuf },

    /// The target location is occupied or otherwise in the way of a reversal.
    #[error("Conflict at {}: {message}", .path.display())]
    Conflict { path: PathBuf, message: String },

    /// Permission denied for a path.
    #[error("Permission denied: {}", .path.display())]
    PermissionDenied { path: PathBuf },

    /// The filesystem ran out of space.
    #[error("Disk full while writing {}", .path.display())]
    DiskFull { path: PathBuf },

    /// A file name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// The requested destination cannot receive the source.
    #[error("Invalid target {}: {reason}", .path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    /// The archive is corrupt or contains unsafe entries.
    #[error("Invalid archive {}: {message}", .path.display())]
    InvalidArchive { path: PathBuf, message: String },

    /// The operation was cancelled before it completed.
    #[error("Cancelled by user")]
    CancelledByUser,

    /// Some entries of a bulk operation failed.
    #[error("{} of the requested entries failed", .0.len())]
    PartialFailure(Vec<EntryFailure>),

    /// The undo history is empty.
    #[error("Nothing to undo")]
    NothingToUndo,

    /// A selection-based command ran without a selection.
    #[error("Nothing selected")]
    NothingSelected,

    /// Paste was requested with an empty clipboard.
    #[error("Clipboard is empty")]
    ClipboardEmpty,

    /// Generic I/O error.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl OpError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            std::io::ErrorKind::StorageFull => Self::DiskFull { path },
            _ => Self::Io { path, source },
        }
    }

    /// Create a conflict error.
    pub fn conflict(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Conflict {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid target error.
    pub fn invalid_target(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid archive error.
    pub fn invalid_archive(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidArchive {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledByUser)
    }

    /// Check whether this error means the target location is occupied.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }

    /// Per-entry failures carried by a partial failure, empty otherwise.
    pub fn failures(&self) -> &[EntryFailure] {
        match self {
            Self::PartialFailure(failures) => failures,
            _ => &[],
        }
    }
}

/// Helper for attaching path context to `std::io::Result`.
pub trait IoResultExt<T> {
    /// Convert the I/O error into an [`OpError`] for `path`.
    fn at(self, path: &Path) -> OpResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> OpResult<T> {
        self.map_err(|e| OpError::io(path, e))
    }
}

/// The failure of one entry within a bulk operation.
#[derive(Debug)]
pub struct EntryFailure {
    /// The entry that failed.
    pub path: PathBuf,
    /// Why it failed.
    pub error: OpError,
}

impl EntryFailure {
    /// Create a new entry failure.
    pub fn new(path: impl Into<PathBuf>, error: OpError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}
