//! Status provider abstraction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use retrace_core::StatusTag;

/// Status of each immediate child of a directory, keyed by entry name.
///
/// Children without changes are absent.
pub type StatusMap = HashMap<String, StatusTag>;

/// Errors from status queries.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error("Cannot resolve {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of per-entry version-control status.
///
/// Queries may be slow; the engine calls them on worker threads.
pub trait StatusProvider: Send + Sync {
    /// Status of the entries directly inside `dir`.
    ///
    /// A directory outside any repository yields an empty map.
    fn status_of(&self, dir: &Path) -> Result<StatusMap, StatusError>;
}

/// Provider that reports no status for anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatus;

impl StatusProvider for NoStatus {
    fn status_of(&self, _dir: &Path) -> Result<StatusMap, StatusError> {
        Ok(StatusMap::new())
    }
}
