//! Rename primitive.

use std::fs;
use std::path::Path;

use retrace_core::{IoResultExt, OpError, OpResult};

use crate::conflict::{path_occupied, validate_path_name};

/// Rename `source` to `dest` without ever replacing an existing entry.
pub(crate) fn rename_path(source: &Path, dest: &Path) -> OpResult<()> {
    validate_path_name(dest)?;

    if !path_occupied(source) {
        return Err(OpError::NotFound {
            path: source.to_path_buf(),
        });
    }

    // A case-only rename on a case-insensitive filesystem sees `dest` as taken.
    if path_occupied(dest) && !same_entry(source, dest) {
        return Err(OpError::AlreadyExists {
            path: dest.to_path_buf(),
        });
    }

    fs::rename(source, dest).at(source)
}

#[cfg(unix)]
fn same_entry(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_entry(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}
