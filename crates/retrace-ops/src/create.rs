//! File and directory creation primitives.

use std::fs::{self, OpenOptions};
use std::path::Path;

use serde::{Deserialize, Serialize};

use retrace_core::{IoResultExt, OpResult};

use crate::conflict::validate_path_name;

/// What to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateKind {
    /// An empty regular file.
    File,
    /// An empty directory.
    Directory,
}

/// Create an empty file or directory at `path`.
///
/// Fails with `AlreadyExists` if anything occupies `path`; the check and the
/// creation are a single system call, so nothing pre-existing is touched.
/// The parent directory must exist.
pub(crate) fn create_path(path: &Path, kind: CreateKind) -> OpResult<()> {
    validate_path_name(path)?;

    match kind {
        CreateKind::File => {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .at(path)?;
        }
        CreateKind::Directory => fs::create_dir(path).at(path)?,
    }
    Ok(())
}
