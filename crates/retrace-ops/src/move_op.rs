//! Move primitive with a cross-filesystem fallback.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use retrace_core::{IoResultExt, OpError, OpResult};

use crate::conflict::path_occupied;
use crate::copy::{copy_entry, copy_tree, remove_path};
use crate::operation::OperationKind;
use crate::progress::ProgressReporter;

/// Move `source` to `dest`, which must not exist.
///
/// Tries a rename first (fast path for same filesystem). Across
/// filesystems the entry is copied atomically, then the source is removed.
pub(crate) fn move_path(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(
                source = %source.display(),
                dest = %dest.display(),
                "rename crosses filesystems, falling back to copy"
            );
            copy_then_remove(source, dest, cancel, progress, remove_path)
        }
        Err(e) => Err(OpError::io(source, e)),
    }
}

/// Copy `source` to `dest`, then remove `source` with `remove_source`.
///
/// When the removal fails partway, the removed parts are copied back from
/// `dest` and the copy is discarded only once the source is whole again.
/// If that repair fails as well, `dest` is kept so no data is lost.
fn copy_then_remove<R>(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
    remove_source: R,
) -> OpResult<()>
where
    R: FnOnce(&Path) -> OpResult<()>,
{
    copy_entry(source, dest, cancel, progress)?;

    let Err(error) = remove_source(source) else {
        return Ok(());
    };

    match refill(dest, source) {
        Ok(()) => {
            if let Err(e) = remove_path(dest) {
                warn!(dest = %dest.display(), error = %e, "failed to discard copy after restoring source");
            }
        }
        Err(e) => warn!(
            source = %source.display(),
            dest = %dest.display(),
            error = %e,
            "source partially removed and could not be restored; keeping the copy"
        ),
    }

    Err(error)
}

/// Copy into `to` every part of the tree at `from` that `to` is missing.
fn refill(from: &Path, to: &Path) -> OpResult<()> {
    if !path_occupied(to) {
        let mut progress = ProgressReporter::silent(OperationKind::Move);
        copy_tree(from, to, &CancellationToken::new(), &mut progress)?;
        return Ok(());
    }

    let from_is_dir = fs::symlink_metadata(from).at(from)?.is_dir();
    let to_is_dir = fs::symlink_metadata(to).at(to)?.is_dir();
    if from_is_dir && to_is_dir {
        for entry in fs::read_dir(from).at(from)? {
            let entry = entry.at(from)?;
            refill(&entry.path(), &to.join(entry.file_name()))?;
        }
    }
    Ok(())
}
