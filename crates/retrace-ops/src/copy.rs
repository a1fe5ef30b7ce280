//! Copy primitives with temp-then-rename discipline.

use std::fs;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use retrace_core::{IoResultExt, OpError, OpResult};

use crate::conflict::{path_occupied, temp_sibling};
use crate::progress::ProgressReporter;

/// Copy `source` (file, directory or symlink) to `dest` atomically.
///
/// The copy is assembled in a hidden sibling of `dest` and renamed into
/// place only when complete, so `dest` either does not exist or holds the
/// full copy. Cancellation is checked between files.
///
/// Returns the number of bytes copied.
pub(crate) fn copy_entry(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<u64> {
    if path_occupied(dest) {
        return Err(OpError::AlreadyExists {
            path: dest.to_path_buf(),
        });
    }

    let temp = temp_sibling(dest);
    let result = copy_tree(source, &temp, cancel, progress).and_then(|bytes| {
        if path_occupied(dest) {
            return Err(OpError::AlreadyExists {
                path: dest.to_path_buf(),
            });
        }
        fs::rename(&temp, dest).at(dest)?;
        Ok(bytes)
    });

    if result.is_err() && path_occupied(&temp) {
        debug!(temp = %temp.display(), "discarding partial copy");
        let _ = remove_path(&temp);
    }

    result
}

/// Recursively copy without any atomicity guarantees.
pub(crate) fn copy_tree(
    source: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
) -> OpResult<u64> {
    if cancel.is_cancelled() {
        return Err(OpError::CancelledByUser);
    }

    let metadata = fs::symlink_metadata(source).at(source)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        copy_symlink(source, dest)?;
        return Ok(0);
    }

    if file_type.is_dir() {
        fs::create_dir(dest).at(dest)?;

        let mut total_bytes = 0u64;
        for entry in fs::read_dir(source).at(source)? {
            let entry = entry.at(source)?;
            total_bytes += copy_tree(&entry.path(), &dest.join(entry.file_name()), cancel, progress)?;
        }

        // Applied last so read-only directories can still be populated.
        fs::set_permissions(dest, writable_dir_permissions(&metadata)).at(dest)?;
        return Ok(total_bytes);
    }

    let bytes = fs::copy(source, dest).at(dest)?;
    progress.add_bytes(bytes);
    Ok(bytes)
}

/// The source directory's permissions with the owner write bit set, so the
/// copy can always be removed again.
#[cfg(unix)]
fn writable_dir_permissions(metadata: &fs::Metadata) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o200);
    permissions
}

#[cfg(not(unix))]
fn writable_dir_permissions(metadata: &fs::Metadata) -> fs::Permissions {
    let mut permissions = metadata.permissions();
    permissions.set_readonly(false);
    permissions
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> OpResult<()> {
    let target = fs::read_link(source).at(source)?;
    std::os::unix::fs::symlink(&target, dest).at(dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> OpResult<()> {
    // Without portable symlink creation, copy what the link points at.
    fs::copy(source, dest).at(dest).map(|_| ())
}

/// Permanently remove a file, symlink or directory tree.
pub(crate) fn remove_path(path: &Path) -> OpResult<()> {
    let metadata = fs::symlink_metadata(path).at(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).at(path)
    } else {
        fs::remove_file(path).at(path)
    }
}

/// Calculate total bytes for a list of sources.
pub(crate) fn calculate_totals(sources: &[std::path::PathBuf]) -> u64 {
    sources.iter().map(|source| tree_size(source)).sum()
}

/// Total size of the regular files under `path`.
fn tree_size(path: &Path) -> u64 {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return 0;
    };

    if !metadata.is_dir() {
        return if metadata.file_type().is_symlink() { 0 } else { metadata.len() };
    }

    fs::read_dir(path)
        .map(|entries| entries.flatten().map(|entry| tree_size(&entry.path())).sum())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use tempfile::TempDir;

    #[test]
    fn test_copy_entry_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        fs::write(src.join("nested/b.txt"), "world!").unwrap();

        let dest = temp.path().join("copy");
        let mut progress = ProgressReporter::silent(OperationKind::Copy);
        let bytes = copy_entry(&src, &dest, &CancellationToken::new(), &mut progress).unwrap();

        assert_eq!(bytes, 11);
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(dest.join("nested/b.txt")).unwrap(), "world!");
    }

    #[test]
    fn test_copy_entry_cancelled_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let dest = temp.path().join("copy");
        let mut progress = ProgressReporter::silent(OperationKind::Copy);
        let result = copy_entry(&src, &dest, &cancel, &mut progress);

        assert!(matches!(result, Err(OpError::CancelledByUser)));
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().flatten().collect();
        assert_eq!(leftovers.len(), 1, "only the source should remain");
    }

    #[cfg(unix)]
    #[test]
    fn test_copied_read_only_directory_stays_removable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("sealed")).unwrap();
        fs::write(src.join("sealed/a.txt"), "a").unwrap();
        fs::set_permissions(src.join("sealed"), fs::Permissions::from_mode(0o555)).unwrap();

        let dest = temp.path().join("copy");
        let mut progress = ProgressReporter::silent(OperationKind::Copy);
        copy_entry(&src, &dest, &CancellationToken::new(), &mut progress).unwrap();

        let mode = fs::metadata(dest.join("sealed")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        remove_path(&dest).unwrap();
        assert!(!dest.exists());

        fs::set_permissions(src.join("sealed"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_copy_entry_refuses_existing_destination() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), "a").unwrap();
        fs::write(temp.path().join("b"), "b").unwrap();

        let mut progress = ProgressReporter::silent(OperationKind::Copy);
        let result = copy_entry(
            &temp.path().join("a"),
            &temp.path().join("b"),
            &CancellationToken::new(),
            &mut progress,
        );
        assert!(matches!(result, Err(OpError::AlreadyExists { .. })));
        assert_eq!(fs::read_to_string(temp.path().join("b")).unwrap(), "b");
    }
}
