//! Operation executor: blocking primitives that produce undo records.
//!
//! Every method here runs on the calling thread. The engine moves them onto
//! worker threads; tests call them directly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use retrace_core::{normalize_path, IoResultExt, OpError, OpResult};

use crate::conflict::{path_occupied, unique_destination, validate_path_name};
use crate::copy::{calculate_totals, copy_entry, remove_path};
use crate::create::{create_path, CreateKind};
use crate::move_op::move_path;
use crate::operation::{BulkOutcome, Inverse, OperationKind, OperationRecord};
use crate::progress::{ProgressReporter, ProgressSender};
use crate::rename::rename_path;
use crate::trash::TrashStore;

/// Executor for reversible file operations.
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    trash: Arc<TrashStore>,
}

impl OperationExecutor {
    /// Create an executor that deletes into `trash`.
    pub fn new(trash: Arc<TrashStore>) -> Self {
        Self { trash }
    }

    /// The trash store deletions go to.
    pub fn trash(&self) -> &Arc<TrashStore> {
        &self.trash
    }

    /// Create an empty file or directory.
    pub fn create(&self, path: &Path, kind: CreateKind) -> OpResult<OperationRecord> {
        validate_path_name(path)?;
        let path = normalize_path(path);
        create_path(&path, kind)?;
        debug!(path = %path.display(), ?kind, "created");

        Ok(OperationRecord::new(
            OperationKind::Create,
            path.clone(),
            path.clone(),
            Inverse::Remove { path },
        ))
    }

    /// Rename `old` to `new`.
    pub fn rename(&self, old: &Path, new: &Path) -> OpResult<OperationRecord> {
        validate_path_name(new)?;
        let old = normalize_path(old);
        let new = normalize_path(new);
        rename_path(&old, &new)?;
        debug!(from = %old.display(), to = %new.display(), "renamed");

        Ok(OperationRecord::new(
            OperationKind::Rename,
            old.clone(),
            new.clone(),
            Inverse::RenameBack { from: new, to: old },
        ))
    }

    /// Move `path` into the trash.
    pub fn delete(&self, path: &Path) -> OpResult<OperationRecord> {
        let entry = self.trash.store(path)?;

        Ok(OperationRecord::new(
            OperationKind::Delete,
            entry.original_path.clone(),
            entry.stored_path,
            Inverse::Restore {
                trash_id: entry.id,
                original: entry.original_path,
            },
        ))
    }

    /// Copy `source` into `dest_dir`, suffixing the name on collision.
    pub fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> OpResult<OperationRecord> {
        let mut progress = ProgressReporter::silent(OperationKind::Copy);
        self.copy_one(source, dest_dir, cancel, &mut progress)
    }

    /// Move `source` into `dest_dir`, suffixing the name on collision.
    pub fn move_to(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> OpResult<OperationRecord> {
        let mut progress = ProgressReporter::silent(OperationKind::Move);
        self.move_one(source, dest_dir, cancel, &mut progress)
    }

    /// Trash every path, continuing past per-entry failures.
    pub fn delete_all(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        tx: &ProgressSender,
    ) -> BulkOutcome {
        let mut progress = ProgressReporter::new(OperationKind::Delete, paths.len(), 0, tx.clone());
        run_bulk(OperationKind::Delete, paths, cancel, &mut progress, |path, _| {
            self.delete(path)
        })
    }

    /// Copy every path into `dest_dir`, continuing past per-entry failures.
    pub fn copy_all(
        &self,
        paths: &[PathBuf],
        dest_dir: &Path,
        cancel: &CancellationToken,
        tx: &ProgressSender,
    ) -> BulkOutcome {
        let mut progress = ProgressReporter::new(
            OperationKind::Copy,
            paths.len(),
            calculate_totals(paths),
            tx.clone(),
        );
        run_bulk(OperationKind::Copy, paths, cancel, &mut progress, |path, progress| {
            self.copy_one(path, dest_dir, cancel, progress)
        })
    }

    /// Move every path into `dest_dir`, continuing past per-entry failures.
    pub fn move_all(
        &self,
        paths: &[PathBuf],
        dest_dir: &Path,
        cancel: &CancellationToken,
        tx: &ProgressSender,
    ) -> BulkOutcome {
        let mut progress = ProgressReporter::new(OperationKind::Move, paths.len(), 0, tx.clone());
        run_bulk(OperationKind::Move, paths, cancel, &mut progress, |path, progress| {
            self.move_one(path, dest_dir, cancel, progress)
        })
    }

    /// Apply an inverse, reversing the operation it was recorded for.
    ///
    /// Nothing that occupies a target location is ever overwritten.
    pub fn apply_inverse(&self, inverse: &Inverse) -> OpResult<()> {
        match inverse {
            Inverse::Remove { path } => {
                if !path_occupied(path) {
                    warn!(path = %path.display(), "undo target already gone");
                    return Ok(());
                }
                remove_path(path)?;
            }
            Inverse::RenameBack { from, to } => {
                check_reversible(from, to)?;
                fs::rename(from, to).at(from)?;
            }
            Inverse::MoveBack { from, to } => {
                check_reversible(from, to)?;
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent).at(parent)?;
                }
                let mut progress = ProgressReporter::silent(OperationKind::Move);
                move_path(from, to, &CancellationToken::new(), &mut progress)?;
            }
            Inverse::Restore { trash_id, .. } => {
                self.trash.restore(*trash_id)?;
            }
        }

        info!(action = %inverse.describe(), "undo applied");
        Ok(())
    }

    fn copy_one(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> OpResult<OperationRecord> {
        let (source, dest_dir) = resolve_transfer(source, dest_dir)?;

        if dest_dir.starts_with(&source) {
            return Err(OpError::invalid_target(
                &dest_dir,
                "cannot copy a directory into itself",
            ));
        }

        let dest = destination_for(&source, &dest_dir)?;
        copy_entry(&source, &dest, cancel, progress)?;
        debug!(source = %source.display(), dest = %dest.display(), "copied");

        Ok(OperationRecord::new(
            OperationKind::Copy,
            source,
            dest.clone(),
            Inverse::Remove { path: dest },
        ))
    }

    fn move_one(
        &self,
        source: &Path,
        dest_dir: &Path,
        cancel: &CancellationToken,
        progress: &mut ProgressReporter,
    ) -> OpResult<OperationRecord> {
        let (source, dest_dir) = resolve_transfer(source, dest_dir)?;

        if source.parent() == Some(dest_dir.as_path()) {
            return Err(OpError::invalid_target(
                &dest_dir,
                "source and destination are the same location",
            ));
        }
        if dest_dir.starts_with(&source) {
            return Err(OpError::invalid_target(
                &dest_dir,
                "cannot move a directory into itself",
            ));
        }

        let dest = destination_for(&source, &dest_dir)?;
        move_path(&source, &dest, cancel, progress)?;
        debug!(source = %source.display(), dest = %dest.display(), "moved");

        Ok(OperationRecord::new(
            OperationKind::Move,
            source.clone(),
            dest.clone(),
            Inverse::MoveBack {
                from: dest,
                to: source,
            },
        ))
    }
}

/// Drive `op` over `paths` one entry at a time.
///
/// Per-entry failures are collected; only cancellation stops the loop.
pub(crate) fn run_bulk<F>(
    kind: OperationKind,
    paths: &[PathBuf],
    cancel: &CancellationToken,
    progress: &mut ProgressReporter,
    mut op: F,
) -> BulkOutcome
where
    F: FnMut(&Path, &mut ProgressReporter) -> OpResult<OperationRecord>,
{
    let mut outcome = BulkOutcome::new(kind);

    for path in paths {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            break;
        }

        progress.set_current_file(Some(path.clone()));
        let result = op(path, progress);
        match &result {
            Ok(_) => progress.complete_file(),
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "{} failed for entry", kind);
                progress.fail_file();
            }
        }

        outcome.push(path.clone(), result);
        if outcome.cancelled {
            break;
        }
    }

    progress.set_current_file(None);
    info!(summary = %outcome.summary(), "bulk operation finished");
    outcome
}

/// Normalize and validate a copy or move request.
fn resolve_transfer(source: &Path, dest_dir: &Path) -> OpResult<(PathBuf, PathBuf)> {
    let source = normalize_path(source);
    let dest_dir = normalize_path(dest_dir);

    if !path_occupied(&source) {
        return Err(OpError::NotFound { path: source });
    }

    let metadata = fs::metadata(&dest_dir).at(&dest_dir)?;
    if !metadata.is_dir() {
        return Err(OpError::invalid_target(&dest_dir, "destination is not a directory"));
    }

    Ok((source, dest_dir))
}

fn destination_for(source: &Path, dest_dir: &Path) -> OpResult<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| OpError::invalid_target(source, "source has no file name"))?;
    Ok(unique_destination(dest_dir, name))
}

/// `from` must still exist and `to` must still be free.
fn check_reversible(from: &Path, to: &Path) -> OpResult<()> {
    if !path_occupied(from) {
        return Err(OpError::NotFound {
            path: from.to_path_buf(),
        });
    }
    if path_occupied(to) {
        return Err(OpError::conflict(to, "original location is occupied"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, OperationExecutor) {
        let temp = TempDir::new().unwrap();
        let trash = TrashStore::open(temp.path().join(".trash")).unwrap();
        (temp, OperationExecutor::new(Arc::new(trash)))
    }

    #[test]
    fn test_copy_collision_suffix() {
        let (temp, executor) = setup();
        let file = temp.path().join("report.txt");
        fs::write(&file, "x").unwrap();

        let record = executor
            .copy(&file, temp.path(), &CancellationToken::new())
            .unwrap();
        assert_eq!(record.pairs[0].1.file_name().unwrap(), "report (1).txt");
    }

    #[test]
    fn test_copy_into_itself_rejected() {
        let (temp, executor) = setup();
        let dir = temp.path().join("dir");
        fs::create_dir_all(dir.join("sub")).unwrap();

        let result = executor.copy(&dir, &dir.join("sub"), &CancellationToken::new());
        assert!(matches!(result, Err(OpError::InvalidTarget { .. })));
    }

    #[test]
    fn test_move_same_location_rejected() {
        let (temp, executor) = setup();
        let file = temp.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let result = executor.move_to(&file, temp.path(), &CancellationToken::new());
        assert!(matches!(result, Err(OpError::InvalidTarget { .. })));
        assert!(file.exists());
    }

    #[test]
    fn test_move_back_conflict() {
        let (temp, executor) = setup();
        let file = temp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir(&dest).unwrap();

        let record = executor
            .move_to(&file, &dest, &CancellationToken::new())
            .unwrap();
        fs::write(&file, "squatter").unwrap();

        let result = executor.apply_inverse(&record.inverse);
        assert!(matches!(result, Err(OpError::Conflict { .. })));
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn test_rename_back() {
        let (temp, executor) = setup();
        let old = temp.path().join("old");
        fs::write(&old, "x").unwrap();

        let record = executor.rename(&old, &temp.path().join("new")).unwrap();
        executor.apply_inverse(&record.inverse).unwrap();
        assert!(old.exists());
        assert!(!temp.path().join("new").exists());
    }

    #[test]
    fn test_remove_inverse_missing_is_ok() {
        let (temp, executor) = setup();
        let inverse = Inverse::Remove {
            path: temp.path().join("never-existed"),
        };
        assert!(executor.apply_inverse(&inverse).is_ok());
    }

    #[test]
    fn test_bulk_stops_on_cancel() {
        let (temp, executor) = setup();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = temp.path().join(format!("f{i}"));
                fs::write(&path, "x").unwrap();
                path
            })
            .collect();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = executor.delete_all(&paths, &cancel, &ProgressSender::none());

        assert!(outcome.cancelled);
        assert!(outcome.records.is_empty());
        assert!(paths.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_cancel_mid_bulk_keeps_completed_prefix() {
        let (temp, executor) = setup();
        let paths: Vec<PathBuf> = (0..4)
            .map(|i| {
                let path = temp.path().join(format!("f{i}"));
                fs::write(&path, "x").unwrap();
                path
            })
            .collect();

        let cancel = CancellationToken::new();
        let mut progress = ProgressReporter::silent(OperationKind::Delete);
        let mut done = 0;
        let outcome = run_bulk(OperationKind::Delete, &paths, &cancel, &mut progress, |path, _| {
            let result = executor.delete(path);
            done += 1;
            if done == 2 {
                cancel.cancel();
            }
            result
        });

        assert!(outcome.cancelled);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.records.len(), 2);
        assert!(!paths[0].exists() && !paths[1].exists());
        assert!(paths[2].exists() && paths[3].exists());
        assert_eq!(executor.trash().len().unwrap(), 2);

        let (records, error) = outcome.into_parts();
        assert!(matches!(error, Some(OpError::CancelledByUser)));
        for record in records.iter().rev() {
            executor.apply_inverse(&record.inverse).unwrap();
        }
        assert!(paths.iter().all(|p| p.exists()));
    }
}
