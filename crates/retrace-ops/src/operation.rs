//! Operation records and their inverses.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strum::Display;

use retrace_core::{EntryFailure, OpError, OpResult};

use crate::trash::TrashId;

/// The kind of mutation an [`OperationRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum OperationKind {
    Create,
    Rename,
    Delete,
    Copy,
    Move,
    Archive,
    Extract,
}

/// The action that reverses one performed mutation.
///
/// The set is closed: every kind of record maps onto exactly one of these,
/// and [`crate::OperationExecutor::apply_inverse`] matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inverse {
    /// Permanently remove something the operation brought into existence.
    Remove { path: PathBuf },
    /// Rename `from` back to `to`.
    RenameBack { from: PathBuf, to: PathBuf },
    /// Restore a trashed entry to its original location.
    Restore { trash_id: TrashId, original: PathBuf },
    /// Move `from` back to its original location `to`.
    MoveBack { from: PathBuf, to: PathBuf },
}

impl Inverse {
    /// The trash entry backing this inverse, if any.
    pub fn trash_id(&self) -> Option<TrashId> {
        match self {
            Self::Restore { trash_id, .. } => Some(*trash_id),
            _ => None,
        }
    }

    /// Paths the inverse will touch when applied.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Remove { path } => vec![path.clone()],
            Self::RenameBack { from, to } | Self::MoveBack { from, to } => {
                vec![from.clone(), to.clone()]
            }
            Self::Restore { original, .. } => vec![original.clone()],
        }
    }

    /// Get a description of how applying this inverse undoes the operation.
    pub fn describe(&self) -> String {
        match self {
            Self::Remove { path } => format!("Remove '{}'", display_name(path)),
            Self::RenameBack { to, .. } => format!("Rename back to '{}'", display_name(to)),
            Self::Restore { original, .. } => {
                format!("Restore '{}' from trash", display_name(original))
            }
            Self::MoveBack { to, .. } => format!("Move back to '{}'", to.display()),
        }
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A performed mutation plus the inverse that reverses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    /// What was done.
    pub kind: OperationKind,
    /// `(source, destination)` pairs actually performed.
    pub pairs: Vec<(PathBuf, PathBuf)>,
    /// When the operation completed.
    pub timestamp: SystemTime,
    /// How to reverse it.
    pub inverse: Inverse,
}

impl OperationRecord {
    /// Create a record for a single `(source, destination)` pair.
    pub fn new(kind: OperationKind, source: PathBuf, dest: PathBuf, inverse: Inverse) -> Self {
        Self {
            kind,
            pairs: vec![(source, dest)],
            timestamp: SystemTime::now(),
            inverse,
        }
    }

    /// Create a record covering several `(source, destination)` pairs.
    pub fn with_pairs(kind: OperationKind, pairs: Vec<(PathBuf, PathBuf)>, inverse: Inverse) -> Self {
        Self {
            kind,
            pairs,
            timestamp: SystemTime::now(),
            inverse,
        }
    }

    /// Every path the record mentions, sources and destinations.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        self.pairs
            .iter()
            .flat_map(|(src, dst)| [src.clone(), dst.clone()])
            .collect()
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        let Some((source, dest)) = self.pairs.first() else {
            return self.kind.to_string();
        };
        match self.kind {
            OperationKind::Create => format!("Created '{}'", display_name(dest)),
            OperationKind::Rename => {
                format!("Renamed '{}' to '{}'", display_name(source), display_name(dest))
            }
            OperationKind::Delete => format!("Moved '{}' to trash", display_name(source)),
            OperationKind::Copy => format!("Copied '{}'", display_name(source)),
            OperationKind::Move => format!("Moved '{}'", display_name(source)),
            OperationKind::Archive => {
                format!("Archived {} items into '{}'", self.pairs.len(), display_name(dest))
            }
            OperationKind::Extract => format!("Extracted '{}'", display_name(dest)),
        }
    }
}

/// Per-entry outcome of a bulk operation.
///
/// Bulk operations never abort on one entry's failure, so both lists can be
/// non-empty at once.
#[derive(Debug)]
pub struct BulkOutcome {
    /// The kind of bulk operation.
    pub kind: OperationKind,
    /// One record per entry that succeeded, in application order.
    pub records: Vec<OperationRecord>,
    /// One failure per entry that did not.
    pub failures: Vec<EntryFailure>,
    /// Whether the operation stopped early because it was cancelled.
    pub cancelled: bool,
}

impl BulkOutcome {
    /// Create an empty outcome.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Check if every entry succeeded and nothing was cancelled.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// Number of records produced.
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    /// Number of entries that failed.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Record one entry's result.
    pub fn push(&mut self, path: PathBuf, result: Result<OperationRecord, OpError>) {
        match result {
            Ok(record) => self.records.push(record),
            Err(OpError::CancelledByUser) => self.cancelled = true,
            Err(error) => self.failures.push(EntryFailure::new(path, error)),
        }
    }

    /// Split into the produced records and the error summarising what failed.
    ///
    /// Failures win over cancellation in the summary.
    pub fn into_parts(self) -> (Vec<OperationRecord>, Option<OpError>) {
        let error = if !self.failures.is_empty() {
            Some(OpError::PartialFailure(self.failures))
        } else if self.cancelled {
            Some(OpError::CancelledByUser)
        } else {
            None
        };
        (self.records, error)
    }

    /// The records when every entry succeeded, otherwise the summary error.
    pub fn into_result(self) -> OpResult<Vec<OperationRecord>> {
        match self.into_parts() {
            (records, None) => Ok(records),
            (_, Some(error)) => Err(error),
        }
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Create => "Created",
            OperationKind::Rename => "Renamed",
            OperationKind::Delete => "Trashed",
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Archive => "Archived",
            OperationKind::Extract => "Extracted",
        };

        let mut msg = format!("{} {} items", action, self.succeeded());
        if !self.failures.is_empty() {
            msg.push_str(&format!(", {} failed", self.failed()));
        }
        if self.cancelled {
            msg.push_str(" (cancelled)");
        }
        msg
    }
}
