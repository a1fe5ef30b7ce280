//! Jobs, task identifiers and the events the engine emits.

use std::fmt;
use std::path::PathBuf;

use strum::Display;

use retrace_core::{EntryFailure, OpError};
use retrace_ops::{CreateKind, OperationProgress, OperationRecord};

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A command for the engine to carry out in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Create an empty file or directory.
    Create { path: PathBuf, kind: CreateKind },
    /// Rename `from` to `to`.
    Rename { from: PathBuf, to: PathBuf },
    /// Move every path to the trash.
    Delete { paths: Vec<PathBuf> },
    /// Copy every source into `dest_dir`.
    Copy {
        sources: Vec<PathBuf>,
        dest_dir: PathBuf,
    },
    /// Move every source into `dest_dir`.
    Move {
        sources: Vec<PathBuf>,
        dest_dir: PathBuf,
    },
    /// Paste the clipboard payload into `dest_dir`.
    Paste { dest_dir: PathBuf },
    /// Pack `sources` into a zip archive at `dest`.
    CreateArchive {
        sources: Vec<PathBuf>,
        dest: PathBuf,
        overwrite: bool,
    },
    /// Unpack `archive` into `dest_dir`.
    ExtractArchive { archive: PathBuf, dest_dir: PathBuf },
    /// Reverse the most recent recorded operation.
    Undo,
}

impl Job {
    /// The kind of this job.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Create { .. } => JobKind::Create,
            Self::Rename { .. } => JobKind::Rename,
            Self::Delete { .. } => JobKind::Delete,
            Self::Copy { .. } => JobKind::Copy,
            Self::Move { .. } => JobKind::Move,
            Self::Paste { .. } => JobKind::Paste,
            Self::CreateArchive { .. } => JobKind::CreateArchive,
            Self::ExtractArchive { .. } => JobKind::ExtractArchive,
            Self::Undo => JobKind::Undo,
        }
    }
}

/// Job discriminant, for reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum JobKind {
    Create,
    Rename,
    Delete,
    Copy,
    Move,
    Paste,
    CreateArchive,
    ExtractArchive,
    Undo,
}

/// What a finished job did.
#[derive(Debug)]
pub struct TaskReport {
    /// The job's kind.
    pub kind: JobKind,
    /// Records pushed onto the undo stack, in application order.
    ///
    /// For an undo, the record that was reversed.
    pub records: Vec<OperationRecord>,
    /// Why the job did not fully succeed.
    pub error: Option<OpError>,
    /// Whether the job stopped because it was cancelled.
    pub cancelled: bool,
}

impl TaskReport {
    /// Create a report for a job that produced `records`.
    pub fn new(kind: JobKind, records: Vec<OperationRecord>, error: Option<OpError>) -> Self {
        let cancelled = matches!(error, Some(OpError::CancelledByUser));
        Self {
            kind,
            records,
            error,
            cancelled,
        }
    }

    /// Create a report for a job that never ran.
    pub fn cancelled(kind: JobKind) -> Self {
        Self::new(kind, Vec::new(), Some(OpError::CancelledByUser))
    }

    /// Check if the job succeeded completely.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Per-entry failures of a bulk job.
    pub fn failures(&self) -> &[EntryFailure] {
        self.error.as_ref().map(OpError::failures).unwrap_or(&[])
    }
}

/// Notifications drained from the engine by the control thread.
#[derive(Debug)]
pub enum EngineEvent {
    /// A running job reported progress.
    Progress {
        task: TaskId,
        progress: OperationProgress,
    },
    /// A job finished; engine state already reflects it.
    Finished { task: TaskId, report: TaskReport },
    /// Fresh status information is cached for `dir`.
    StatusUpdated { dir: PathBuf },
}
