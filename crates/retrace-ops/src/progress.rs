//! Progress reporting types for file operations.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::operation::OperationKind;

/// Progress information for an ongoing operation.
#[derive(Debug, Clone)]
pub struct OperationProgress {
    /// The kind of operation.
    pub kind: OperationKind,
    /// Number of entries (or archive members) completed.
    pub files_completed: usize,
    /// Number of entries that failed.
    pub files_failed: usize,
    /// Total number of entries to process.
    pub files_total: usize,
    /// Number of bytes processed so far.
    pub bytes_processed: u64,
    /// Total bytes to process (may be 0 if unknown).
    pub bytes_total: u64,
    /// The entry currently being processed.
    pub current_file: Option<PathBuf>,
}

impl OperationProgress {
    /// Create a new progress tracker for an operation.
    pub fn new(kind: OperationKind, files_total: usize, bytes_total: u64) -> Self {
        Self {
            kind,
            files_completed: 0,
            files_failed: 0,
            files_total,
            bytes_processed: 0,
            bytes_total,
            current_file: None,
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
        } else if self.files_total > 0 {
            ((self.files_completed + self.files_failed) as f64 / self.files_total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Check if the operation has any failures so far.
    pub fn has_errors(&self) -> bool {
        self.files_failed > 0
    }
}

/// Sending half of a progress channel; may be disconnected.
///
/// Progress is advisory: updates are dropped rather than blocking a worker
/// when the receiver falls behind.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender(Option<mpsc::Sender<OperationProgress>>);

impl ProgressSender {
    /// Wrap a channel sender.
    pub fn new(tx: mpsc::Sender<OperationProgress>) -> Self {
        Self(Some(tx))
    }

    /// A sender that discards every update.
    pub fn none() -> Self {
        Self(None)
    }

    fn send(&self, progress: &OperationProgress) {
        if let Some(tx) = &self.0 {
            let _ = tx.try_send(progress.clone());
        }
    }
}

/// Tracks progress for one operation and publishes updates.
#[derive(Debug)]
pub struct ProgressReporter {
    progress: OperationProgress,
    tx: ProgressSender,
}

impl ProgressReporter {
    /// Create a reporter publishing to `tx`.
    pub fn new(kind: OperationKind, files_total: usize, bytes_total: u64, tx: ProgressSender) -> Self {
        Self {
            progress: OperationProgress::new(kind, files_total, bytes_total),
            tx,
        }
    }

    /// Create a reporter that publishes nothing.
    pub fn silent(kind: OperationKind) -> Self {
        Self::new(kind, 0, 0, ProgressSender::none())
    }

    /// Current progress.
    pub fn progress(&self) -> &OperationProgress {
        &self.progress
    }

    /// Update the entry being processed and publish.
    pub fn set_current_file(&mut self, path: Option<PathBuf>) {
        self.progress.current_file = path;
        self.tx.send(&self.progress);
    }

    /// Account for bytes written without finishing an entry.
    pub fn add_bytes(&mut self, bytes: u64) {
        self.progress.bytes_processed += bytes;
    }

    /// Increment the completed count and publish.
    pub fn complete_file(&mut self) {
        self.progress.files_completed += 1;
        self.tx.send(&self.progress);
    }

    /// Increment the failed count and publish.
    pub fn fail_file(&mut self) {
        self.progress.files_failed += 1;
        self.tx.send(&self.progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_prefers_bytes() {
        let mut progress = OperationProgress::new(OperationKind::Copy, 4, 200);
        progress.bytes_processed = 50;
        progress.files_completed = 3;
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_by_files() {
        let mut progress = OperationProgress::new(OperationKind::Delete, 4, 0);
        progress.files_completed = 1;
        progress.files_failed = 1;
        assert!((progress.percentage() - 50.0).abs() < f64::EPSILON);
        assert!(progress.has_errors());
    }

    #[test]
    fn test_reporter_publishes() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut reporter = ProgressReporter::new(OperationKind::Move, 2, 0, ProgressSender::new(tx));
        reporter.set_current_file(Some(PathBuf::from("/a")));
        reporter.complete_file();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.current_file, Some(PathBuf::from("/a")));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.files_completed, 1);
    }
}
