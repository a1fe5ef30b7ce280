//! Bounded undo stack.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, warn};

use retrace_core::{OpError, OpResult};

use crate::executor::OperationExecutor;
use crate::operation::OperationRecord;
use crate::trash::TrashStore;

/// An entry in the undo stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    /// Unique ID for this entry.
    pub id: u64,
    /// The operation that was performed.
    pub record: OperationRecord,
}

impl UndoEntry {
    /// Get a description of how undoing this entry reverses it.
    pub fn undo_description(&self) -> String {
        self.record.inverse.describe()
    }
}

/// Whether there is anything to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UndoState {
    Idle,
    HasHistory,
}

/// Undo stack with bounded capacity.
///
/// Only the top entry can be undone. Evicting a delete-backed entry purges
/// its trash payload, since nothing can restore it any more.
#[derive(Debug)]
pub struct UndoManager {
    entries: VecDeque<UndoEntry>,
    capacity: usize,
    next_id: u64,
    trash: Arc<TrashStore>,
}

impl UndoManager {
    /// Create a new undo manager holding at most `capacity` entries.
    pub fn new(capacity: usize, trash: Arc<TrashStore>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
            trash,
        }
    }

    /// Push a record, returning the entries evicted to make room.
    pub fn push(&mut self, record: OperationRecord) -> Vec<UndoEntry> {
        let id = self.next_id;
        self.next_id += 1;
        debug!(id, description = %record.description(), "recorded for undo");
        self.entries.push_back(UndoEntry { id, record });

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(entry) = self.entries.pop_front() {
                self.purge_backing(&entry);
                evicted.push(entry);
            }
        }
        evicted
    }

    /// Undo the top entry.
    ///
    /// On failure the stack is left unchanged.
    pub fn undo(&mut self, executor: &OperationExecutor) -> OpResult<UndoEntry> {
        let top = self.entries.back().ok_or(OpError::NothingToUndo)?;
        executor.apply_inverse(&top.record.inverse)?;
        self.entries.pop_back().ok_or(OpError::NothingToUndo)
    }

    /// Remove the top entry if it is still `id`.
    ///
    /// Used when the inverse was applied elsewhere. Entries below the top are
    /// never removed.
    pub fn finish_undo(&mut self, id: u64) -> Option<UndoEntry> {
        match self.entries.back() {
            Some(top) if top.id == id => self.entries.pop_back(),
            _ => {
                warn!(id, "undone entry is no longer on top of the stack");
                None
            }
        }
    }

    /// Get the entry that would be undone next.
    pub fn peek(&self) -> Option<&UndoEntry> {
        self.entries.back()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current state.
    pub fn state(&self) -> UndoState {
        if self.entries.is_empty() {
            UndoState::Idle
        } else {
            UndoState::HasHistory
        }
    }

    /// Iterate entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &UndoEntry> {
        self.entries.iter().rev()
    }

    /// Undo descriptions, newest first.
    pub fn describe(&self) -> Vec<String> {
        self.iter().map(UndoEntry::undo_description).collect()
    }

    /// Drop all history, purging trash payloads nothing can restore.
    pub fn clear(&mut self) {
        for entry in std::mem::take(&mut self.entries) {
            self.purge_backing(&entry);
        }
    }

    fn purge_backing(&self, entry: &UndoEntry) {
        let Some(trash_id) = entry.record.inverse.trash_id() else {
            return;
        };
        match self.trash.purge(trash_id) {
            Ok(()) => debug!(id = entry.id, %trash_id, "purged trash for evicted entry"),
            Err(OpError::NotFound { .. }) => {}
            Err(e) => warn!(id = entry.id, %trash_id, error = %e, "failed to purge trash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Inverse, OperationKind};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn manager(capacity: usize) -> (TempDir, UndoManager) {
        let temp = TempDir::new().unwrap();
        let trash = Arc::new(TrashStore::open(temp.path().join("trash")).unwrap());
        (temp, UndoManager::new(capacity, trash))
    }

    fn record(name: &str) -> OperationRecord {
        let path = PathBuf::from("/tmp").join(name);
        OperationRecord::new(
            OperationKind::Create,
            path.clone(),
            path.clone(),
            Inverse::Remove { path },
        )
    }

    #[test]
    fn test_push_evicts_oldest() {
        let (_temp, mut undo) = manager(2);
        assert_eq!(undo.state(), UndoState::Idle);

        assert!(undo.push(record("a")).is_empty());
        assert!(undo.push(record("b")).is_empty());
        let evicted = undo.push(record("c"));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, 1);
        assert_eq!(undo.len(), 2);
        assert_eq!(undo.state(), UndoState::HasHistory);
    }

    #[test]
    fn test_finish_undo_by_id() {
        let (_temp, mut undo) = manager(10);
        undo.push(record("a"));
        undo.push(record("b"));

        assert!(undo.finish_undo(2).is_some());
        assert_eq!(undo.peek().unwrap().id, 1);
        assert!(undo.finish_undo(99).is_none());
        assert_eq!(undo.len(), 1);
    }

    #[test]
    fn test_finish_undo_never_removes_below_top() {
        let (_temp, mut undo) = manager(10);
        undo.push(record("a"));
        undo.push(record("b"));

        assert!(undo.finish_undo(1).is_none());
        assert_eq!(undo.len(), 2);
        assert_eq!(undo.peek().unwrap().id, 2);
    }

    #[test]
    fn test_describe_newest_first() {
        let (_temp, mut undo) = manager(10);
        undo.push(record("a"));
        undo.push(record("b"));
        assert_eq!(undo.describe(), vec!["Remove 'b'", "Remove 'a'"]);
    }
}
