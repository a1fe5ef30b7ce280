//! Selection and clipboard state.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexSet;
use strum::Display;

use retrace_core::{OpError, OpResult};

/// Ordered set of selected paths within one directory.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    dir: Option<PathBuf>,
    paths: IndexSet<PathBuf>,
}

impl SelectionSet {
    /// Create an empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory the selection belongs to.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Move to `dir`, clearing the selection if it belongs elsewhere.
    ///
    /// Returns `true` when the selection was cleared.
    pub fn navigate(&mut self, dir: &Path) -> bool {
        if self.dir.as_deref() == Some(dir) {
            return false;
        }
        self.dir = Some(dir.to_path_buf());
        let cleared = !self.paths.is_empty();
        self.paths.clear();
        cleared
    }

    /// Flip the selection state of `path`, returning whether it is now selected.
    pub fn toggle(&mut self, path: PathBuf) -> bool {
        if self.paths.shift_remove(&path) {
            false
        } else {
            self.paths.insert(path);
            true
        }
    }

    /// Add `path` to the selection.
    pub fn select(&mut self, path: PathBuf) {
        self.paths.insert(path);
    }

    /// Remove every path.
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Check if `path` is selected.
    pub fn is_selected(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Selected paths in selection order.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Snapshot of the selected paths.
    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.paths.iter().cloned().collect()
    }

    /// Drop paths that no longer name anything.
    pub fn forget<'a>(&mut self, paths: impl IntoIterator<Item = &'a PathBuf>) {
        for path in paths {
            self.paths.shift_remove(path);
        }
    }

    /// Number of selected paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Check if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// What a paste does with the clipboard payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ClipboardMode {
    #[default]
    None,
    Copy,
    Cut,
}

/// Paths captured by a copy or cut.
///
/// The payload is a snapshot, independent of later selection changes.
/// Every replacement bumps `generation`.
#[derive(Debug, Clone)]
pub struct Clipboard {
    mode: ClipboardMode,
    payload: Vec<PathBuf>,
    captured_at: SystemTime,
    generation: u64,
}

impl Default for Clipboard {
    fn default() -> Self {
        Self {
            mode: ClipboardMode::None,
            payload: Vec::new(),
            captured_at: SystemTime::UNIX_EPOCH,
            generation: 0,
        }
    }
}

impl Clipboard {
    /// Create an empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the clipboard wholesale.
    pub fn capture(&mut self, mode: ClipboardMode, payload: Vec<PathBuf>) -> OpResult<u64> {
        if payload.is_empty() {
            return Err(OpError::NothingSelected);
        }
        self.generation += 1;
        self.mode = mode;
        self.payload = payload;
        self.captured_at = SystemTime::now();
        Ok(self.generation)
    }

    /// Empty the clipboard.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.mode = ClipboardMode::None;
        self.payload.clear();
    }

    /// Keep only `remaining` if the clipboard is still at `generation`.
    ///
    /// An empty `remaining` clears the clipboard. Returns `false` when the
    /// clipboard was replaced in the meantime and nothing changed.
    pub fn settle(&mut self, generation: u64, remaining: Vec<PathBuf>) -> bool {
        if self.generation != generation {
            return false;
        }
        if remaining.is_empty() {
            self.clear();
        } else {
            self.payload = remaining;
        }
        true
    }

    /// Current mode.
    pub fn mode(&self) -> ClipboardMode {
        self.mode
    }

    /// Captured paths.
    pub fn payload(&self) -> &[PathBuf] {
        &self.payload
    }

    /// When the payload was captured.
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Replacement counter.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if there is nothing to paste.
    pub fn is_empty(&self) -> bool {
        self.mode == ClipboardMode::None || self.payload.is_empty()
    }
}
