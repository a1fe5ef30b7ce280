//! Engine-owned trash store.
//!
//! Each trashed entry lives in its own numbered directory under the root:
//!
//! ```text
//! <root>/<id>/payload     the moved file, directory or symlink
//! <root>/<id>/entry.json  original path and deletion time
//! ```
//!
//! The filesystem is the index, so a store reopened on the same root sees
//! every entry that was not purged and never reuses an id.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use retrace_core::{normalize_path, IoResultExt, OpError, OpResult};

use crate::conflict::path_occupied;
use crate::copy::remove_path;
use crate::move_op::move_path;
use crate::operation::OperationKind;
use crate::progress::ProgressReporter;

const PAYLOAD_NAME: &str = "payload";
const METADATA_NAME: &str = "entry.json";

/// Identifier of one trashed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrashId(pub u64);

impl fmt::Display for TrashId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry held by the trash store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashEntry {
    /// Store-assigned identifier.
    pub id: TrashId,
    /// Where the entry lived before deletion.
    pub original_path: PathBuf,
    /// Where the entry lives now.
    pub stored_path: PathBuf,
    /// When it was trashed.
    pub deleted_at: DateTime<Utc>,
}

/// On-disk metadata for one entry.
#[derive(Debug, Serialize, Deserialize)]
struct TrashMetadata {
    original_path: PathBuf,
    deleted_at: DateTime<Utc>,
}

/// A trash directory owned by one engine instance.
#[derive(Debug)]
pub struct TrashStore {
    root: PathBuf,
    next_id: AtomicU64,
}

impl TrashStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> OpResult<Self> {
        let root = normalize_path(root.as_ref());
        fs::create_dir_all(&root).at(&root)?;

        let highest = fs::read_dir(&root)
            .at(&root)?
            .flatten()
            .filter_map(|entry| parse_id(&entry.file_name().to_string_lossy()))
            .map(|id| id.0)
            .max()
            .unwrap_or(0);

        debug!(root = %root.display(), next_id = highest + 1, "opened trash store");

        Ok(Self {
            root,
            next_id: AtomicU64::new(highest + 1),
        })
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `path` into the store.
    pub fn store(&self, path: &Path) -> OpResult<TrashEntry> {
        let path = normalize_path(path);
        fs::symlink_metadata(&path).at(&path)?;

        if path.starts_with(&self.root) || self.root.starts_with(&path) {
            return Err(OpError::invalid_target(
                &path,
                "cannot trash the trash directory or anything inside it",
            ));
        }

        let (id, entry_dir) = self.allocate()?;
        let metadata = TrashMetadata {
            original_path: path.clone(),
            deleted_at: Utc::now(),
        };

        let result = write_metadata(&entry_dir, &metadata).and_then(|()| {
            let mut progress = ProgressReporter::silent(OperationKind::Delete);
            move_path(
                &path,
                &entry_dir.join(PAYLOAD_NAME),
                &CancellationToken::new(),
                &mut progress,
            )
        });

        if let Err(e) = result {
            if path_occupied(&entry_dir.join(PAYLOAD_NAME)) {
                // The payload is the only complete copy left.
                warn!(id = %id, path = %path.display(), error = %e, "kept partial trash entry");
            } else {
                let _ = fs::remove_dir_all(&entry_dir);
            }
            return Err(e);
        }

        info!(id = %id, path = %path.display(), "moved to trash");

        Ok(TrashEntry {
            id,
            original_path: metadata.original_path,
            stored_path: entry_dir.join(PAYLOAD_NAME),
            deleted_at: metadata.deleted_at,
        })
    }

    /// Move entry `id` back to its original path.
    ///
    /// Never overwrites: an occupied original path is a `Conflict` and the
    /// entry stays in the store.
    pub fn restore(&self, id: TrashId) -> OpResult<PathBuf> {
        let entry = self.get(id)?;

        if path_occupied(&entry.original_path) {
            return Err(OpError::conflict(
                &entry.original_path,
                "original location is occupied",
            ));
        }

        if let Some(parent) = entry.original_path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let mut progress = ProgressReporter::silent(OperationKind::Delete);
        move_path(
            &entry.stored_path,
            &entry.original_path,
            &CancellationToken::new(),
            &mut progress,
        )?;

        let entry_dir = self.entry_dir(id);
        if let Err(e) = fs::remove_dir_all(&entry_dir) {
            warn!(id = %id, error = %e, "failed to clean up restored trash entry");
        }

        info!(id = %id, path = %entry.original_path.display(), "restored from trash");
        Ok(entry.original_path)
    }

    /// Permanently delete entry `id`.
    pub fn purge(&self, id: TrashId) -> OpResult<()> {
        let entry_dir = self.entry_dir(id);
        if !entry_dir.is_dir() {
            return Err(OpError::NotFound { path: entry_dir });
        }
        remove_path(&entry_dir)?;
        debug!(id = %id, "purged trash entry");
        Ok(())
    }

    /// Look up entry `id`.
    pub fn get(&self, id: TrashId) -> OpResult<TrashEntry> {
        let entry_dir = self.entry_dir(id);
        let stored_path = entry_dir.join(PAYLOAD_NAME);
        if !path_occupied(&stored_path) {
            return Err(OpError::NotFound { path: entry_dir });
        }

        let metadata = read_metadata(&entry_dir)?;
        Ok(TrashEntry {
            id,
            original_path: metadata.original_path,
            stored_path,
            deleted_at: metadata.deleted_at,
        })
    }

    /// Every entry in the store, sorted by id.
    ///
    /// Directories that are not complete entries are skipped.
    pub fn list(&self) -> OpResult<Vec<TrashEntry>> {
        let mut entries: Vec<TrashEntry> = fs::read_dir(&self.root)
            .at(&self.root)?
            .flatten()
            .filter_map(|dir_entry| parse_id(&dir_entry.file_name().to_string_lossy()))
            .filter_map(|id| match self.get(id) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(id = %id, error = %e, "skipping incomplete trash entry");
                    None
                }
            })
            .collect();

        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    /// Number of entries in the store.
    pub fn len(&self) -> OpResult<usize> {
        self.list().map(|entries| entries.len())
    }

    /// Check if the store holds no entries.
    pub fn is_empty(&self) -> OpResult<bool> {
        self.len().map(|len| len == 0)
    }

    fn entry_dir(&self, id: TrashId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Reserve a fresh id by creating its directory.
    fn allocate(&self) -> OpResult<(TrashId, PathBuf)> {
        loop {
            let id = TrashId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let entry_dir = self.entry_dir(id);
            match fs::create_dir(&entry_dir) {
                Ok(()) => return Ok((id, entry_dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(OpError::io(&entry_dir, e)),
            }
        }
    }
}

fn parse_id(name: &str) -> Option<TrashId> {
    name.parse::<u64>().ok().map(TrashId)
}

fn write_metadata(entry_dir: &Path, metadata: &TrashMetadata) -> OpResult<()> {
    let path = entry_dir.join(METADATA_NAME);
    let json = serde_json::to_vec_pretty(metadata).map_err(|e| OpError::Io {
        path: path.clone(),
        source: e.into(),
    })?;
    fs::write(&path, json).at(&path)
}

fn read_metadata(entry_dir: &Path) -> OpResult<TrashMetadata> {
    let path = entry_dir.join(METADATA_NAME);
    let bytes = fs::read(&path).at(&path)?;
    serde_json::from_slice(&bytes).map_err(|e| OpError::Io {
        path,
        source: e.into(),
    })
}
