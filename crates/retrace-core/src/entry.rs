//! Directory entry snapshots.

use std::fmt;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{IoResultExt, OpResult};
use crate::path::normalize_path;

/// Type of file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntryKind {
    /// Regular file (or any non-directory, non-symlink object).
    File,
    /// Directory.
    Directory,
    /// Symbolic link (not followed).
    Symlink,
}

impl EntryKind {
    /// Classify a `symlink_metadata` result.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else {
            Self::File
        }
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Version-control status of an entry, as reported by a status provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum StatusTag {
    /// No change.
    None,
    /// Not tracked by the repository.
    Untracked,
    /// Changes staged in the index.
    Staged,
    /// Renamed in the index or working tree.
    Renamed,
    /// Deleted from the working tree.
    Deleted,
    /// Modified in the working tree.
    Modified,
}

impl StatusTag {
    /// Merge two tags, keeping the one that matters most for display.
    ///
    /// Used when a directory summarises the statuses of its descendants.
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Unix-style permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Full mode bits including the file type (0 where unsupported).
    pub mode: u32,
    /// Whether the entry is read-only for its owner.
    pub readonly: bool,
}

impl Permissions {
    /// Extract permissions from metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::MetadataExt;
            metadata.mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Self {
            mode,
            readonly: metadata.permissions().readonly(),
        }
    }
}

impl fmt::Display for Permissions {
    /// Render as `ls -l` does, e.g. `drwxr-xr-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mode == 0 {
            return f.write_str(if self.readonly { "r--r--r--" } else { "rw-rw-rw-" });
        }

        let kind = match self.mode & 0o170000 {
            0o040000 => 'd',
            0o120000 => 'l',
            0o020000 => 'c',
            0o060000 => 'b',
            0o010000 => 'p',
            0o140000 => 's',
            _ => '-',
        };

        let mut out = String::with_capacity(10);
        out.push(kind);
        for shift in [6u32, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        f.write_str(&out)
    }
}

/// A snapshot of one filesystem entry as listed in a directory.
///
/// Entries are never mutated after a listing; a changed filesystem produces a
/// fresh set. The `with_*` methods return modified copies for overlaying
/// selection and status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute, normalized path.
    pub path: PathBuf,
    /// File name (last path component).
    pub name: CompactString,
    /// Entry type.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub modified_at: SystemTime,
    /// Permission bits.
    pub permissions: Permissions,
    /// Whether the entry is part of the current selection.
    pub is_selected: bool,
    /// Version-control status, if an overlay has been applied.
    pub status_tag: Option<StatusTag>,
}

impl Entry {
    /// Build an entry from a path, without following symlinks.
    pub fn from_path(path: impl AsRef<Path>) -> OpResult<Self> {
        let path = normalize_path(path.as_ref());
        let metadata = fs::symlink_metadata(&path).at(&path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    /// Build an entry from already-fetched metadata.
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let kind = EntryKind::from_metadata(metadata);
        let name = path
            .file_name()
            .map(|n| CompactString::from(n.to_string_lossy()))
            .unwrap_or_else(|| CompactString::from(path.to_string_lossy()));

        Self {
            name,
            kind,
            size: if kind.is_dir() { 0 } else { metadata.len() },
            modified_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            permissions: Permissions::from_metadata(metadata),
            is_selected: false,
            status_tag: None,
            path,
        }
    }

    /// Check if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Check if this entry is hidden (dot-prefixed).
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    /// Return a copy with the selection flag set.
    pub fn with_selected(mut self, selected: bool) -> Self {
        self.is_selected = selected;
        self
    }

    /// Return a copy with a status tag attached.
    pub fn with_status(mut self, tag: Option<StatusTag>) -> Self {
        self.status_tag = tag;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_display() {
        let perms = Permissions {
            mode: 0o040755,
            readonly: false,
        };
        assert_eq!(perms.to_string(), "drwxr-xr-x");

        let perms = Permissions {
            mode: 0o100644,
            readonly: false,
        };
        assert_eq!(perms.to_string(), "-rw-r--r--");

        let perms = Permissions {
            mode: 0o120777,
            readonly: false,
        };
        assert_eq!(perms.to_string(), "lrwxrwxrwx");
    }

    #[test]
    fn test_status_tag_merge() {
        assert_eq!(StatusTag::Untracked.merge(StatusTag::Modified), StatusTag::Modified);
        assert_eq!(StatusTag::Staged.merge(StatusTag::Untracked), StatusTag::Staged);
        assert_eq!(StatusTag::None.merge(StatusTag::None), StatusTag::None);
    }

    #[test]
    fn test_status_tag_display() {
        assert_eq!(StatusTag::Modified.to_string(), "modified");
        assert_eq!(EntryKind::Directory.to_string(), "directory");
    }
}
