//! Directory listings.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::entry::Entry;
use crate::error::{IoResultExt, OpResult};
use crate::path::normalize_path;

/// List the immediate children of `dir` as fresh [`Entry`] snapshots.
///
/// Directories sort before files, then names compare case-insensitively.
/// Entries whose metadata can no longer be read (removed mid-listing) are
/// skipped.
pub fn read_directory(dir: impl AsRef<Path>, show_hidden: bool) -> OpResult<Vec<Entry>> {
    let dir = normalize_path(dir.as_ref());
    let read = fs::read_dir(&dir).at(&dir)?;

    let mut entries = Vec::new();
    for item in read {
        let item = item.at(&dir)?;
        let path = item.path();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let entry = Entry::from_metadata(path, &metadata);
        if !show_hidden && entry.is_hidden() {
            continue;
        }
        entries.push(entry);
    }

    sort_entries(&mut entries);
    Ok(entries)
}

/// Sort entries: directories first, then case-insensitive name order.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}
