//! Git-backed status provider.

use std::fs;
use std::path::{Component, Path};

use git2::{ErrorCode, Repository, Status, StatusOptions};
use tracing::{debug, trace};

use retrace_core::StatusTag;

use crate::provider::{StatusError, StatusMap, StatusProvider};

/// Reads working-tree status through libgit2.
///
/// Each query discovers the repository afresh, so the provider holds no
/// handles and follows the user across repositories.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitStatusProvider;

impl GitStatusProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self
    }
}

impl StatusProvider for GitStatusProvider {
    fn status_of(&self, dir: &Path) -> Result<StatusMap, StatusError> {
        let repo = match Repository::discover(dir) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                trace!(dir = %dir.display(), "not inside a repository");
                return Ok(StatusMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(workdir) = repo.workdir() else {
            return Ok(StatusMap::new());
        };

        let workdir = canonical(workdir)?;
        let dir = canonical(dir)?;
        let Ok(relative) = dir.strip_prefix(&workdir) else {
            return Ok(StatusMap::new());
        };
        let prefix: Vec<String> = components(relative);

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .recurse_untracked_dirs(false)
            .renames_head_to_index(true);
        if !prefix.is_empty() {
            // Directory names are literal paths, not glob patterns.
            opts.pathspec(prefix.join("/")).disable_pathspec_match(true);
        }

        let statuses = repo.statuses(Some(&mut opts))?;
        let mut map = StatusMap::new();

        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() <= prefix.len() || parts[..prefix.len()] != prefix[..] {
                continue;
            }

            let tag = classify(entry.status());
            if tag == StatusTag::None {
                continue;
            }

            let child = parts[prefix.len()].to_string();
            map.entry(child)
                .and_modify(|existing: &mut StatusTag| *existing = existing.merge(tag))
                .or_insert(tag);
        }

        debug!(dir = %dir.display(), entries = map.len(), "git status collected");
        Ok(map)
    }
}

/// Map libgit2 status flags onto a single tag.
pub fn classify(status: Status) -> StatusTag {
    let mut tag = StatusTag::None;

    if status.intersects(Status::WT_NEW) {
        tag = tag.merge(StatusTag::Untracked);
    }
    if status.intersects(Status::INDEX_NEW | Status::INDEX_MODIFIED | Status::INDEX_TYPECHANGE) {
        tag = tag.merge(StatusTag::Staged);
    }
    if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        tag = tag.merge(StatusTag::Renamed);
    }
    if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        tag = tag.merge(StatusTag::Deleted);
    }
    if status.intersects(Status::WT_MODIFIED | Status::WT_TYPECHANGE | Status::CONFLICTED) {
        tag = tag.merge(StatusTag::Modified);
    }

    tag
}

fn canonical(path: &Path) -> Result<std::path::PathBuf, StatusError> {
    fs::canonicalize(path).map_err(|source| StatusError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_precedence() {
        assert_eq!(classify(Status::CURRENT), StatusTag::None);
        assert_eq!(classify(Status::WT_NEW), StatusTag::Untracked);
        assert_eq!(classify(Status::INDEX_NEW), StatusTag::Staged);
        assert_eq!(
            classify(Status::INDEX_MODIFIED | Status::WT_MODIFIED),
            StatusTag::Modified
        );
        assert_eq!(
            classify(Status::INDEX_RENAMED | Status::INDEX_MODIFIED),
            StatusTag::Renamed
        );
        assert_eq!(classify(Status::WT_DELETED), StatusTag::Deleted);
    }
}
