//! Per-directory status cache with generation tickets.
//!
//! A query starts with [`StatusCache::begin`], which hands out a ticket, and
//! ends with [`StatusCache::complete`]. If the directory was invalidated or
//! re-queried in between, the ticket no longer matches and the result is
//! dropped, so a slow query can never overwrite fresher knowledge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use retrace_core::paths_overlap;

use crate::provider::StatusMap;

#[derive(Debug)]
struct CachedStatus {
    ticket: u64,
    map: Option<StatusMap>,
}

/// Cache of status maps keyed by directory.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: HashMap<PathBuf, CachedStatus>,
    generation: u64,
}

impl StatusCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached map for `dir`, if a completed query is still valid.
    pub fn get(&self, dir: &Path) -> Option<&StatusMap> {
        self.entries.get(dir).and_then(|entry| entry.map.as_ref())
    }

    /// Check whether `dir` has a query in flight.
    pub fn is_pending(&self, dir: &Path) -> bool {
        self.entries
            .get(dir)
            .is_some_and(|entry| entry.map.is_none())
    }

    /// Start a query for `dir`, returning its ticket.
    ///
    /// Any earlier ticket for `dir` is superseded.
    pub fn begin(&mut self, dir: &Path) -> u64 {
        self.generation += 1;
        let ticket = self.generation;
        self.entries
            .entry(dir.to_path_buf())
            .and_modify(|entry| entry.ticket = ticket)
            .or_insert(CachedStatus { ticket, map: None });
        ticket
    }

    /// Store the result of the query holding `ticket`.
    ///
    /// Returns `false` and drops `map` when the ticket is stale.
    pub fn complete(&mut self, dir: &Path, ticket: u64, map: StatusMap) -> bool {
        match self.entries.get_mut(dir) {
            Some(entry) if entry.ticket == ticket => {
                entry.map = Some(map);
                true
            }
            _ => {
                trace!(dir = %dir.display(), ticket, "discarding stale status");
                false
            }
        }
    }

    /// Forget `dir`.
    pub fn invalidate(&mut self, dir: &Path) {
        self.entries.remove(dir);
    }

    /// Forget every cached directory containing, or contained in, `path`.
    ///
    /// Returns the directories that were dropped.
    pub fn invalidate_touching(&mut self, path: &Path) -> Vec<PathBuf> {
        let stale: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|dir| paths_overlap(dir, path))
            .cloned()
            .collect();

        for dir in &stale {
            self.entries.remove(dir);
        }
        stale
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached directories, pending or complete.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
