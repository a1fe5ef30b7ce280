//! Core types for retrace.
//!
//! This crate provides the data model shared by the file operation engine:
//! entry snapshots, the typed error returned by every operation, engine
//! configuration and directory listings.

mod config;
mod entry;
mod error;
mod listing;
mod path;

pub use config::{
    default_config_path, default_trash_root, ConfigError, EngineConfig, EngineConfigBuilder,
    DEFAULT_UNDO_CAPACITY,
};
pub use entry::{Entry, EntryKind, Permissions, StatusTag};
pub use error::{EntryFailure, IoResultExt, OpError, OpResult};
pub use listing::{read_directory, sort_entries};
pub use path::{normalize_path, paths_overlap};
