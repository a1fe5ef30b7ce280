//! Engine configuration types.

use std::fs;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default number of undo records kept.
pub const DEFAULT_UNDO_CAPACITY: usize = 100;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this configuration.
    #[error("Failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration for one engine instance.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding trashed entries.
    #[builder(default = "default_trash_root()")]
    pub trash_root: PathBuf,

    /// Maximum number of undo records kept.
    #[builder(default = "DEFAULT_UNDO_CAPACITY")]
    pub undo_capacity: usize,

    /// Include hidden files (starting with .) in listings.
    #[builder(default = "false")]
    pub show_hidden: bool,

    /// Deflate level for created archives (None = format default).
    #[builder(default)]
    pub compression_level: Option<i64>,

    /// Query version-control status for listings.
    #[builder(default = "true")]
    pub status_enabled: bool,
}

/// `~/.retrace/trash`, or `./.retrace/trash` without a home directory.
pub fn default_trash_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".retrace")
        .join("trash")
}

/// `<config_dir>/retrace/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("retrace").join("config.toml"))
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref root) = self.trash_root {
            if root.as_os_str().is_empty() {
                return Err("Trash root cannot be empty".to_string());
            }
        }
        if self.undo_capacity == Some(0) {
            return Err("Undo capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Create a default config with a specific trash root.
    pub fn with_trash_root(root: impl Into<PathBuf>) -> Self {
        Self {
            trash_root: root.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if config.undo_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "undo_capacity must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    /// Load the user's config file if it exists, defaults otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading engine config");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trash_root: default_trash_root(),
            undo_capacity: DEFAULT_UNDO_CAPACITY,
            show_hidden: false,
            compression_level: None,
            status_enabled: true,
        }
    }
}
