//! Error types for keel-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from project store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The project name is already held by another row (active or staged).
    #[error("project name '{name}' is already taken")]
    Conflict { name: String },

    /// No row matched. `entity` is `"project"` or `"user"`.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failure preparing the database location on disk.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking-pool task running a store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn project_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "project",
            key: key.into(),
        }
    }

    pub fn user_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "user",
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors loading `~/.keel/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Values that parse but cannot work together.
    #[error("invalid config at {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.keel/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
