//! `~/.keel/config.yaml` loading and path helpers.
//!
//! # Layout
//!
//! ```text
//! ~/.keel/
//!   config.yaml            (optional; every field has a default)
//!   keel.db                (project store)
//!   repo-manager.sock      (Repository Manager endpoint)
//! ```
//!
//! Same two-form API as the rest of the crate: `load_at(home)` takes an
//! explicit home and is what tests use; `load()` resolves `dirs::home_dir()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "config.yaml";
pub const DATABASE_FILE: &str = "keel.db";
pub const REPO_MANAGER_SOCKET: &str = "repo-manager.sock";

pub const DEFAULT_RPC_DEADLINE_MS: u64 = 10_000;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// `<home>/.keel`
pub fn keel_root(home: &Path) -> PathBuf {
    home.join(".keel")
}

/// `<home>/.keel/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    keel_root(home).join(CONFIG_FILE)
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeelConfig {
    pub database: PathBuf,
    pub repo_manager_socket: PathBuf,
    pub rpc_deadline_ms: u64,
    pub stale_after_secs: u64,
}

/// On-disk shape; anything omitted falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    database: Option<PathBuf>,
    repo_manager_socket: Option<PathBuf>,
    rpc_deadline_ms: Option<u64>,
    stale_after_secs: Option<u64>,
}

impl KeelConfig {
    pub fn defaults_at(home: &Path) -> Self {
        let root = keel_root(home);
        Self {
            database: root.join(DATABASE_FILE),
            repo_manager_socket: root.join(REPO_MANAGER_SOCKET),
            rpc_deadline_ms: DEFAULT_RPC_DEADLINE_MS,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }

    /// Load `<home>/.keel/config.yaml`, or defaults if the file is absent.
    ///
    /// Relative paths in the file are resolved against `<home>/.keel`.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        let path = config_path_at(home);
        let mut config = Self::defaults_at(home);
        if !path.exists() {
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        // An empty file deserializes to `None`, which means "all defaults".
        let file: Option<ConfigFile> =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        let file = file.unwrap_or_default();

        let root = keel_root(home);
        if let Some(database) = file.database {
            config.database = root.join(database);
        }
        if let Some(socket) = file.repo_manager_socket {
            config.repo_manager_socket = root.join(socket);
        }
        if let Some(ms) = file.rpc_deadline_ms {
            config.rpc_deadline_ms = ms;
        }
        if let Some(secs) = file.stale_after_secs {
            config.stale_after_secs = secs;
        }
        config.validate(&path)?;
        tracing::debug!(path = %path.display(), "loaded keel config");
        Ok(config)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Self::load_at(&home)
    }

    /// The reconciler treats a row older than `stale_after` as abandoned, so
    /// every remote call must be bounded by a deadline shorter than that.
    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        };
        if self.rpc_deadline_ms == 0 {
            return Err(invalid("rpc_deadline_ms must be greater than 0".to_string()));
        }
        if self.stale_after_secs.saturating_mul(1000) <= self.rpc_deadline_ms {
            return Err(invalid(format!(
                "stale_after_secs ({}s) must exceed rpc_deadline_ms ({}ms)",
                self.stale_after_secs, self.rpc_deadline_ms
            )));
        }
        Ok(())
    }

    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_deadline_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
