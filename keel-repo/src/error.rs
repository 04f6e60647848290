use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Error surface for Repository Manager calls, transport included.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("repository manager is not reachable (socket missing: {socket})")]
    Unavailable { socket: PathBuf },

    #[error("repository manager protocol error: {0}")]
    Protocol(String),

    /// The remote answered and refused the operation.
    #[error("repository manager rejected {op} of '{path}': {message}")]
    Rejected {
        op: &'static str,
        path: String,
        message: String,
    },

    #[error("repository {op} exceeded its {deadline:?} deadline")]
    DeadlineExceeded {
        op: &'static str,
        deadline: Duration,
    },
}

impl RepoError {
    /// Transport-level failures whose remote outcome is unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded { .. } | Self::Io { .. } | Self::Json(_) | Self::Protocol(_)
        )
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RepoError {
    RepoError::Io {
        path: path.into(),
        source,
    }
}
