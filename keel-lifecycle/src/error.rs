use keel_core::{ProjectId, StoreError, UserId};
use keel_repo::RepoError;
use thiserror::Error;

/// Caller-facing error taxonomy of the coordinator.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Duplicate project name.
    #[error("project name '{name}' is already taken")]
    Conflict { name: String },

    /// Missing project or caller, or a project the caller may not see.
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    /// Authenticated caller without the right to delete.
    #[error("caller '{caller}' is not allowed to delete project '{project}'")]
    Unauthorized { caller: UserId, project: ProjectId },

    /// The Repository Manager call failed or timed out.
    #[error("repository {op} failed for '{path}': {source}")]
    ProvisioningFailure {
        op: &'static str,
        path: String,
        #[source]
        source: RepoError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl LifecycleError {
    pub(crate) fn project_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "project",
            key: key.into(),
        }
    }

    pub(crate) fn provisioning(op: &'static str, path: &str, source: RepoError) -> Self {
        Self::ProvisioningFailure {
            op,
            path: path.to_owned(),
            source,
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { name } => Self::Conflict { name },
            StoreError::NotFound { entity, key } => Self::NotFound { entity, key },
            other => Self::Internal(other.to_string()),
        }
    }
}
