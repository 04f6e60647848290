//! The [`RepositoryManager`] seam.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RepoError;

/// Remote repository lifecycle, addressed by path.
///
/// Contract for implementors:
/// - `create` on an already-provisioned path succeeds.
/// - `delete` on a path that does not exist succeeds. Callers rely on this to
///   retry deletes safely.
/// - No retries happen inside the client; every failure is returned.
#[async_trait]
pub trait RepositoryManager: Send + Sync {
    async fn create(&self, path: &str) -> Result<(), RepoError>;

    async fn delete(&self, path: &str) -> Result<(), RepoError>;

    /// Every provisioned path. Only the reconciler needs this.
    async fn list(&self) -> Result<Vec<String>, RepoError>;
}

/// Bound `call` by `deadline`; `None` waits indefinitely.
///
/// An elapsed deadline becomes [`RepoError::DeadlineExceeded`]. The remote
/// side may still have applied the operation.
pub async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    op: &'static str,
    call: F,
) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    match deadline {
        None => call.await,
        Some(deadline) => tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| RepoError::DeadlineExceeded { op, deadline })?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn deadline_elapses_into_typed_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, RepoError>(())
        };
        let err = with_deadline(Some(Duration::from_millis(100)), "create", slow)
            .await
            .unwrap_err();
        assert!(
            matches!(err, RepoError::DeadlineExceeded { op: "create", .. }),
            "got: {err}"
        );
        assert!(err.is_ambiguous());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn no_deadline_waits_for_the_call() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, RepoError>(7)
        };
        assert_eq!(with_deadline(None, "list", slow).await.unwrap(), 7);
    }
}
