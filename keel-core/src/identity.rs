//! Caller resolution.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::ProjectStore;
use crate::types::{User, UserId};

/// Resolves a caller id to `{id, is_admin}`.
///
/// Implementations must not cache across operations: the admin flag is read
/// fresh for every call so a revoked admin loses access immediately.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Returns `StoreError::NotFound { entity: "user", .. }` for unknown ids.
    async fn get_user(&self, id: &UserId) -> Result<User, StoreError>;
}

#[async_trait]
impl IdentityDirectory for ProjectStore {
    async fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        let id = id.clone();
        self.blocking(move |store| store.find_user(&id)).await
    }
}
