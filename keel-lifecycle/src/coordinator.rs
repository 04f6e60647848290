//! Create / find / list / delete of projects.
//!
//! # Consistency protocol
//!
//! ```text
//! create:  stage row (provisioning) ─► remote create ─┬─ ok  ─► activate
//!                                                     └─ err ─► discard row (+ remote delete if outcome unknown)
//! delete:  claim row (deleting) ─► remote delete ─┬─ ok  ─► remove row
//!                                                 └─ err ─► restore row (active)
//! ```
//!
//! Each arrow on the local side is its own short store transaction on the
//! blocking pool; no transaction spans a remote call. Both protocols run on a
//! detached task, so a caller that stops waiting does not leave a row half-way.
//!
//! The reconciler may claim a slow row out from under either protocol. A create
//! whose row is gone by the time it activates removes the repository it just
//! made; a delete whose row was already removed counts as done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keel_core::{
    IdentityDirectory, KeelConfig, Project, ProjectId, ProjectName, ProjectState, ProjectStore,
    ProjectView, StoreError, User, UserId,
};
use keel_repo::{with_deadline, RepositoryManager};

use crate::error::LifecycleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound on each Repository Manager call. `None` waits indefinitely.
    pub rpc_deadline: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rpc_deadline: Some(Duration::from_millis(
                keel_core::config::DEFAULT_RPC_DEADLINE_MS,
            )),
        }
    }
}

impl From<&KeelConfig> for CoordinatorConfig {
    fn from(config: &KeelConfig) -> Self {
        Self {
            rpc_deadline: Some(config.rpc_deadline()),
        }
    }
}

/// Project Lifecycle Coordinator.
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<ProjectStore>,
    identity: Arc<dyn IdentityDirectory>,
    repos: Arc<dyn RepositoryManager>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<ProjectStore>,
        identity: Arc<dyn IdentityDirectory>,
        repos: Arc<dyn RepositoryManager>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            identity,
            repos,
            config,
        }
    }

    /// Create `name` for `caller`, provisioning its repository.
    ///
    /// On `ProvisioningFailure` no row for this attempt remains.
    pub async fn create(
        &self,
        caller: &UserId,
        name: &ProjectName,
    ) -> Result<ProjectView, LifecycleError> {
        let user = self.resolve_caller(caller).await?;

        let this = self.clone();
        let name = name.clone();
        let owner = user.id.clone();
        let project = detached(async move { this.provision(name, owner).await }).await?;

        Ok(ProjectView::for_caller(&project, &user))
    }

    async fn provision(&self, name: ProjectName, owner: UserId) -> Result<Project, LifecycleError> {
        let staged = self
            .store
            .blocking(move |store| store.stage(&name, &owner))
            .await?;
        let path = staged.repository_path().to_owned();
        tracing::debug!(project_id = %staged.id, name = %staged.name, "staged project row");

        let created = with_deadline(self.config.rpc_deadline, "create", self.repos.create(&path)).await;
        match created {
            Ok(()) => {
                let id = staged.id.clone();
                if let Err(err) = self.store.blocking(move |store| store.activate(&id)).await {
                    tracing::warn!(
                        project_id = %staged.id,
                        error = %err,
                        "staged row lost before activation; removing repository",
                    );
                    self.compensate_create(&path).await;
                    return Err(LifecycleError::Internal(format!(
                        "project '{}' could not be activated after its repository was created: {err}",
                        staged.name
                    )));
                }
                tracing::info!(
                    project_id = %staged.id,
                    name = %staged.name,
                    owner = %staged.owner_id,
                    "project created",
                );
                Ok(Project {
                    state: ProjectState::Active,
                    ..staged
                })
            }
            Err(err) => {
                tracing::warn!(
                    project_id = %staged.id,
                    error = %err,
                    "repository create failed; discarding staged row",
                );
                let id = staged.id.clone();
                if let Err(discard_err) = self.store.blocking(move |store| store.discard(&id)).await
                {
                    tracing::error!(
                        project_id = %staged.id,
                        error = %discard_err,
                        "failed to discard staged row; left for reconciliation",
                    );
                }
                if err.is_ambiguous() {
                    self.compensate_create(&path).await;
                }
                Err(LifecycleError::provisioning("create", &path, err))
            }
        }
    }

    /// Remove a repository whose project row will not survive.
    async fn compensate_create(&self, path: &str) {
        let outcome = with_deadline(self.config.rpc_deadline, "delete", self.repos.delete(path)).await;
        match outcome {
            Ok(()) => tracing::info!(path, "compensating repository delete succeeded"),
            Err(err) => tracing::warn!(
                path,
                error = %err,
                "compensating repository delete failed; left for reconciliation",
            ),
        }
    }

    /// Look up a project by id, then by name, as seen by `caller`.
    ///
    /// Projects the caller cannot access are reported as `NotFound`, never as
    /// `Unauthorized`.
    pub async fn find_one(
        &self,
        caller: &UserId,
        id_or_name: &str,
    ) -> Result<ProjectView, LifecycleError> {
        let user = self.resolve_caller(caller).await?;

        let id = ProjectId::from(id_or_name);
        let by_id = found(self.store.blocking(move |store| store.find_by_id(&id)).await)?;
        let project = match by_id.filter(|p| user.can_access(p)) {
            Some(project) => Some(project),
            None => {
                let name = ProjectName::from(id_or_name);
                found(self.store.blocking(move |store| store.find_by_name(&name)).await)?
                    .filter(|p| user.can_access(p))
            }
        };

        project
            .map(|p| ProjectView::for_caller(&p, &user))
            .ok_or_else(|| LifecycleError::project_not_found(id_or_name))
    }

    /// Every project for admins; the caller's own projects otherwise.
    pub async fn list_all(&self, caller: &UserId) -> Result<Vec<ProjectView>, LifecycleError> {
        let user = self.resolve_caller(caller).await?;
        let projects = if user.is_admin {
            self.store.blocking(|store| store.list_all()).await?
        } else {
            let owner = user.id.clone();
            self.store
                .blocking(move |store| store.list_by_owner(&owner))
                .await?
        };
        Ok(projects
            .iter()
            .map(|p| ProjectView::for_caller(p, &user))
            .collect())
    }

    /// Delete project `id`, removing the remote repository first.
    ///
    /// On `ProvisioningFailure` the project is left in place and the call can
    /// be retried.
    pub async fn delete(
        &self,
        caller: &UserId,
        id: &ProjectId,
    ) -> Result<ProjectView, LifecycleError> {
        let lookup = id.clone();
        let project = self
            .store
            .blocking(move |store| store.find_by_id(&lookup))
            .await?;
        let user = self.resolve_caller(caller).await?;
        if !user.can_access(&project) {
            return Err(LifecycleError::Unauthorized {
                caller: user.id,
                project: project.id,
            });
        }

        let this = self.clone();
        let id = project.id.clone();
        let removed = detached(async move { this.retire(id).await }).await?;

        Ok(ProjectView::for_caller(&removed, &user))
    }

    async fn retire(&self, id: ProjectId) -> Result<Project, LifecycleError> {
        let claim = id.clone();
        let claimed = self
            .store
            .blocking(move |store| store.begin_delete(&claim))
            .await?;
        let path = claimed.repository_path().to_owned();

        let deleted = with_deadline(self.config.rpc_deadline, "delete", self.repos.delete(&path)).await;
        match deleted {
            Ok(()) => {
                let removal = id.clone();
                match self
                    .store
                    .blocking(move |store| store.finish_delete(&removal))
                    .await
                {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(project_id = %id, "row already removed by reconciliation");
                    }
                    Err(err) => return Err(err.into()),
                }
                tracing::info!(project_id = %id, name = %claimed.name, "project deleted");
                Ok(claimed)
            }
            Err(err) => {
                tracing::warn!(
                    project_id = %id,
                    error = %err,
                    "repository delete failed; restoring project row",
                );
                let restore = id.clone();
                if let Err(restore_err) = self
                    .store
                    .blocking(move |store| store.restore(&restore))
                    .await
                {
                    tracing::error!(
                        project_id = %id,
                        error = %restore_err,
                        "failed to restore project row; left for reconciliation",
                    );
                }
                Err(LifecycleError::provisioning("delete", &path, err))
            }
        }
    }

    /// Read the caller fresh from the identity directory. No caching.
    async fn resolve_caller(&self, caller: &UserId) -> Result<User, LifecycleError> {
        Ok(self.identity.get_user(caller).await?)
    }
}

/// Run `work` on its own task so dropping the caller's future cannot cancel it.
async fn detached<T, F>(work: F) -> Result<T, LifecycleError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LifecycleError>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|err| LifecycleError::Internal(format!("lifecycle task join failure: {err}")))?
}

fn found(result: Result<Project, StoreError>) -> Result<Option<Project>, LifecycleError> {
    match result {
        Ok(project) => Ok(Some(project)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}
