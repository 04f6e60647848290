//! Out-of-band repair of divergence left by crashed operations.
//!
//! Never called from the create/delete path. A sweep compares the store with
//! the Repository Manager's listing and drives every leftover to a final
//! state:
//!
//! | found                                   | action                          |
//! |-----------------------------------------|---------------------------------|
//! | `provisioning` row older than the grace | discard row, then remote delete |
//! | `deleting` row older than the grace     | remove row, then remote delete  |
//! | remote path with no row at all          | remote delete                   |
//! | `active` row with no remote path        | remote create (re-provision)    |
//!
//! A leftover row is claimed with a state-guarded store write before anything
//! remote happens. If the claim misses, the operation that owned the row is
//! still alive and has moved it on, so the row is skipped. A remote delete that
//! fails after a successful claim leaves an orphan for the next sweep.
//!
//! Re-provisioning re-reads each row just before the remote create. A delete
//! that starts after that read can still finish before the create lands; the
//! repository it leaves behind is an orphan for the next sweep.
//!
//! A failed action is recorded and the sweep moves on. Only a failed read of
//! either side ends the sweep early.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keel_core::{KeelConfig, Project, ProjectId, ProjectState, ProjectStore, StoreError};
use keel_repo::{with_deadline, RepoError, RepositoryManager};
use serde::Serialize;

use crate::error::LifecycleError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub path: String,
    pub action: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Crashed creates rolled back.
    pub discarded_staged: Vec<ProjectId>,
    /// Crashed deletes completed.
    pub finished_deletes: Vec<ProjectId>,
    /// Remote repositories with no local row, removed.
    pub removed_orphans: Vec<String>,
    /// Active projects whose repository was missing, re-created.
    pub reprovisioned: Vec<ProjectId>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.discarded_staged.is_empty()
            && self.finished_deletes.is_empty()
            && self.removed_orphans.is_empty()
            && self.reprovisioned.is_empty()
            && self.failures.is_empty()
    }
}

pub struct Reconciler {
    store: Arc<ProjectStore>,
    repos: Arc<dyn RepositoryManager>,
    stale_after: Duration,
    rpc_deadline: Option<Duration>,
}

impl Reconciler {
    pub fn new(
        store: Arc<ProjectStore>,
        repos: Arc<dyn RepositoryManager>,
        stale_after: Duration,
        rpc_deadline: Option<Duration>,
    ) -> Self {
        Self {
            store,
            repos,
            stale_after,
            rpc_deadline,
        }
    }

    pub fn from_config(
        store: Arc<ProjectStore>,
        repos: Arc<dyn RepositoryManager>,
        config: &KeelConfig,
    ) -> Self {
        Self::new(store, repos, config.stale_after(), Some(config.rpc_deadline()))
    }

    /// One full pass. With `dry_run` the report lists what would be done and
    /// nothing is changed on either side.
    pub async fn sweep(&self, dry_run: bool) -> Result<ReconcileReport, LifecycleError> {
        let mut report = ReconcileReport {
            dry_run,
            ..ReconcileReport::default()
        };

        let grace = chrono::Duration::from_std(self.stale_after)
            .map_err(|err| LifecycleError::Internal(format!("invalid grace period: {err}")))?;
        let cutoff = Utc::now() - grace;

        let staged = self
            .store
            .blocking(move |store| store.list_stale(ProjectState::Provisioning, cutoff))
            .await?;
        let deleting = self
            .store
            .blocking(move |store| store.list_stale(ProjectState::Deleting, cutoff))
            .await?;

        for project in staged {
            let id = project.id.clone();
            let claimed = self
                .claim(&project, dry_run, &mut report, move |store| store.discard(&id))
                .await;
            if claimed && self.remove_remote(&project, dry_run, &mut report).await {
                report.discarded_staged.push(project.id);
            }
        }

        for project in deleting {
            let id = project.id.clone();
            let claimed = self
                .claim(&project, dry_run, &mut report, move |store| store.finish_delete(&id))
                .await;
            if claimed && self.remove_remote(&project, dry_run, &mut report).await {
                report.finished_deletes.push(project.id);
            }
        }

        // List remote first: anything created after this point has a row
        // already, so it can never be mistaken for an orphan.
        let remote: HashSet<String> = self
            .call("list", self.repos.list())
            .await
            .map_err(|err| LifecycleError::provisioning("list", "", err))?
            .into_iter()
            .collect();
        let local: HashSet<String> = self
            .store
            .blocking(|store| store.list_ids())
            .await?
            .into_iter()
            .map(|id| id.0)
            .collect();

        let mut orphans: Vec<&String> = remote.difference(&local).collect();
        orphans.sort();
        for path in orphans {
            if dry_run {
                report.removed_orphans.push(path.clone());
                continue;
            }
            match self.call("delete", self.repos.delete(path)).await {
                Ok(()) => {
                    tracing::info!(path = %path, "removed orphan repository");
                    report.removed_orphans.push(path.clone());
                }
                Err(err) => record(&mut report, path, "delete orphan", err),
            }
        }

        let active = self.store.blocking(|store| store.list_all()).await?;
        for project in active {
            if remote.contains(project.repository_path()) {
                continue;
            }
            if dry_run {
                report.reprovisioned.push(project.id);
                continue;
            }
            let id = project.id.clone();
            match self.store.blocking(move |store| store.find_by_id(&id)).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    tracing::debug!(project_id = %project.id, "project left active state; not re-provisioning");
                    continue;
                }
                Err(err) => {
                    record(&mut report, project.repository_path(), "re-provision", err);
                    continue;
                }
            }
            match self
                .call("create", self.repos.create(project.repository_path()))
                .await
            {
                Ok(()) => {
                    tracing::info!(project_id = %project.id, "re-provisioned missing repository");
                    report.reprovisioned.push(project.id);
                }
                Err(err) => record(&mut report, project.repository_path(), "re-provision", err),
            }
        }

        tracing::info!(
            dry_run,
            discarded_staged = report.discarded_staged.len(),
            finished_deletes = report.finished_deletes.len(),
            removed_orphans = report.removed_orphans.len(),
            reprovisioned = report.reprovisioned.len(),
            failures = report.failures.len(),
            "reconcile sweep finished",
        );
        Ok(report)
    }

    /// State-guarded removal of a leftover row. `true` when this sweep now
    /// owns the row; `false` when it moved on or the write failed.
    async fn claim<F>(
        &self,
        project: &Project,
        dry_run: bool,
        report: &mut ReconcileReport,
        remove: F,
    ) -> bool
    where
        F: FnOnce(&ProjectStore) -> Result<(), StoreError> + Send + 'static,
    {
        if dry_run {
            return true;
        }
        match self.store.blocking(remove).await {
            Ok(()) => true,
            Err(err) if err.is_not_found() => {
                tracing::debug!(
                    project_id = %project.id,
                    state = %project.state,
                    "leftover row changed state; skipping",
                );
                false
            }
            Err(err) => {
                record(report, project.repository_path(), "claim leftover row", err);
                false
            }
        }
    }

    /// Remote delete for a claimed row.
    async fn remove_remote(
        &self,
        project: &Project,
        dry_run: bool,
        report: &mut ReconcileReport,
    ) -> bool {
        if dry_run {
            return true;
        }
        let path = project.repository_path();
        match self.call("delete", self.repos.delete(path)).await {
            Ok(()) => true,
            Err(err) => {
                record(report, path, "delete leftover", err);
                false
            }
        }
    }

    async fn call<T>(
        &self,
        op: &'static str,
        call: impl std::future::Future<Output = Result<T, RepoError>>,
    ) -> Result<T, RepoError> {
        with_deadline(self.rpc_deadline, op, call).await
    }
}

fn record(report: &mut ReconcileReport, path: &str, action: &'static str, err: impl Display) {
    tracing::warn!(path, action, error = %err, "reconcile action failed");
    report.failures.push(ReconcileFailure {
        path: path.to_owned(),
        action,
        error: err.to_string(),
    });
}
