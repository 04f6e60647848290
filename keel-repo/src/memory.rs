//! In-memory Repository Manager.
//!
//! Honours the idempotence contract, records every call, and can be told to
//! fail or to stall, which is what the lifecycle tests need.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RepoError;
use crate::manager::RepositoryManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    Create(String),
    Delete(String),
    List,
}

#[derive(Debug, Default)]
struct MemoryState {
    paths: BTreeSet<String>,
    calls: Vec<RepoCall>,
    fail_create: bool,
    fail_delete: bool,
    fail_list: bool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryRepositoryManager {
    state: Mutex<MemoryState>,
}

impl MemoryRepositoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_creates(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_delete = fail;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// Delay applied before every call takes effect.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Provision `path` without recording a call.
    pub fn seed(&self, path: impl Into<String>) {
        self.lock().paths.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().paths.contains(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().paths.iter().cloned().collect()
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|call| matches!(call, RepoCall::Create(_)))
    }

    pub fn delete_calls(&self) -> usize {
        self.count(|call| matches!(call, RepoCall::Delete(_)))
    }

    fn count(&self, predicate: impl Fn(&RepoCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Record the call, then wait out the configured latency.
    async fn enter(&self, call: RepoCall) {
        let latency = {
            let mut state = self.lock();
            state.calls.push(call);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn injected(op: &'static str, path: &str) -> RepoError {
    RepoError::Rejected {
        op,
        path: path.to_owned(),
        message: format!("injected {op} failure"),
    }
}

#[async_trait]
impl RepositoryManager for MemoryRepositoryManager {
    async fn create(&self, path: &str) -> Result<(), RepoError> {
        self.enter(RepoCall::Create(path.to_owned())).await;
        let mut state = self.lock();
        if state.fail_create {
            return Err(injected("create", path));
        }
        state.paths.insert(path.to_owned());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RepoError> {
        self.enter(RepoCall::Delete(path.to_owned())).await;
        let mut state = self.lock();
        if state.fail_delete {
            return Err(injected("delete", path));
        }
        state.paths.remove(path);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, RepoError> {
        self.enter(RepoCall::List).await;
        let state = self.lock();
        if state.fail_list {
            return Err(injected("list", ""));
        }
        Ok(state.paths.iter().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_of_missing_path_succeeds() {
        let repos = MemoryRepositoryManager::new();
        repos.delete("never-created").await.expect("idempotent delete");

        repos.create("P1").await.expect("create");
        repos.delete("P1").await.expect("first delete");
        repos.delete("P1").await.expect("second delete");
        assert!(!repos.contains("P1"));
        assert_eq!(repos.delete_calls(), 3);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let repos = MemoryRepositoryManager::new();
        repos.create("P1").await.expect("first");
        repos.create("P1").await.expect("again");
        assert_eq!(repos.paths(), vec!["P1".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures_leave_state_untouched() {
        let repos = MemoryRepositoryManager::new();
        repos.seed("P1");
        repos.fail_deletes(true);
        repos.fail_creates(true);

        assert!(matches!(
            repos.delete("P1").await,
            Err(RepoError::Rejected { op: "delete", .. })
        ));
        assert!(repos.create("P2").await.is_err());
        assert_eq!(repos.paths(), vec!["P1".to_string()]);
        assert_eq!(
            repos.calls(),
            vec![
                RepoCall::Delete("P1".to_string()),
                RepoCall::Create("P2".to_string())
            ]
        );
    }
}
