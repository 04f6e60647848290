pub mod project;
pub mod reconcile;
pub mod user;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use keel_core::{KeelConfig, ProjectStore};
use keel_lifecycle::{Coordinator, CoordinatorConfig};
use keel_repo::{RepositoryManager, SocketRepositoryManager};

/// Everything a command needs, built from `~/.keel/config.yaml`.
pub struct Services {
    pub config: KeelConfig,
    pub store: Arc<ProjectStore>,
    pub repos: Arc<dyn RepositoryManager>,
}

impl Services {
    pub fn load() -> Result<Self> {
        let config = KeelConfig::load().context("failed to load keel config")?;
        let store = ProjectStore::open(&config.database).with_context(|| {
            format!("failed to open project store at {}", config.database.display())
        })?;
        let repos = SocketRepositoryManager::new(config.repo_manager_socket.clone());
        tracing::debug!(
            database = %config.database.display(),
            socket = %config.repo_manager_socket.display(),
            "services ready",
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            repos: Arc::new(repos),
        })
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            self.store.clone(),
            self.store.clone(),
            self.repos.clone(),
            CoordinatorConfig::from(&self.config),
        )
    }
}

/// Standard response envelope: `{"status": "OK", "content": ...}`.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    content: T,
}

pub fn print_envelope<T: Serialize>(content: T) -> Result<()> {
    let envelope = Envelope {
        status: "OK",
        content,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).context("failed to serialize output")?
    );
    Ok(())
}
