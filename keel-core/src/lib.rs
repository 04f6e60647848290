//! Keel core library: domain types, project store, identity lookup, config.
//!
//! Public API surface:
//! - [`types`]: newtypes, [`Project`], [`User`], [`ProjectView`]
//! - [`error`]: [`StoreError`], [`ConfigError`]
//! - [`store`]: SQLite-backed [`ProjectStore`]
//! - [`identity`]: [`IdentityDirectory`] seam
//! - [`config`]: `~/.keel/config.yaml` loading and path helpers

pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod types;

pub use config::KeelConfig;
pub use error::{ConfigError, StoreError};
pub use identity::IdentityDirectory;
pub use store::ProjectStore;
pub use types::{Project, ProjectId, ProjectName, ProjectState, ProjectView, User, UserId};
