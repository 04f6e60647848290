//! Repository Manager client abstraction.
//!
//! The Repository Manager is a remote service owning git storage, addressed by
//! path. This crate provides the [`RepositoryManager`] seam, a JSON-lines
//! socket client and server adapter for it, and an in-memory stand-in.

mod error;
pub mod manager;
pub mod memory;
pub mod protocol;
pub mod server;

pub use error::RepoError;
pub use manager::{with_deadline, RepositoryManager};
pub use memory::{MemoryRepositoryManager, RepoCall};
pub use protocol::{RepoOp, RepoRequest, RepoResponse, SocketRepositoryManager};
pub use server::{bind, serve};
