//! Project lifecycle coordination: keeps the local project store and the
//! remote Repository Manager in step across create and delete, and enforces
//! ownership-based access.

mod coordinator;
mod error;
mod reconcile;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use error::LifecycleError;
pub use reconcile::{ReconcileFailure, ReconcileReport, Reconciler};
