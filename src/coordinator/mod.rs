//! Coordinator
//!
//! The coordinator is responsible for:
//! - Object ids and the name directory
//! - The per-object writer slot, reader set and known-servers set
//! - Invalidation callbacks when a grant needs other holders to step down
//! - Persisting its table after every change and reconciling it on restore

pub mod callbacks;
pub mod core;
pub mod http;
pub mod node_client;
pub mod record;
pub mod recovery;
pub mod server;
pub mod snapshot;

pub use callbacks::NodeCallbacks;
pub use self::core::{Coordinator, ProtocolSettings};
pub use recovery::ReconcileReport;
pub use server::{CoordinatorServer, RunningCoordinator};
pub use snapshot::{PersistedSnapshot, SnapshotStore};
