//! Server nodes
//!
//! A server node caches shared objects for its local application and talks
//! to the coordinator only on cache misses. It also answers the
//! coordinator's invalidation callbacks.

pub mod api;
pub mod coord_client;
pub mod handle;
pub mod http;
pub mod local;
pub mod server;
pub mod server_node;

pub use api::CoordinatorApi;
pub use handle::ObjectHandle;
pub use local::{LocalCluster, LocalTransport};
pub use server::{NodeServer, RunningNode};
pub use server_node::ServerNode;
