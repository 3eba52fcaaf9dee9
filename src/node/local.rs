//! In-process transport
//!
//! Wires server nodes straight to a [`Coordinator`] without sockets. Used by
//! the integration tests and handy for embedding a whole cluster in one
//! process.

use crate::common::{Error, Grant, Invalidation, ObjectId, ObjectRef, Payload, Result, ServerId};
use crate::coordinator::callbacks::NodeCallbacks;
use crate::coordinator::core::{Coordinator, ProtocolSettings};
use crate::node::api::CoordinatorApi;
use crate::node::server_node::ServerNode;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// Routes callbacks to attached nodes by [`ServerId`].
///
/// Nodes are held weakly: dropping a node makes it unreachable, just like a
/// crashed process.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<ServerId, Weak<ServerNode>>>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, node: &Arc<ServerNode>) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.insert(node.id().clone(), Arc::downgrade(node));
    }

    /// Cut `id` off as if its process had died.
    pub fn detach(&self, id: &ServerId) {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes.remove(id);
    }

    fn node(&self, id: &ServerId) -> Result<Arc<ServerNode>> {
        let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
        nodes
            .get(id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::TransportFailure(format!("{} is not reachable", id)))
    }
}

#[async_trait]
impl NodeCallbacks for LocalTransport {
    async fn invalidate_reader(&self, server: &ServerId, inv: Invalidation) -> Result<()> {
        self.node(server)?.invalidate_reader(inv).await
    }

    async fn invalidate_writer(&self, server: &ServerId, inv: Invalidation) -> Result<Payload> {
        self.node(server)?.invalidate_writer(inv).await
    }

    async fn invalidate_writer_for_reader(
        &self,
        server: &ServerId,
        inv: Invalidation,
    ) -> Result<Payload> {
        self.node(server)?.invalidate_writer_for_reader(inv).await
    }

    async fn probe(&self, server: &ServerId) -> Result<()> {
        self.node(server)?.liveness_probe()
    }
}

#[async_trait]
impl CoordinatorApi for Coordinator {
    async fn allocate_id(&self) -> Result<ObjectId> {
        Coordinator::allocate_id(self).await
    }

    async fn register_object(
        &self,
        name: &str,
        id: ObjectId,
        payload: Payload,
        caller: &ServerId,
    ) -> Result<()> {
        Coordinator::register_object(self, name, id, payload, caller).await
    }

    async fn lookup_object(&self, name: &str, caller: &ServerId) -> Result<ObjectRef> {
        Coordinator::lookup_object(self, name, caller).await
    }

    async fn acquire_read(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        Coordinator::acquire_read(self, id, caller).await
    }

    async fn acquire_write(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        Coordinator::acquire_write(self, id, caller).await
    }

    async fn terminate(&self, caller: &ServerId) -> Result<()> {
        Coordinator::terminate(self, caller).await
    }
}

/// A coordinator and any number of nodes sharing one process
pub struct LocalCluster {
    coordinator: Arc<Coordinator>,
    transport: Arc<LocalTransport>,
    grant_wait: Duration,
}

impl LocalCluster {
    pub fn new(settings: ProtocolSettings) -> Self {
        let transport = LocalTransport::new();
        let coordinator = Arc::new(Coordinator::new(transport.clone(), settings));
        Self::with_coordinator(coordinator, transport)
    }

    /// Build around an existing coordinator whose callbacks already go
    /// through `transport`.
    pub fn with_coordinator(coordinator: Arc<Coordinator>, transport: Arc<LocalTransport>) -> Self {
        // a callback waiting on a lost grant must give up before the
        // coordinator times it out
        let grant_wait = coordinator.settings().callback_timeout / 2;
        Self {
            coordinator,
            transport,
            grant_wait,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    /// Start a node named `id` and make it reachable for callbacks.
    pub fn join(&self, id: &str) -> Arc<ServerNode> {
        let node = ServerNode::new(ServerId::new(id), self.coordinator.clone(), self.grant_wait);
        self.transport.attach(&node);
        node
    }
}
