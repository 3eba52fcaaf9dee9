//! Server node -> coordinator contract

use crate::common::{Grant, ObjectId, ObjectRef, Payload, Result, ServerId};
use async_trait::async_trait;

/// Calls a server node makes into the coordinator.
///
/// Implemented by [`crate::coordinator::Coordinator`] itself for in-process
/// use and by [`HttpCoordinatorClient`](crate::node::coord_client::HttpCoordinatorClient)
/// over the network.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn allocate_id(&self) -> Result<ObjectId>;

    async fn register_object(
        &self,
        name: &str,
        id: ObjectId,
        payload: Payload,
        caller: &ServerId,
    ) -> Result<()>;

    async fn lookup_object(&self, name: &str, caller: &ServerId) -> Result<ObjectRef>;

    async fn acquire_read(&self, id: ObjectId, caller: &ServerId) -> Result<Grant>;

    async fn acquire_write(&self, id: ObjectId, caller: &ServerId) -> Result<Grant>;

    async fn terminate(&self, caller: &ServerId) -> Result<()>;
}
