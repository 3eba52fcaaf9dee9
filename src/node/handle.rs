use crate::common::{LockGrade, ObjectId, Payload, Result};
use crate::node::server_node::ServerNode;
use std::sync::Arc;

/// Application-side reference to a shared object.
///
/// Cloning is cheap; all clones go through the same node cache.
#[derive(Clone)]
pub struct ObjectHandle {
    id: ObjectId,
    node: Arc<ServerNode>,
}

impl ObjectHandle {
    pub(crate) fn new(id: ObjectId, node: Arc<ServerNode>) -> Self {
        Self { id, node }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn grade(&self) -> LockGrade {
        self.node.grade(self.id)
    }

    pub async fn read(&self) -> Result<Payload> {
        self.node.read(self.id).await
    }

    pub async fn write(&self, payload: impl Into<Payload>) -> Result<()> {
        self.node.write(self.id, payload).await
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("node", self.node.id())
            .finish()
    }
}
