//! Coordinator -> server node callback contract

use crate::common::{Invalidation, Payload, Result, ServerId};
use async_trait::async_trait;

/// Outbound calls the coordinator makes into server nodes.
///
/// Every call is addressed to one node and must be answered synchronously.
/// The coordinator issues them while holding its exclusive section and
/// bounds each one with its callback timeout.
#[async_trait]
pub trait NodeCallbacks: Send + Sync {
    /// Drop the node's `READ` grade.
    async fn invalidate_reader(&self, server: &ServerId, inv: Invalidation) -> Result<()>;

    /// Flush the payload and drop `WRITE` to `NONE`.
    async fn invalidate_writer(&self, server: &ServerId, inv: Invalidation) -> Result<Payload>;

    /// Flush the payload and demote `WRITE` to `READ`.
    async fn invalidate_writer_for_reader(
        &self,
        server: &ServerId,
        inv: Invalidation,
    ) -> Result<Payload>;

    /// Lightweight liveness check used by recovery.
    async fn probe(&self, server: &ServerId) -> Result<()>;
}
