//! Server node process wiring

use crate::common::{http_url, NodeConfig, Result, ServerId};
use crate::node::coord_client::HttpCoordinatorClient;
use crate::node::http::{create_router, NodeHttpState};
use crate::node::server_node::ServerNode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct NodeServer {
    config: NodeConfig,
}

/// A node whose callback endpoints are being served
pub struct RunningNode {
    node: Arc<ServerNode>,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl NodeServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Bind the callback listener, resolve the coordinator and start serving.
    pub async fn start(self) -> Result<RunningNode> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let advertise = self
            .config
            .advertise_url
            .clone()
            .unwrap_or_else(|| http_url(addr));

        tracing::info!("Starting server node: {}", advertise);
        tracing::info!("  Callbacks: {}", addr);
        tracing::info!("  Coordinator: {}", self.config.coordinator_url);

        let coordinator =
            HttpCoordinatorClient::connect(&self.config.coordinator_url, self.config.request_timeout())
                .await?;
        let node = ServerNode::new(
            ServerId::new(advertise),
            Arc::new(coordinator),
            self.config.grant_wait(),
        );

        let router = create_router(NodeHttpState { node: node.clone() });
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = stopped.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("Callback server error: {}", e);
            }
        });

        tracing::info!("✓ Server node ready");
        Ok(RunningNode {
            node,
            addr,
            stop,
            task,
        })
    }
}

impl RunningNode {
    pub fn node(&self) -> &Arc<ServerNode> {
        &self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Terminate at the coordinator, then stop serving callbacks.
    ///
    /// Callbacks stay up until the coordinator has flushed this node's
    /// writes.
    pub async fn shutdown(self) -> Result<()> {
        let res = self.node.shutdown().await;
        let _ = self.stop.send(());
        let _ = self.task.await;
        res
    }
}
