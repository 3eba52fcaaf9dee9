//! Coordinator server

use crate::common::{CoordinatorConfig, Error, Result, RestoreMode};
use crate::coordinator::core::{Coordinator, ProtocolSettings};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::node_client::HttpNodeClient;
use crate::coordinator::record::ObjectTable;
use crate::coordinator::snapshot::SnapshotStore;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Decide whether to restore the last snapshot.
///
/// `prompt` asks on `input`/`output` unless `assume_yes` is set; a missing
/// snapshot never restores.
pub fn should_restore(
    mode: RestoreMode,
    snapshot_exists: bool,
    assume_yes: bool,
    mut input: impl BufRead,
    mut output: impl Write,
) -> Result<bool> {
    if !snapshot_exists {
        return Ok(false);
    }
    match mode {
        RestoreMode::Always => Ok(true),
        RestoreMode::Never => Ok(false),
        RestoreMode::Prompt if assume_yes => Ok(true),
        RestoreMode::Prompt => {
            write!(output, "Restore the previous coordinator state? [y/N] ")?;
            output.flush()?;
            let mut answer = String::new();
            input.read_line(&mut answer)?;
            Ok(matches!(
                answer.trim().to_ascii_lowercase().as_str(),
                "y" | "yes"
            ))
        }
    }
}

pub struct CoordinatorServer {
    config: CoordinatorConfig,
}

/// A coordinator serving its HTTP API
pub struct RunningCoordinator {
    coordinator: Arc<Coordinator>,
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CoordinatorServer {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.config.snapshot_path)
    }

    /// Build the coordinator. With `restore`, the last snapshot is loaded
    /// and reconciled against the live servers before anything is served.
    pub async fn build(&self, restore: bool) -> Result<Coordinator> {
        self.config.validate()?;
        let store = self.snapshot_store();
        let nodes = Arc::new(HttpNodeClient::new(self.config.callback_timeout())?);
        let coordinator = Coordinator::new(nodes, ProtocolSettings::from(&self.config));

        if !restore {
            tracing::info!("Starting with an empty object table");
            return Ok(coordinator.with_store(store));
        }

        let snapshot = store.load()?.ok_or_else(|| {
            Error::NotFound(format!("snapshot at {}", store.path().display()))
        })?;
        tracing::info!(
            "Restored {} objects (next id {}) from {}",
            snapshot.records.len(),
            snapshot.next_id,
            store.path().display()
        );
        let coordinator = coordinator
            .with_table(ObjectTable::from_snapshot(snapshot))
            .with_store(store);

        let report = coordinator.reconcile().await?;
        tracing::info!(
            "Reconciled restored state: {} alive, {} pruned",
            report.alive.len(),
            report.pruned.len()
        );
        Ok(coordinator)
    }

    pub async fn start(self, restore: bool) -> Result<RunningCoordinator> {
        tracing::info!("Starting coordinator");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Snapshot: {}", self.config.snapshot_path.display());
        tracing::info!("  Callback timeout: {:?}", self.config.callback_timeout());
        tracing::info!("  On callback failure: {:?}", self.config.on_callback_failure);

        let coordinator = Arc::new(self.build(restore).await?);
        let router = create_router(CoordState {
            coordinator: coordinator.clone(),
        });

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = stopped.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        tracing::info!("✓ Coordinator ready on {}", addr);
        Ok(RunningCoordinator {
            coordinator,
            addr,
            stop,
            task,
        })
    }

    /// Serve until Ctrl-C.
    pub async fn serve(self, restore: bool) -> Result<()> {
        let running = self.start(restore).await?;
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down coordinator");
        running.shutdown().await;
        Ok(())
    }
}

impl RunningCoordinator {
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        crate::common::http_url(self.addr)
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}
