//! Server node binary with the shared-text console

use clap::{Parser, Subcommand};
use minidsm::common::config::Config;
use minidsm::{NodeServer, ObjectHandle, ServerNode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidsm-node")]
#[command(about = "minidsm server node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and an interactive console
    Run {
        /// Coordinator URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Bind address for callback endpoints
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// URL the coordinator should use to reach this node
        #[arg(long)]
        advertise: Option<String>,
    },
}

/// Named objects this console has touched
struct Console {
    node: Arc<ServerNode>,
    handles: HashMap<String, ObjectHandle>,
}

impl Console {
    async fn handle(&mut self, name: &str) -> minidsm::Result<ObjectHandle> {
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }
        let handle = self.node.lookup_by_name(name).await?;
        self.handles.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn run(&mut self, line: &str) -> minidsm::Result<Option<String>> {
        let mut parts = line.trim().splitn(3, ' ');
        let command = parts.next().unwrap_or_default();
        let name = parts.next();
        let text = parts.next().unwrap_or_default();

        match (command, name) {
            ("create", Some(name)) => {
                minidsm::common::validate_name(name)?;
                let handle = self.node.create_object(text).await?;
                self.node.register_name(name, &handle).await?;
                self.handles.insert(name.to_string(), handle.clone());
                Ok(Some(format!("created '{}' as object {}", name, handle.id())))
            }
            ("read", Some(name)) => {
                let payload = self.handle(name).await?.read().await?;
                Ok(Some(payload.to_text()))
            }
            ("write", Some(name)) => {
                self.handle(name).await?.write(text).await?;
                Ok(Some("ok".to_string()))
            }
            ("", _) => Ok(None),
            _ => Ok(Some(
                "commands: create <name> <text> | read <name> | write <name> <text> | quit"
                    .to_string(),
            )),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            coordinator,
            bind,
            advertise,
        } => {
            let mut node_config = config.node;
            if let Some(url) = coordinator {
                node_config.coordinator_url = url;
            }
            if let Some(bind) = bind {
                node_config.bind_addr = bind;
            }
            if advertise.is_some() {
                node_config.advertise_url = advertise;
            }

            let running = NodeServer::new(node_config).start().await?;
            println!("node {} ready", running.node().id());

            let mut console = Console {
                node: running.node().clone(),
                handles: HashMap::new(),
            };
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Some(line) = line? else { break };
                        if line.trim() == "quit" {
                            break;
                        }
                        match console.run(&line).await {
                            Ok(Some(out)) => println!("{}", out),
                            Ok(None) => {}
                            Err(e) => println!("error: {}", e),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            running.shutdown().await?;
        }
    }

    Ok(())
}
