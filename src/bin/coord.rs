//! Coordinator binary

use clap::{Parser, Subcommand};
use minidsm::common::config::{CallbackFailurePolicy, Config, RestoreMode};
use minidsm::coordinator::server::should_restore;
use minidsm::CoordinatorServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidsm-coord")]
#[command(about = "minidsm coherence coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Snapshot file
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Restore the last snapshot at startup
        #[arg(long, value_enum)]
        restore: Option<RestoreMode>,

        /// Answer yes to the restore prompt
        #[arg(long, short = 'y')]
        yes: bool,

        /// Upper bound for one invalidation callback
        #[arg(long)]
        callback_timeout_ms: Option<u64>,

        /// What to do with a node whose callback fails
        #[arg(long, value_enum)]
        on_callback_failure: Option<CallbackFailurePolicy>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file, then override with CLI arguments
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
        Commands::Serve {
            bind,
            snapshot,
            restore,
            yes,
            callback_timeout_ms,
            on_callback_failure,
        } => {
            let mut coord_config = config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(snapshot) = snapshot {
                coord_config.snapshot_path = snapshot;
            }
            if let Some(restore) = restore {
                coord_config.restore = restore;
            }
            if let Some(ms) = callback_timeout_ms {
                coord_config.callback_timeout_ms = ms;
            }
            if let Some(policy) = on_callback_failure {
                coord_config.on_callback_failure = policy;
            }

            let server = CoordinatorServer::new(coord_config.clone());
            let restore = should_restore(
                coord_config.restore,
                server.snapshot_store().exists(),
                yes,
                std::io::stdin().lock(),
                std::io::stdout(),
            )?;
            server.serve(restore).await?;
        }
    }

    Ok(())
}
