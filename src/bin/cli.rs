//! CLI for inspecting a coordinator

use clap::{Parser, Subcommand};
use minidsm::common::wire::{decode, StatusReport};
use minidsm::common::format_bytes;
use minidsm::coordinator::SnapshotStore;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minidsm")]
#[command(about = "minidsm distributed shared objects CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the live lock table of a coordinator
    Status {
        /// Coordinator URL
        #[arg(long, default_value = "http://localhost:1224")]
        coordinator: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a snapshot file offline
    Inspect {
        /// Snapshot file
        #[arg(long)]
        snapshot: PathBuf,
    },
}

fn holders(writer: Option<&str>, readers: &[String]) -> String {
    match writer {
        Some(w) => format!("writer {}", w),
        None if readers.is_empty() => "unlocked".to_string(),
        None => format!("readers {}", readers.join(", ")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { coordinator, json } => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?;
            let url = format!("{}/admin/status", coordinator.trim_end_matches('/'));
            let report: StatusReport = decode(http.get(url).send().await?).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("Coordinator status ({}):", report.generated_at);
            println!("  Next id: {}", report.next_id);
            println!("  Objects: {}", report.objects.len());
            for obj in &report.objects {
                let readers: Vec<String> = obj.readers.iter().map(|r| r.to_string()).collect();
                println!(
                    "  [{}] {} ({}, epoch {}): {}, {} known servers",
                    obj.id,
                    obj.name.as_deref().unwrap_or("-"),
                    format_bytes(obj.payload_len),
                    obj.epoch,
                    holders(obj.writer.as_ref().map(|w| w.as_str()), &readers),
                    obj.servers.len()
                );
            }
        }

        Commands::Inspect { snapshot } => {
            let store = SnapshotStore::new(&snapshot);
            let Some(snap) = store.load()? else {
                anyhow::bail!("no snapshot at {}", snapshot.display());
            };
            println!("Snapshot {}:", snapshot.display());
            println!("  Next id: {}", snap.next_id);
            println!("  Names: {}", snap.names.len());
            println!("  Records: {}", snap.records.len());
            for (name, id) in &snap.names {
                println!("    '{}' -> {}", name, id);
            }
            for record in snap.records.values() {
                let readers: Vec<String> = record.readers.iter().map(|r| r.to_string()).collect();
                println!(
                    "    [{}] {}, epoch {}, {}",
                    record.id,
                    format_bytes(record.payload.len() as u64),
                    record.epoch,
                    holders(record.writer.as_ref().map(|w| w.as_str()), &readers)
                );
            }
        }
    }

    Ok(())
}
