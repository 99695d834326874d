//! # Notekeep CLI
//!
//! The `notekeep` binary drives the synchronization and indexing core for a
//! git-backed note library.
//!
//! ## Usage
//!
//! ```bash
//! notekeep --config ./notekeep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notekeep init` | Create the database, storage domains, and search index |
//! | `notekeep sync` | Run one metadata cycle followed by a search reindex |
//! | `notekeep search "<query>"` | Query the search index |
//! | `notekeep watch` | Run the periodic jobs until interrupted |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notekeep::config;
use notekeep::sync::{Scheduler, SyncService};

/// Notekeep — a git-backed synchronization and indexing core for a
/// plain-file note library.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "notekeep",
    about = "Notekeep — git-backed sync and search for a plain-file note library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./notekeep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize storage and the search index.
    ///
    /// Creates the SQLite database file, the storage domains, and the
    /// search index schema. Idempotent; safe to re-run.
    Init,

    /// Run one full sync: metadata cycle, then search reindex.
    Sync,

    /// Search the note library.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Run the periodic metadata and search jobs until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notekeep=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SyncService::from_config(&cfg).await?;
            println!("Storage and search index initialized.");
        }
        Commands::Sync => {
            let service = SyncService::from_config(&cfg).await?;
            let report = service.run_now().await?;
            println!(
                "Sync complete: {} applied, {} skipped.",
                report.applied(),
                report.skipped()
            );
        }
        Commands::Search { query, limit } => {
            let service = SyncService::from_config(&cfg).await?;
            let hits = service.engine().search_files(&query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            } else {
                for hit in hits {
                    println!("{}  ({})", hit.path, hit.name);
                }
            }
        }
        Commands::Watch => {
            let service = Arc::new(SyncService::from_config(&cfg).await?);
            let (stop_tx, stop_rx) = watch::channel(false);

            let (metadata_job, search_job) = Scheduler::spawn(
                service,
                cfg.sync.metadata_interval(),
                cfg.sync.search_interval(),
                stop_rx,
            );

            info!(
                metadata_interval = ?cfg.sync.metadata_interval(),
                search_interval = ?cfg.sync.search_interval(),
                "watching library; press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c().await?;
            info!("stopping");

            stop_tx.send(true)?;
            metadata_job.await?;
            search_job.await?;
        }
    }

    Ok(())
}
