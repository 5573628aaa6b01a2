//! # Task Review CLI (`review`)
//!
//! ## Usage
//!
//! ```bash
//! review --config ./config/review.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `review init` | Create the SQLite database and schema |
//! | `review ingest` | Index policy documents from the data directory |
//! | `review check` | Review one task and print the result as JSON |
//! | `review health` | Report indexed chunks for the configured model |
//! | `review serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use task_review::{config, ingest, logging, migrate, server, service};

/// Task Review CLI: automated review of task requests against policy
/// documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/review.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "review",
    about = "Task Review: retrieval-grounded, policy-gated review of task requests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/review.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest policy documents.
    ///
    /// Walks the data directory, splits documents into chunks, embeds new
    /// chunks and stores them. Chunks already stored are skipped.
    Ingest {
        /// Directory to ingest instead of `[ingest].data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Review one task and print the result as JSON.
    Check {
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        details: String,
    },

    /// Check that chunks are indexed for the configured embedding model.
    ///
    /// Exits non-zero when the database is unreachable or empty.
    Health,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { data_dir } => {
            ingest::run_ingest(&cfg, data_dir).await?;
        }
        Commands::Check { task_id, details } => {
            service::run_check(&cfg, &task_id, &details).await?;
        }
        Commands::Health => {
            service::run_health(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
