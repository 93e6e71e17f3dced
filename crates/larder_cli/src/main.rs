//! Larder CLI
//!
//! Command-line tools for inspecting and repairing Larder offline stores.
//!
//! # Commands
//!
//! - `inspect` - Summarize every collection document in a store
//! - `pending` - List records waiting to be pushed
//! - `reset-checkpoint` - Force the next sync to pull everything
//! - `purge-tombstones` - Remove confirmed tombstones

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Larder offline store tools.
#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize every collection document
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List records with pending changes
    Pending {
        /// Entity type, e.g. "items"
        entity_type: String,

        /// Scope id
        scope: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the pull checkpoint so the next sync is a full pull
    ResetCheckpoint {
        /// Entity type
        entity_type: String,

        /// Scope id
        scope: String,
    },

    /// Remove tombstones the server has confirmed
    PurgeTombstones {
        /// Entity type
        entity_type: String,

        /// Scope id
        scope: String,

        /// Only purge tombstones confirmed at least this many days ago
        #[arg(long, default_value = "0")]
        older_than_days: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Pending {
            entity_type,
            scope,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for pending")?;
            commands::pending::run(&path, &entity_type, &scope, &format)?;
        }
        Commands::ResetCheckpoint { entity_type, scope } => {
            let path = cli.path.ok_or("Store path required for reset-checkpoint")?;
            commands::checkpoint::reset(&path, &entity_type, &scope)?;
        }
        Commands::PurgeTombstones {
            entity_type,
            scope,
            older_than_days,
        } => {
            let path = cli.path.ok_or("Store path required for purge-tombstones")?;
            commands::purge::run(&path, &entity_type, &scope, older_than_days)?;
        }
        Commands::Version => {
            println!("Larder CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
