//! ensync CLI
//!
//! Command-line tools for ensync replicas.
//!
//! # Commands
//!
//! - `init` - Create a local replica directory
//! - `inspect` - Display generation, documents, conflicts and checkpoints
//! - `put` / `delete` - Write documents
//! - `resolve` - Pick the winner of a conflicted document
//! - `keygen` - Write new key material
//! - `sync` - Sync with a replica in a server data directory

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ensync command-line replica tools.
#[derive(Parser)]
#[command(name = "ensync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local replica directory
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
    /// Create a new local replica
    Init,

    /// Display replica state
    Inspect {
        /// List every document
        #[arg(short, long)]
        docs: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Create or update a JSON document
    Put {
        /// Document id; a new id is generated if omitted
        #[arg(long)]
        id: Option<String>,

        /// Key material file written by `keygen`
        #[arg(long)]
        keys: PathBuf,

        /// Document content as JSON
        content: String,
    },

    /// Delete a document
    Delete {
        /// Document id
        id: String,

        /// Key material file written by `keygen`
        #[arg(long)]
        keys: PathBuf,
    },

    /// Resolve a conflicted document
    Resolve {
        /// Document id
        id: String,

        /// Revision to keep, as shown by `inspect --docs`
        revision: String,

        /// Key material file written by `keygen`
        #[arg(long)]
        keys: PathBuf,
    },

    /// Generate key material
    Keygen {
        /// Output file
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Sync the local replica with a replica in a server data directory
    Sync {
        /// Server data directory
        #[arg(long)]
        server_dir: PathBuf,

        /// Name of the remote replica
        #[arg(long)]
        replica: String,

        /// Key material file written by `keygen`
        #[arg(long)]
        keys: PathBuf,

        /// Fail instead of creating a missing remote replica
        #[arg(long)]
        no_autocreate: bool,

        /// Documents per pull request
        #[arg(long, default_value = "100")]
        batch_size: u32,

        /// Attempts for transient failures
        #[arg(long, default_value = "3")]
        attempts: u32,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Init => {
            let path = cli.path.ok_or("Replica path required for init")?;
            commands::init::run(&path)?;
        }
        Commands::Inspect { docs, format } => {
            let path = cli.path.ok_or("Replica path required for inspect")?;
            commands::inspect::run(&path, docs, &format)?;
        }
        Commands::Put { id, keys, content } => {
            let path = cli.path.ok_or("Replica path required for put")?;
            commands::put::run(&path, &keys, id.as_deref(), &content)?;
        }
        Commands::Delete { id, keys } => {
            let path = cli.path.ok_or("Replica path required for delete")?;
            commands::put::delete(&path, &keys, &id)?;
        }
        Commands::Resolve { id, revision, keys } => {
            let path = cli.path.ok_or("Replica path required for resolve")?;
            commands::resolve::run(&path, &keys, &id, &revision)?;
        }
        Commands::Keygen { output, force } => {
            commands::keygen::run(&output, force)?;
        }
        Commands::Sync {
            server_dir,
            replica,
            keys,
            no_autocreate,
            batch_size,
            attempts,
            timeout,
        } => {
            let path = cli.path.ok_or("Replica path required for sync")?;
            let options = commands::sync::SyncOptions {
                server_dir,
                replica,
                keys,
                autocreate: !no_autocreate,
                batch_size,
                attempts,
                timeout: timeout.map(std::time::Duration::from_secs),
            };
            commands::sync::run(&path, &options)?;
        }
    }

    Ok(())
}
