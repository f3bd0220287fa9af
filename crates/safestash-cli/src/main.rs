//! SafeStash CLI
//!
//! Command-line interface for SafeStash - inspect and repair a bounded
//! key-value store: quota, backups, reclamation and records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use safestash_core::{Config, Storage};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "safestash")]
#[command(about = "SafeStash - Quota-aware storage with backups and recovery")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show storage usage against the quota
    Quota {
        /// Number of largest keys to list
        #[arg(short, long, default_value_t = 5)]
        top: usize,
    },
    /// Manage backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Free space by removing old backups and stale keys
    Reclaim,
    /// Manage records stored under a key
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Snapshot the current value of a key
    Create {
        /// Storage key
        key: String,
    },
    /// Restore a key from its newest backup
    Restore {
        /// Storage key
        key: String,
    },
    /// List backups, newest first
    #[command(alias = "ls")]
    List {
        /// Only backups of this key
        key: Option<String>,
    },
    /// Delete every backup of a key
    Clear {
        /// Storage key
        key: String,
    },
}

#[derive(Subcommand)]
enum RecordCommands {
    /// List records
    #[command(alias = "ls")]
    List {
        /// Storage key
        key: String,
        /// Only records whose FIELD equals VALUE (e.g. taskId=t1)
        #[arg(long, value_name = "FIELD=VALUE")]
        r#where: Option<String>,
    },
    /// Show a single record
    Get {
        /// Storage key
        key: String,
        /// Record ID
        id: String,
    },
    /// Add a record from a JSON object
    Add {
        /// Storage key
        key: String,
        /// Record fields as a JSON object
        json: String,
    },
    /// Add several records from a JSON array of objects
    AddMany {
        /// Storage key
        key: String,
        /// JSON array of objects
        json: String,
    },
    /// Merge fields into a record
    Update {
        /// Storage key
        key: String,
        /// Record ID
        id: String,
        /// Fields to merge as a JSON object
        json: String,
    },
    /// Delete a record
    #[command(alias = "rm")]
    Remove {
        /// Storage key
        key: String,
        /// Record ID
        id: String,
    },
    /// Replace a key's whole value with a JSON file
    Import {
        /// Storage key
        key: String,
        /// File holding a JSON array
        file: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g. data_dir, quota.capacity_mb, backup.max_backups)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config);
    debug!("Using data directory {:?}", config.data_dir);

    let storage = Storage::open_with_config(config)?;

    match cli.command {
        Commands::Quota { top } => commands::quota::show(&storage, top, &output),
        Commands::Backup { command } => handle_backup_command(command, &storage, &output),
        Commands::Reclaim => commands::quota::reclaim(&storage, &output),
        Commands::Record { command } => handle_record_command(command, &storage, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_backup_command(command: BackupCommands, storage: &Storage, output: &Output) -> Result<()> {
    match command {
        BackupCommands::Create { key } => commands::backup::create(storage, key, output),
        BackupCommands::Restore { key } => commands::backup::restore(storage, key, output),
        BackupCommands::List { key } => commands::backup::list(storage, key, output),
        BackupCommands::Clear { key } => commands::backup::clear(storage, key, output),
    }
}

async fn handle_record_command(
    command: RecordCommands,
    storage: &Storage,
    output: &Output,
) -> Result<()> {
    match command {
        RecordCommands::List { key, r#where } => {
            commands::record::list(storage, key, r#where, output)
        }
        RecordCommands::Get { key, id } => commands::record::get(storage, key, id, output),
        RecordCommands::Add { key, json } => commands::record::add(storage, key, json, output),
        RecordCommands::AddMany { key, json } => {
            commands::record::add_many(storage, key, json, output)
        }
        RecordCommands::Update { key, id, json } => {
            commands::record::update(storage, key, id, json, output)
        }
        RecordCommands::Remove { key, id } => commands::record::remove(storage, key, id, output),
        RecordCommands::Import { key, file } => {
            commands::record::import(storage, key, file, output).await
        }
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Path) => commands::config::path(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr so stdout stays parseable
///
/// `RUST_LOG` wins over the configured `log_level`.
fn init_logging(config: &Config) {
    let log_level = config.log_level.as_deref().unwrap_or("warn");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "safestash_core={},safestash_cli={}",
            log_level, log_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
