//! Spool Ingest - spooling-directory ingestion worker

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spool_common::logging::{init_logging, LogLevel};
use spool_ingest::config::SpoolConfig;
use spool_ingest::partition::PartitionPredicate;
use spool_ingest::schema::inference::resolve_schemas;
use spool_ingest::selector::FileSelector;
use spool_ingest::worker::run_workers;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "spool-ingest")]
#[command(author, version, about = "Spooling-directory file ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process input files until interrupted
    Run {
        /// TOML configuration file
        #[arg(short, long, env = "SPOOL_CONFIG")]
        config: PathBuf,

        /// Run every task_count shard in this process
        #[arg(long)]
        local_workers: bool,
    },

    /// Print the key and value schemas the worker would use
    InferSchema {
        /// TOML configuration file
        #[arg(short, long, env = "SPOOL_CONFIG")]
        config: PathBuf,
    },

    /// Print the files this worker would process, in order
    Plan {
        /// TOML configuration file
        #[arg(short, long, env = "SPOOL_CONFIG")]
        config: PathBuf,
    },
}

impl Command {
    fn config_path(&self) -> &PathBuf {
        match self {
            Command::Run { config, .. } => config,
            Command::InferSchema { config } => config,
            Command::Plan { config } => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.command.config_path();
    let config = SpoolConfig::load(path)
        .with_context(|| format!("Failed to load configuration from '{}'", path.display()))?;

    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { local_workers, .. } => {
            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));

            info!(
                input = %config.input_path.display(),
                task_index = config.task_index,
                task_count = config.task_count,
                local_workers,
                "Starting spool ingestion"
            );
            let stats = run_workers(&config, cancel, local_workers).await?;
            let records: u64 = stats.iter().map(|s| s.records).sum();
            info!(workers = stats.len(), records, "Ingestion stopped");
        }
        Command::InferSchema { .. } => {
            let selector = selector(&config)?;
            let schemas = resolve_schemas(&config, &selector)?;
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
        Command::Plan { .. } => {
            let selector = selector(&config)?;
            let files = selector.scan();
            for file in &files {
                println!(
                    "{}\t{}\t{}",
                    file.relative_path.display(),
                    file.length,
                    file.last_modified.to_rfc3339()
                );
            }
            info!(files = files.len(), task_index = config.task_index, "Plan complete");
        }
    }

    Ok(())
}

fn selector(config: &SpoolConfig) -> Result<FileSelector> {
    let partition = PartitionPredicate::from_config(config)?;
    Ok(FileSelector::from_config(config, partition)?)
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current batch");
        },
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}
