//! pull-backup - Main entry point
//!
//! One invocation takes one snapshot (or lists the existing ones).

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use pull_backup::daemon::{RunLock, ShutdownCoordinator};
use pull_backup::executor::retention::snapshot_age_days;
use pull_backup::executor::{BackupExecutor, BackupJob};
use pull_backup::remote::ManifestFetcher;
use pull_backup::snapshot::{FsStore, SnapshotStore};
use pull_backup::{config::Config, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host to back up, as `user@host` (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Backup root directory (overrides config)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Retention window in days (overrides config)
    #[arg(long)]
    retention_days: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Take one snapshot (default)
    Run,
    /// Show the snapshots under the backup root
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(host) = args.host {
        config.remote.host = host;
    }
    if let Some(root) = args.root {
        config.backup.root = root;
    }
    if let Some(days) = args.retention_days {
        config.backup.retention_days = days;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::List => list(&config),
    }
}

async fn run(config: &Config) -> Result<()> {
    config.validate()?;

    tracing::info!(
        "Starting pull-backup v{} (host: {}, root: {})",
        env!("CARGO_PKG_VERSION"),
        config.remote.host,
        config.backup.root.display()
    );

    if !nix::unistd::geteuid().is_root() {
        tracing::warn!("Not running as root: file ownership and special files may not be preserved");
    }

    let _lock = RunLock::acquire(&config.backup.root)?;
    let store = FsStore::open(&config.backup.root)?;
    let fetcher = config.build_fetcher();
    let engine = config.build_engine();

    let job = BackupJob {
        host: fetcher.host().to_string(),
        source: config.transfer_source(),
        retention_days: config.backup.retention_days,
        excludes: config.transfer.excludes.clone(),
    };

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let waiter = shutdown_coordinator.clone();
    let signal_handle = tokio::spawn(async move {
        waiter.wait_for_signal().await;
    });

    let mut executor =
        BackupExecutor::with_cancel(store, fetcher, engine, shutdown_coordinator.token());
    let result = executor.execute(&job, Local::now().naive_local()).await;
    signal_handle.abort();

    let result = result?;
    if !result.sweep.is_clean() {
        tracing::warn!(
            "{} expired snapshot(s) could not be deleted",
            result.sweep.errors.len()
        );
    }
    tracing::info!(
        "Snapshot {} ({}) written to {}: {}",
        result.snapshot,
        result.kind.as_str(),
        result.path.display(),
        result.transfer.summary
    );
    Ok(())
}

fn list(config: &Config) -> Result<()> {
    let store = FsStore::open(&config.backup.root)?;
    let latest = store.read_pointer().ok().flatten();
    let now = Local::now().naive_local();

    let snapshots = store.list_snapshots()?;
    if snapshots.is_empty() {
        println!("No snapshots under {}", config.backup.root.display());
        return Ok(());
    }

    for snapshot in snapshots {
        let age = snapshot_age_days(snapshot.date, now);
        let state = if snapshot.complete { "complete" } else { "incomplete" };
        let marker = if latest.as_deref() == Some(snapshot.path.as_path()) {
            "  <- latest"
        } else {
            ""
        };
        println!("{}  {:>4}d  {:<10}{}", snapshot.name, age, state, marker);
    }
    Ok(())
}
