//! drive-vault - Main entry point
//!
//! Backup, restore and repair of a Google Drive subtree from the command
//! line. The Drive API token comes from DRIVE_ACCESS_TOKEN or the
//! configuration file.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use drive_vault::config::Config;
use drive_vault::engine::backup::{BackupEngine, BackupRequest, ExclusionSet};
use drive_vault::engine::repair::{RepairEngine, RepairRequest};
use drive_vault::engine::restore::{RestoreEngine, RestoreOptions, RestoreRequest};
use drive_vault::engine::OpContext;
use drive_vault::remote::http::HttpDrive;
use drive_vault::remote::RemoteDrive;
use drive_vault::utils;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Parallel task bound (overrides config, clamped to 1-10)
    #[arg(short, long)]
    parallel: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the configured subtree into a new archive
    Backup {
        /// Prior archive to copy unchanged members from
        #[arg(long, value_name = "ZIP")]
        prior: Option<PathBuf>,
    },
    /// Upload an archive's contents back to the drive
    Restore {
        /// Archive to restore
        archive: PathBuf,
    },
    /// Continue an interrupted restore from its preserved directory
    Resume {
        /// Extraction directory left behind by an earlier restore
        dir: PathBuf,
    },
    /// Re-fetch missing members of a damaged archive
    Repair {
        /// Candidate-damaged archive
        archive: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(parallel) = args.parallel {
        config.backup.max_parallel_tasks = parallel;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting drive-vault v{}", env!("CARGO_PKG_VERSION"));

    let token = std::env::var("DRIVE_ACCESS_TOKEN")
        .ok()
        .or_else(|| config.remote.access_token.clone())
        .filter(|t| !t.is_empty())
        .context("no Drive API token: set DRIVE_ACCESS_TOKEN or remote.access_token")?;
    let drive: Arc<dyn RemoteDrive> = Arc::new(HttpDrive::new(token));

    // Ctrl+C cancels the running operation; the engines save resume state
    // and clean up before returning.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling...");
            signal_cancel.cancel();
        }
    });

    match args.command {
        Command::Backup { prior } => run_backup(args.config, config, drive, cancel, prior).await,
        Command::Restore { archive } => {
            run_restore(config, drive, cancel, RestoreRequest::Fresh { archive }).await
        }
        Command::Resume { dir } => {
            run_restore(config, drive, cancel, RestoreRequest::Resume { dir }).await
        }
        Command::Repair { archive } => run_repair(config, drive, cancel, archive).await,
    }
}

async fn run_backup(
    config_path: Option<PathBuf>,
    mut config: Config,
    drive: Arc<dyn RemoteDrive>,
    cancel: CancellationToken,
    prior: Option<PathBuf>,
) -> Result<()> {
    if config.remote.remote_backup_root_id.is_empty() {
        bail!("remote.remote_backup_root_id must be configured for backup");
    }

    let request = BackupRequest {
        root_id: config.remote.remote_backup_root_id.clone(),
        prior_archive: prior,
        exclusions: ExclusionSet::new(config.backup.excluded_relative_paths.clone()),
        temp_dir: config.storage.temp_work_dir.clone(),
        output_dir: config.storage.archive_output_dir.clone(),
    };

    let ctx = Arc::new(OpContext::new(config.backup.max_parallel_tasks, cancel));
    let outcome = BackupEngine::new(drive).execute(ctx, request).await?;
    tracing::info!(
        "Counters: {}",
        serde_json::to_string(&outcome.counters).unwrap_or_default()
    );

    if outcome.cancelled {
        bail!("backup cancelled");
    }
    if !outcome.success {
        bail!("backup finished dirty; inspect the archive before relying on it");
    }

    config.backup.last_successful_backup_utc = Some(Utc::now());
    if let Some(path) = config_path {
        config
            .save(&path)
            .with_context(|| format!("persisting {}", path.display()))?;
    }
    Ok(())
}

async fn run_restore(
    config: Config,
    drive: Arc<dyn RemoteDrive>,
    cancel: CancellationToken,
    request: RestoreRequest,
) -> Result<()> {
    let options = RestoreOptions {
        restore_parent_id: config.remote.remote_restore_parent_id.clone(),
        max_parallel_tasks: config.backup.max_parallel_tasks,
        temp_dir: config.storage.temp_work_dir.clone(),
    };

    let outcome = RestoreEngine::new(drive)
        .execute(cancel, &options, request)
        .await?;
    tracing::info!(
        "Counters: {}",
        serde_json::to_string(&outcome.counters).unwrap_or_default()
    );

    if let Some(dir) = &outcome.resume_dir {
        tracing::info!("Resume later with: drive-vault resume {}", dir.display());
    }
    if outcome.cancelled {
        bail!("restore cancelled");
    }
    if !outcome.success {
        bail!("restore incomplete");
    }
    Ok(())
}

async fn run_repair(
    config: Config,
    drive: Arc<dyn RemoteDrive>,
    cancel: CancellationToken,
    archive: PathBuf,
) -> Result<()> {
    let request = RepairRequest {
        archive,
        archive_output_dir: config.storage.archive_output_dir.clone(),
        temp_dir: config.storage.temp_work_dir.clone(),
    };

    let ctx = Arc::new(OpContext::new(config.backup.max_parallel_tasks, cancel));
    let outcome = RepairEngine::new(drive).execute(ctx, request).await?;
    tracing::info!(
        "Counters: {}",
        serde_json::to_string(&outcome.counters).unwrap_or_default()
    );

    if outcome.cancelled {
        bail!("repair cancelled");
    }
    if !outcome.overall_success {
        bail!("repair could not recover every missing member");
    }
    if let Some(path) = outcome.repaired_archive {
        tracing::info!("Repaired archive: {}", path.display());
    }
    Ok(())
}
