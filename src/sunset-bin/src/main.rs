mod snapshot;

use anyhow::{Context, Result, anyhow};
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use engine::lifecycle::SubjectLifecycle;
use engine::memory::MemoryStore;
use engine::model::SubjectId;
use engine::retention::{
    LoggingObserver, RetentionMetrics, RetentionOrchestrator, RetentionRunResult,
    RetentionSettings,
};
use engine::store::SettingsProvider;
use snapshot::LockedSnapshot;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sunset")]
#[command(about = "Sunset - time-based retention for user accounts and content")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, global = true, help = "Snapshot file (overrides store.snapshot_path)")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<SunsetCommands>,
}

#[derive(Subcommand)]
enum SunsetCommands {
    #[command(flatten)]
    Common(CommonCommands),

    /// Run retention once and exit
    Run {
        #[arg(long, help = "Log what would change without changing anything")]
        dry_run: bool,

        #[arg(long, help = "Print the run result as JSON")]
        json: bool,
    },

    /// Re-enable a disabled subject
    Reenable { id: u64 },

    /// Show the retention status of a subject
    Status { id: u64 },

    /// Remove all retention metadata and settings
    Purge,

    /// Show settings, or sanitize and save settings from a JSON file
    Settings {
        #[arg(long, help = "JSON file with the new settings")]
        file: Option<PathBuf>,
    },
}

impl Default for SunsetCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

/// Claim the snapshot's run lock, or fail when another process holds it.
async fn lock_snapshot(config: &Configuration) -> Result<LockedSnapshot> {
    let path = &config.store.snapshot_path;
    let stale_after =
        TimeDelta::from_std(config.retention.run_lock_timeout).unwrap_or(TimeDelta::MAX);

    snapshot::lock(path, Utc::now(), stale_after)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "Another sunset process holds the run lock on {}",
                path.display()
            )
        })
}

/// Write the store back when `outcome` succeeded, otherwise only release the lock.
async fn settle<T>(locked: LockedSnapshot, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            locked.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(release_err) = locked.release().await {
                tracing::warn!(error = ?release_err, "Failed to release snapshot run lock");
            }
            Err(e)
        }
    }
}

/// Lock the snapshot, run every pass, and write the snapshot back.
async fn run_once(config: &Configuration, metrics: RetentionMetrics) -> Result<RetentionRunResult> {
    let locked = lock_snapshot(config).await?;
    let store = locked.store().clone();

    let orchestrator = RetentionOrchestrator::new(
        store.clone(),
        store.clone(),
        store,
        config.retention.clone(),
    )
    .with_observer(Arc::new(LoggingObserver))
    .with_metrics(metrics);

    let outcome = orchestrator.run().await.context("Retention run failed");

    match outcome {
        Ok(result) if result.dry_run => {
            locked.release().await?;
            Ok(result)
        }
        outcome => settle(locked, outcome).await,
    }
}

fn print_summary(result: &RetentionRunResult) {
    println!(
        "Retention run {}{}",
        result.run_id,
        if result.dry_run { " (dry run)" } else { "" }
    );
    for pass in &result.passes {
        match &pass.error {
            None => println!(
                "  {:<14} applied={} pages={} protected_skipped={} skipped={}",
                pass.action,
                pass.tally.applied,
                pass.tally.pages_fetched,
                pass.tally.protected_skipped,
                pass.tally.records_skipped,
            ),
            Some(error) => println!(
                "  {:<14} FAILED after applied={}: {}",
                pass.action, pass.tally.applied, error
            ),
        }
    }
}

async fn run_scheduler(config: Configuration) -> Result<()> {
    if !config.retention.enabled {
        tracing::info!("Retention is disabled in configuration (retention.enabled = false)");
        return Ok(());
    }

    let interval = config.retention.interval;
    let metrics = RetentionMetrics::new();

    tracing::info!(
        interval = ?interval,
        snapshot = %config.store.snapshot_path.display(),
        dry_run = config.retention.dry_run,
        "Starting retention scheduler"
    );

    let scheduler_task = {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tracing::debug!("Running scheduled retention");

                match run_once(&config, metrics.clone()).await {
                    Ok(result) => {
                        if !result.is_clean() {
                            tracing::warn!(
                                run_id = %result.run_id,
                                failed_passes = result.failed_passes().count(),
                                "Scheduled retention completed with failures"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = ?e, "Scheduled retention failed"),
                }
            }
        })
    };

    wait_for_shutdown_signal().await?;

    scheduler_task.abort();
    tracing::info!(
        disabled = metrics.subjects_disabled(),
        deleted = metrics.subjects_deleted(),
        archived = metrics.content_archived(),
        passes_failed = metrics.passes_failed(),
        "Retention scheduler stopped"
    );
    Ok(())
}

fn lifecycle_for(store: &Arc<MemoryStore>) -> SubjectLifecycle {
    SubjectLifecycle::new(store.clone(), store.clone(), store.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let mut config = utils::load_config(cli.common.config.as_ref())?;
    if let Some(path) = cli.snapshot {
        config.store.snapshot_path = path;
    }

    let command = cli.command.unwrap_or_default();

    match command {
        SunsetCommands::Common(common_cmd) => {
            if utils::handle_common_command(&common_cmd, &config).await? {
                return Ok(());
            }
            utils::validate_config(&config)?;
            run_scheduler(config).await
        }
        SunsetCommands::Run { dry_run, json } => {
            utils::validate_config(&config)?;
            config.retention.dry_run |= dry_run;

            let result = run_once(&config, RetentionMetrics::new()).await?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result)
                        .context("Failed to serialize run result")?
                );
            } else {
                print_summary(&result);
            }
            Ok(())
        }
        SunsetCommands::Reenable { id } => {
            let locked = lock_snapshot(&config).await?;
            let outcome = lifecycle_for(locked.store())
                .reenable(SubjectId(id))
                .await
                .with_context(|| format!("Failed to re-enable subject {id}"));
            settle(locked, outcome).await?;
            println!("Subject {id} re-enabled");
            Ok(())
        }
        SunsetCommands::Status { id } => {
            let store = Arc::new(MemoryStore::from_snapshot(
                snapshot::load(&config.store.snapshot_path).await?,
            ));
            match lifecycle_for(&store).status(SubjectId(id)).await? {
                Some(status) => {
                    let last_active = status
                        .last_active_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    println!("Subject {id}: {} (last active: {last_active})", status.status);
                }
                None => println!("Subject {id} not found"),
            }
            Ok(())
        }
        SunsetCommands::Purge => {
            let locked = lock_snapshot(&config).await?;
            let outcome = lifecycle_for(locked.store())
                .purge_all()
                .await
                .context("Failed to purge retention metadata");
            let report = settle(locked, outcome).await?;
            println!(
                "Purged retention metadata from {} subjects and {} content items",
                report.subjects_cleared, report.content_cleared
            );
            Ok(())
        }
        SunsetCommands::Settings { file } => {
            let Some(file) = file else {
                let store =
                    MemoryStore::from_snapshot(snapshot::load(&config.store.snapshot_path).await?);
                let settings = store.retention_settings().await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&settings)
                        .context("Failed to serialize settings")?
                );
                return Ok(());
            };

            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let input: RetentionSettings = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse settings in {}", file.display()))?;

            let locked = lock_snapshot(&config).await?;
            let outcome = lifecycle_for(locked.store())
                .save_settings(input)
                .await
                .context("Failed to save settings");
            let sanitized = settle(locked, outcome).await?;

            for warning in &sanitized.warnings {
                println!("warning: {warning}");
            }
            println!("Settings saved");
            Ok(())
        }
    }
}
