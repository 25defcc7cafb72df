// Scheduler binary entry point: the watcher daemon

use anyhow::{Context, Result};
use clap::Parser;
use common::bootstrap;
use common::config::Settings;
use common::schedule::parse_timezone;
use common::scheduler::{Scheduler, SchedulerConfig, SchedulerEngine};
use common::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "scheduler", about = "Watches repositories, tags and images and runs their actions")]
struct Args {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Run every entity once, wait for the cycles, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let _log_guard = telemetry::init_logging(&settings.observability)?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        database_url = %settings.database.url,
        watch_list = %settings.watcher.watch_list_path,
        "Starting gitwatch scheduler"
    );

    let db_pool = bootstrap::init_database_pool(&settings.database).await?;
    let store = bootstrap::init_state_store(db_pool.clone());
    let entities = bootstrap::load_watch_list(&PathBuf::from(&settings.watcher.watch_list_path))?;
    let runner = Arc::new(bootstrap::build_cycle_runner(&settings, store)?);

    if settings.watcher.seed_tag_baselines {
        for entity in &entities {
            match runner.seed_tag_baseline(entity).await {
                Ok(Some(tag)) => info!(entity = %entity.key(), tag = %tag, "Tag baseline seeded"),
                Ok(None) => {}
                Err(e) => warn!(entity = %entity.key(), error = %e, "Failed to seed tag baseline"),
            }
        }
    }

    let timezone = parse_timezone(&settings.watcher.timezone)
        .map_err(|e| anyhow::anyhow!("Invalid watcher timezone: {}", e))?;
    let scheduler_config = SchedulerConfig {
        timezone,
        shutdown_grace: Duration::from_secs(settings.watcher.shutdown_grace_seconds),
    };
    let scheduler = Arc::new(SchedulerEngine::new(scheduler_config, entities, runner));
    info!(
        scheduled = scheduler.scheduled_count(),
        rejected = scheduler.rejected().len(),
        "Scheduler engine created"
    );

    if args.once || settings.watcher.run_on_start {
        let dispatched = scheduler.run_all_once().await;
        info!(dispatched, "Initial pass finished");
        if args.once {
            db_pool.close().await;
            return Ok(());
        }
    }

    let scheduler_for_shutdown = scheduler.clone();
    let shutdown = tokio::spawn(async move {
        shutdown_signal().await;
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    scheduler
        .start()
        .await
        .context("Scheduler engine failed")?;

    // The pool stays open until stop() has finished draining cycles
    if scheduler.is_stopping() {
        if let Err(e) = shutdown.await {
            error!(error = %e, "Shutdown task failed");
        }
    } else {
        shutdown.abort();
    }

    db_pool.close().await;
    info!("Scheduler stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C signal, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM signal, initiating graceful shutdown"),
    }
}
