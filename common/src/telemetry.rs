// Telemetry module for structured logging and metrics

use crate::config::ObservabilityConfig;
use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "gitwatch.log";

/// Initialize structured logging
///
/// Sets up the tracing subscriber with:
/// - an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level
/// - a stdout layer, JSON or human readable
/// - a daily-rolling file layer when `log_directory` is set
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &ObservabilityConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let stdout_layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let mut guard = None;
    let file_layer = match &config.log_directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory))?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_NAME);
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        log_level = %config.log_level,
        json = config.json,
        log_directory = config.log_directory.as_deref(),
        "Structured logging initialized"
    );

    Ok(guard)
}

/// Initialize Prometheus metrics exporter
///
/// Registers:
/// - watch_cycle_total: counter of finished cycles by kind and outcome
/// - watch_cycle_duration_seconds: histogram of cycle duration by kind
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "watch_cycle_total",
        "Total number of watch cycles by entity kind and outcome"
    );
    describe_histogram!(
        "watch_cycle_duration_seconds",
        "Duration of watch cycles in seconds"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");

    Ok(())
}

/// Record a finished (or skipped) cycle
#[inline]
pub fn record_cycle(kind: &str, outcome: &str) {
    counter!(
        "watch_cycle_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record cycle duration
#[inline]
pub fn record_cycle_duration(kind: &str, duration_seconds: f64) {
    histogram!("watch_cycle_duration_seconds", "kind" => kind.to_string()).record(duration_seconds);
}
