// API server entry point: read-only view over watcher state

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

mod handlers;
mod middleware;
mod routes;
mod state;

use common::auth::SecretToken;
use common::bootstrap;
use common::config::Settings;
use common::telemetry;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "api", about = "HTTP API over gitwatch execution history")]
struct Args {
    /// Directory holding default.toml / local.toml
    #[arg(long, default_value = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Settings::load_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let _log_guard = telemetry::init_logging(&config.observability)?;

    let api_token = config
        .server
        .api_token
        .as_deref()
        .map(SecretToken::new)
        .filter(|token| !token.is_empty())
        .context("server.api_token is not set; generate one with `gwctl token generate`")?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Configuration loaded"
    );

    let db_pool = bootstrap::init_database_pool(&config.database).await?;
    let store = bootstrap::init_state_store(db_pool.clone());

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid server host")?,
        config.server.port,
    ));

    let state = AppState::new(db_pool.clone(), store, api_token);
    let app = routes::create_router(state);

    tracing::info!(addr = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
