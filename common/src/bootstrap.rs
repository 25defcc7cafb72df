// Bootstrap utilities for binary initialization
// Shared by the scheduler and API server main.rs files

use crate::auth::SecretToken;
use crate::config::{DatabaseConfig, Settings};
use crate::cycle::CycleRunner;
use crate::db::{schema, DbPool};
use crate::models::WatchedEntity;
use crate::pipeline::{ActionPipeline, GitCli, ScriptRunner};
use crate::probe::{DockerCli, GitHubClient, ImageDigestProbe};
use crate::storage::{SqliteStateStore, StateStore};
use crate::watchlist::WatchList;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Open the database and make sure the schema exists
///
/// # Errors
/// Returns error if the pool cannot be created or the schema cannot be applied
#[tracing::instrument(skip(config))]
pub async fn init_database_pool(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(config)
        .await
        .context("Failed to initialize database pool")?;

    schema::bootstrap(&db_pool)
        .await
        .context("Failed to bootstrap database schema")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Wrap the pool in the state store used by cycles and the API
pub fn init_state_store(db_pool: DbPool) -> Arc<dyn StateStore> {
    Arc::new(SqliteStateStore::new(db_pool))
}

/// Read the watch list and turn it into schedulable entities.
/// Entries that fail validation are logged and dropped.
///
/// # Errors
/// Returns error if the file cannot be read or is not valid YAML
#[tracing::instrument]
pub fn load_watch_list(path: &Path) -> Result<Vec<WatchedEntity>> {
    let watch_list = WatchList::load(path)
        .with_context(|| format!("Failed to load watch list {}", path.display()))?;

    let entities = watch_list.into_entities();
    if entities.is_empty() {
        warn!(path = %path.display(), "Watch list contains no valid entries");
    }

    info!(entities = entities.len(), "Watch list loaded");
    Ok(entities)
}

/// Wire probes, the action pipeline and the store into a cycle runner
///
/// # Errors
/// Returns error if the GitHub HTTP client cannot be built
pub fn build_cycle_runner(settings: &Settings, store: Arc<dyn StateStore>) -> Result<CycleRunner> {
    let watcher = &settings.watcher;

    let github =
        GitHubClient::new(&settings.github).context("Failed to build GitHub API client")?;

    let docker = DockerCli::new(
        watcher.docker_binary.clone(),
        Duration::from_secs(watcher.docker_timeout_seconds),
    );
    let images = ImageDigestProbe::new(Arc::new(docker));

    let git = GitCli::new(
        watcher.git_binary.clone(),
        Duration::from_secs(watcher.clone_timeout_seconds),
    );
    let scripts = ScriptRunner::new(Duration::from_secs(watcher.script_timeout_seconds));
    let credential = settings
        .github
        .token
        .as_deref()
        .map(SecretToken::new)
        .filter(|token| !token.is_empty());
    let pipeline = ActionPipeline::new(Arc::new(git), scripts, credential);

    Ok(CycleRunner::new(store, github, images, pipeline))
}
