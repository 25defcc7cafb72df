// Schema bootstrap for the state database

use crate::db::DbPool;
use crate::errors::DatabaseError;
use tracing::{info, instrument};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS watched_entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_key TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        branch TEXT,
        cron TEXT NOT NULL,
        last_value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL REFERENCES watched_entities(id),
        observed_value TEXT NOT NULL,
        executed_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_executions_executed_at ON executions (executed_at DESC)",
];

/// Create the tables if they do not exist yet. Safe to run on every start.
#[instrument(skip(pool))]
pub async fn bootstrap(pool: &DbPool) -> Result<(), DatabaseError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool.pool())
            .await
            .map_err(|e| DatabaseError::BootstrapFailed(e.to_string()))?;
    }

    info!("Database schema ready");
    Ok(())
}
