// Execution repository implementation: append-only audit of successful cycles

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{ExecutionDetail, ExecutionRecord};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

const APPEND_EXECUTION: &str = r#"
    INSERT INTO executions (entity_id, observed_value, executed_at)
    SELECT id, ?, ? FROM watched_entities WHERE entity_key = ?
"#;

/// Repository for the `executions` table
pub struct ExecutionRepository {
    pool: DbPool,
}

impl ExecutionRepository {
    /// Create a new ExecutionRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an execution record for an entity that already has persisted state
    ///
    /// # Errors
    /// `DatabaseError::NotFound` when no state row exists for `entity_key`
    #[instrument(skip(self))]
    pub async fn append(
        &self,
        entity_key: &str,
        observed_value: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(APPEND_EXECUTION)
            .bind(observed_value)
            .bind(executed_at)
            .bind(entity_key)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "No persisted state for {}",
                entity_key
            )));
        }

        tracing::info!(entity = %entity_key, value = %observed_value, "Execution recorded");
        Ok(())
    }

    /// Same as [`append`](Self::append) inside an open transaction
    pub async fn append_in(
        tx: &mut Transaction<'_, Sqlite>,
        entity_key: &str,
        observed_value: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(APPEND_EXECUTION)
            .bind(observed_value)
            .bind(executed_at)
            .bind(entity_key)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "No persisted state for {}",
                entity_key
            )));
        }
        Ok(())
    }

    /// All execution records, newest first
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<ExecutionRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            SELECT e.id, w.entity_key, e.observed_value, e.executed_at
            FROM executions e
            JOIN watched_entities w ON w.id = e.entity_id
            ORDER BY e.executed_at DESC, e.id DESC
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(records)
    }

    /// Execution records joined with their entity's display fields, newest first
    #[instrument(skip(self))]
    pub async fn list_details(&self, limit: Option<u32>) -> Result<Vec<ExecutionDetail>, DatabaseError> {
        let limit = limit.map(i64::from).unwrap_or(-1);

        let details = sqlx::query_as::<_, ExecutionDetail>(
            r#"
            SELECT w.name AS entity_name,
                   w.url AS entity_url,
                   w.kind AS entity_kind,
                   e.observed_value,
                   e.executed_at
            FROM executions e
            JOIN watched_entities w ON w.id = e.entity_id
            ORDER BY e.executed_at DESC, e.id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await?;

        Ok(details)
    }
}
