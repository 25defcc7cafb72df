// Persisted state repository: last-observed value per watched entity

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{PersistedState, StateDescriptor};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

const UPSERT_STATE: &str = r#"
    INSERT INTO watched_entities (entity_key, kind, name, url, branch, cron, last_value, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (entity_key) DO UPDATE SET
        kind = excluded.kind,
        name = excluded.name,
        url = excluded.url,
        branch = excluded.branch,
        cron = excluded.cron,
        last_value = excluded.last_value,
        updated_at = excluded.updated_at
"#;

/// Repository for the `watched_entities` table
pub struct StateRepository {
    pool: DbPool,
}

impl StateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find the persisted state for an entity key
    #[instrument(skip(self))]
    pub async fn find_by_key(&self, entity_key: &str) -> Result<Option<PersistedState>, DatabaseError> {
        let state = sqlx::query_as::<_, PersistedState>(
            r#"
            SELECT id, entity_key, kind, name, url, branch, cron, last_value, updated_at
            FROM watched_entities
            WHERE entity_key = ?
            "#,
        )
        .bind(entity_key)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(state)
    }

    /// Insert or replace the last-observed value for an entity
    #[instrument(skip(self, descriptor))]
    pub async fn upsert(
        &self,
        entity_key: &str,
        value: &str,
        descriptor: &StateDescriptor,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(UPSERT_STATE)
            .bind(entity_key)
            .bind(descriptor.kind.as_str())
            .bind(&descriptor.name)
            .bind(&descriptor.url)
            .bind(&descriptor.branch)
            .bind(&descriptor.cron)
            .bind(value)
            .bind(updated_at)
            .execute(self.pool.pool())
            .await?;

        tracing::debug!(entity = %entity_key, value = %value, "State persisted");
        Ok(())
    }

    /// Same as [`upsert`](Self::upsert) inside an open transaction
    pub async fn upsert_in(
        tx: &mut Transaction<'_, Sqlite>,
        entity_key: &str,
        value: &str,
        descriptor: &StateDescriptor,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(UPSERT_STATE)
            .bind(entity_key)
            .bind(descriptor.kind.as_str())
            .bind(&descriptor.name)
            .bind(&descriptor.url)
            .bind(&descriptor.branch)
            .bind(&descriptor.cron)
            .bind(value)
            .bind(updated_at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
