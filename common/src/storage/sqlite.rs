// SQLite-backed state store

use super::StateStore;
use crate::db::repositories::{ExecutionRepository, StateRepository};
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{EntityKey, ExecutionDetail, ExecutionRecord, StateDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

pub struct SqliteStateStore {
    pool: DbPool,
    states: StateRepository,
    executions: ExecutionRepository,
}

impl SqliteStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            states: StateRepository::new(pool.clone()),
            executions: ExecutionRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<String>, DatabaseError> {
        let state = self.states.find_by_key(&key.to_string()).await?;
        Ok(state.map(|s| s.last_value))
    }

    async fn put(
        &self,
        key: &EntityKey,
        value: &str,
        descriptor: &StateDescriptor,
    ) -> Result<(), DatabaseError> {
        self.states
            .upsert(&key.to_string(), value, descriptor, Utc::now())
            .await
    }

    async fn append_execution_record(
        &self,
        key: &EntityKey,
        value: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.executions
            .append(&key.to_string(), value, executed_at)
            .await
    }

    async fn list_execution_records(&self) -> Result<Vec<ExecutionRecord>, DatabaseError> {
        self.executions.list().await
    }

    async fn list_execution_details(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<ExecutionDetail>, DatabaseError> {
        self.executions.list_details(limit).await
    }

    /// State and record are written in one transaction so a crash never
    /// leaves an advanced value without its audit row.
    #[instrument(skip(self, descriptor), fields(entity = %key))]
    async fn record_success(
        &self,
        key: &EntityKey,
        value: &str,
        descriptor: &StateDescriptor,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let entity_key = key.to_string();
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        StateRepository::upsert_in(&mut tx, &entity_key, value, descriptor, executed_at).await?;
        ExecutionRepository::append_in(&mut tx, &entity_key, value, executed_at).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(value = %value, "Observed value persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::models::EntityKind;

    async fn store() -> SqliteStateStore {
        let pool = DbPool::in_memory().await.unwrap();
        schema::bootstrap(&pool).await.unwrap();
        SqliteStateStore::new(pool)
    }

    fn image_key() -> EntityKey {
        EntityKey::ImageFlow {
            flow: "edge".to_string(),
        }
    }

    fn descriptor() -> StateDescriptor {
        StateDescriptor {
            kind: EntityKind::ImageFlow,
            name: "edge".to_string(),
            url: "registry.example.com/api:latest".to_string(),
            branch: None,
            cron: "*/10 * * * *".to_string(),
        }
    }

    #[tokio::test]
    async fn test_get_unknown_entity_is_none() {
        let store = store().await;
        assert_eq!(store.get(&image_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_without_record_leaves_audit_empty() {
        let store = store().await;
        store.put(&image_key(), "sha256:AAA", &descriptor()).await.unwrap();

        assert_eq!(store.get(&image_key()).await.unwrap().as_deref(), Some("sha256:AAA"));
        assert!(store.list_execution_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_success_writes_value_and_one_record() {
        let store = store().await;
        store
            .record_success(&image_key(), "sha256:BBB", &descriptor(), Utc::now())
            .await
            .unwrap();

        assert_eq!(store.get(&image_key()).await.unwrap().as_deref(), Some("sha256:BBB"));
        let records = store.list_execution_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].observed_value, "sha256:BBB");
        assert_eq!(records[0].entity_key, "image-flow:edge");

        let details = store.list_execution_details(None).await.unwrap();
        assert_eq!(details[0].entity_url, "registry.example.com/api:latest");
    }
}
