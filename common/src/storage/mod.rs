// State store: durable last-observed values and the execution audit trail

pub mod sqlite;

pub use sqlite::SqliteStateStore;

use crate::errors::DatabaseError;
use crate::models::{EntityKey, ExecutionDetail, ExecutionRecord, StateDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Key-value view over persisted entity state.
///
/// A missing value means the entity was never observed, which is not an error.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last-observed value for an entity
    async fn get(&self, key: &EntityKey) -> Result<Option<String>, DatabaseError>;

    /// Replace the last-observed value and its display fields
    async fn put(
        &self,
        key: &EntityKey,
        value: &str,
        descriptor: &StateDescriptor,
    ) -> Result<(), DatabaseError>;

    /// Append an audit row; the entity must already have persisted state
    async fn append_execution_record(
        &self,
        key: &EntityKey,
        value: &str,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// All audit rows, newest first
    async fn list_execution_records(&self) -> Result<Vec<ExecutionRecord>, DatabaseError>;

    /// Audit rows joined with entity name and URL, newest first
    async fn list_execution_details(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<ExecutionDetail>, DatabaseError>;

    /// Persist the value observed by a successful action cycle together with its record
    async fn record_success(
        &self,
        key: &EntityKey,
        value: &str,
        descriptor: &StateDescriptor,
        executed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.put(key, value, descriptor).await?;
        self.append_execution_record(key, value, executed_at).await
    }
}
