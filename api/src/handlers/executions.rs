use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::ExecutionDetail;

/// Upper bound on rows returned by one request
pub const MAX_LIMIT: u32 = 1000;

/// Query parameters for listing executions
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    /// Newest N records; everything when absent
    pub limit: Option<u32>,
}

/// List execution records joined with their entity, newest first
#[tracing::instrument(skip(state))]
pub async fn list_executions(
    State(state): State<AppState>,
    query: Result<Query<ListExecutionsQuery>, QueryRejection>,
) -> Result<SuccessResponse<Vec<ExecutionDetail>>, ErrorResponse> {
    let Query(query) =
        query.map_err(|rejection| ErrorResponse::new("validation_error", rejection.body_text()))?;

    let limit = match query.limit {
        Some(0) => {
            return Err(ErrorResponse::new(
                "validation_error",
                "limit must be greater than zero",
            ));
        }
        Some(limit) if limit > MAX_LIMIT => {
            return Err(ErrorResponse::new(
                "validation_error",
                format!("limit must not exceed {}", MAX_LIMIT),
            ));
        }
        other => other,
    };

    let executions = state.store.list_execution_details(limit).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to list executions");
        ErrorResponse::new("database_error", "Failed to retrieve executions")
    })?;

    tracing::info!(count = executions.len(), "Listed executions");
    Ok(SuccessResponse::new(executions))
}
