use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Liveness endpoint; no authentication. Reports 503 while the state
/// database is unreachable.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, ErrorResponse> {
    state.db_pool.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Health check failed");
        ErrorResponse::new("database_unavailable", "State database is unreachable")
    })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    ))
}
