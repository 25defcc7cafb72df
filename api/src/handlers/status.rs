use axum::{http::StatusCode, response::IntoResponse};

/// Readiness probe for authenticated operators
#[tracing::instrument]
pub async fn status() -> impl IntoResponse {
    (StatusCode::OK, "Ready!")
}
