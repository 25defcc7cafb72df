use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use common::auth::bearer_token;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

/// Authentication middleware that checks the static API bearer token
#[tracing::instrument(skip(state, req, next))]
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token);

    let Some(presented) = presented else {
        tracing::warn!("Missing or malformed authorization header");
        return Err(ErrorResponse::new(
            "unauthorized",
            "Expected 'Authorization: Bearer <token>'",
        ));
    };

    if !state.api_token.matches(presented) {
        tracing::warn!("Rejected request with invalid API token");
        return Err(ErrorResponse::new("unauthorized", "Invalid API token"));
    }

    Ok(next.run(req).await)
}
