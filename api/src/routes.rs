use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Create the application router: `/health` is public, everything else
/// requires the API bearer token
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(handlers::health::health_check));

    let protected_routes = Router::new()
        .route("/status", get(handlers::status::status))
        .route(
            "/api/executions",
            get(handlers::executions::list_executions),
        )
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use common::auth::SecretToken;
    use common::db::{schema, DbPool};
    use common::models::{EntityKey, EntityKind, StateDescriptor};
    use common::storage::{SqliteStateStore, StateStore};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "0123456789abcdef";

    async fn test_state() -> AppState {
        let pool = DbPool::in_memory().await.unwrap();
        schema::bootstrap(&pool).await.unwrap();
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(pool.clone()));
        AppState::new(pool, store, SecretToken::new(TOKEN))
    }

    async fn seed_executions(state: &AppState) {
        let key = EntityKey::Repository {
            url: "https://github.com/acme/api".to_string(),
        };
        let descriptor = StateDescriptor {
            kind: EntityKind::Repository,
            name: "api".to_string(),
            url: "https://github.com/acme/api".to_string(),
            branch: Some("main".to_string()),
            cron: "*/5 * * * *".to_string(),
        };
        for (value, minute) in [("aaa111", 0), ("bbb222", 5), ("ccc333", 10)] {
            let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap();
            state
                .store
                .record_success(&key, value, &descriptor, at)
                .await
                .unwrap();
        }
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = create_router(test_state().await);
        let response = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_database() {
        let state = test_state().await;
        state.db_pool.close().await;
        let app = create_router(state);

        let response = app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "database_unavailable");
    }

    #[tokio::test]
    async fn test_status_requires_token() {
        let app = create_router(test_state().await);

        let response = app.clone().oneshot(get("/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unauthorized");
        assert!(body["trace_id"].as_str().is_some());

        let response = app
            .clone()
            .oneshot(get("/status", Some("wrong-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(get("/status", Some(TOKEN))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Ready!");
    }

    #[tokio::test]
    async fn test_executions_newest_first_with_limit() {
        let state = test_state().await;
        seed_executions(&state).await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(get("/api/executions", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["observed_value"], "ccc333");
        assert_eq!(rows[0]["entity_name"], "api");
        assert_eq!(rows[0]["entity_url"], "https://github.com/acme/api");

        let response = app
            .oneshot(get("/api/executions?limit=2", Some(TOKEN)))
            .await
            .unwrap();
        let body = body_json(response).await;
        let values: Vec<_> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["observed_value"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["ccc333", "bbb222"]);
    }

    #[tokio::test]
    async fn test_executions_rejects_zero_limit() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(get("/api/executions?limit=0", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_executions_rejects_non_numeric_limit() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(get("/api/executions?limit=abc", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_error");
        assert!(!body["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_executions_empty_history() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(get("/api/executions", Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], serde_json::json!([]));
    }
}
