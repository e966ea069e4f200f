//! Liveness endpoints
//!
//! - GET / - Welcome banner
//! - GET /health - Database connectivity check

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::api::middleware::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": format!("Welcome to {}", state.app.name),
        "version": state.app.version,
        "status": "running",
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.pool.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "version": state.app.version,
            })),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                    "version": state.app.version,
                })),
            )
        }
    }
}
