//! API layer - HTTP handlers and routing
//!
//! Everything except the health checks lives under `/api/v1`:
//! - Auth and user administration
//! - Courses and enrollments
//! - Sessions, bubbles and student progress
//! - Analytics and progress tracking
//! - AI tutor

pub mod ai_tutor;
pub mod analytics;
pub mod auth;
pub mod common;
pub mod courses;
pub mod health;
pub mod middleware;
pub mod progress;
pub mod responses;
pub mod sessions;
pub mod users;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the versioned API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes (need a valid token)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/users", users::router())
        .nest("/courses", courses::router())
        .nest("/sessions", sessions::router())
        .nest("/analytics", analytics::router())
        .nest("/progress", progress::router())
        .nest("/ai-tutor", ai_tutor::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/sessions", sessions::public_router())
        .nest("/ai-tutor", ai_tutor::public_router())
        .nest("/progress", progress::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    // Cookie auth needs credentials, so origins are listed explicitly
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    Router::new()
        .merge(health::router())
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router fixtures shared by the endpoint tests

    use super::*;
    use crate::config::Config;
    use crate::db::repositories::test_support::setup_pool;
    use crate::models::{CreateUserInput, User, UserRole};
    use crate::services::{AiService, LoginInput};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub async fn test_app() -> (Router, AppState) {
        test_app_with_ai(Arc::new(AiService::disabled("gpt-test"))).await
    }

    pub async fn test_app_with_ai(ai: Arc<AiService>) -> (Router, AppState) {
        let pool = setup_pool().await;
        let config = Config::default();
        let state = AppState::new(pool, &config, ai);
        let router = build_router(state.clone(), &config.server);
        (router, state)
    }

    async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }

    pub async fn send_form(router: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        read_json(response).await
    }

    /// Create a verified user and log them in
    pub async fn login_as(state: &AppState, name: &str, role: UserRole) -> (User, String) {
        let user = state
            .user_service
            .create_user(CreateUserInput {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password: "secret123".to_string(),
                first_name: None,
                last_name: None,
                role: Some(role),
            })
            .await
            .unwrap();
        let outcome = state
            .user_service
            .login(LoginInput::new(name.to_string(), "secret123".to_string()))
            .await
            .unwrap();
        (user, outcome.access_token)
    }
}
