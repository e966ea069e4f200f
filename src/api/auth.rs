//! Authentication API endpoints
//!
//! Handles HTTP requests for user authentication:
//! - POST /api/v1/auth/register - Self-registration
//! - POST /api/v1/auth/login - JSON login
//! - POST /api/v1/auth/token - Form login (OAuth2 password style)
//! - GET /api/v1/auth/me - Current user
//! - POST /api/v1/auth/refresh - Swap the token for a new one
//! - POST /api/v1/auth/logout - Revoke the token

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Form, Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{
    client_ip, ApiError, AppState, AuthenticatedUser, PresentedToken, TOKEN_COOKIE,
};
use crate::models::UserRole;
use crate::services::user::{LoginInput, LoginOutcome, RegisterInput, UserServiceError};

/// Request body for self-registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
}

/// Credentials for both login flavours; the username may be an email
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login_json))
        .route("/token", post(login_form))
}

/// POST /api/v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = RegisterInput {
        username: body.username,
        email: body.email,
        password: body.password,
        first_name: body.first_name,
        last_name: body.last_name,
        role: body.role,
    };

    let user = state.user_service.register(input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/v1/auth/login
async fn login_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = login(&state, &headers, body).await?;
    Ok(with_token_cookie(outcome))
}

/// POST /api/v1/auth/token
async fn login_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = login(&state, &headers, body).await?;
    Ok(with_token_cookie(outcome))
}

/// GET /api/v1/auth/me
async fn me(Extension(user): Extension<AuthenticatedUser>) -> impl IntoResponse {
    Json(user.0)
}

/// POST /api/v1/auth/refresh
async fn refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Extension(token): Extension<PresentedToken>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.user_service.refresh(&token.0, user.0).await?;
    Ok(with_token_cookie(outcome))
}

/// POST /api/v1/auth/logout
async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Extension(token): Extension<PresentedToken>,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&token.0).await?;
    tracing::info!(user_id = user.0.id, "User logged out");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("access_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    Ok((StatusCode::NO_CONTENT, headers))
}

/// Shared login path with per-IP and per-username throttling
async fn login(
    state: &AppState,
    headers: &HeaderMap,
    body: LoginRequest,
) -> Result<LoginOutcome, ApiError> {
    if let Some(ip) = client_ip(headers) {
        if state.rate_limiter.is_ip_limited(ip).await {
            tracing::warn!(%ip, "Login rate limit exceeded for address");
            return Err(ApiError::rate_limited(
                "Too many requests. Please try again later.",
                60,
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    if state.rate_limiter.is_username_limited(&body.username).await {
        tracing::warn!(username = %body.username, "Login rate limit exceeded for username");
        return Err(ApiError::rate_limited(
            "Too many failed login attempts. Please try again in 15 minutes.",
            900,
        ));
    }

    let input = LoginInput::new(body.username.clone(), body.password);
    match state.user_service.login(input).await {
        Ok(outcome) => {
            state.rate_limiter.clear_username_attempts(&body.username).await;
            tracing::info!(user_id = outcome.user.id, "User logged in");
            Ok(outcome)
        }
        Err(e) => {
            if matches!(e, UserServiceError::AuthenticationError(_)) {
                state.rate_limiter.record_failed_attempt(&body.username).await;
            }
            Err(e.into())
        }
    }
}

/// Return the token in the body and mirror it into an HttpOnly cookie
fn with_token_cookie(outcome: LoginOutcome) -> impl IntoResponse {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, outcome.access_token, outcome.expires_in
    );

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    (headers, Json(outcome))
}
