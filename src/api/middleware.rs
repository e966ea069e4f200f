//! API middleware
//!
//! Contains:
//! - the shared application state
//! - the JSON error envelope and its mapping from service errors
//! - token authentication

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::{AppConfig, Config};
use crate::db::repositories::{
    SqlxAuthTokenRepository, SqlxBubbleNodeRepository, SqlxCoinTransactionRepository,
    SqlxCourseRepository, SqlxEnrollmentRepository, SqlxEventLogRepository,
    SqlxSessionRepository, SqlxStudentStateRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    AiService, AnalyticsError, AnalyticsService, CourseService, CourseServiceError,
    LoginRateLimiter, ProgressError, ProgressService, ProgressTrackingError,
    ProgressTrackingService, SessionService, SessionServiceError,
    TokenService, TutorError, TutorService, UserService, UserServiceError,
};

/// Cookie consulted when no bearer header is present
pub const TOKEN_COOKIE: &str = "access_token";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub app: Arc<AppConfig>,
    pub user_service: Arc<UserService>,
    pub course_service: Arc<CourseService>,
    pub session_service: Arc<SessionService>,
    pub progress_service: Arc<ProgressService>,
    pub analytics_service: Arc<AnalyticsService>,
    pub tutor_service: Arc<TutorService>,
    pub progress_tracking_service: Arc<ProgressTrackingService>,
    pub rate_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    /// Wire every service against one pool
    pub fn new(pool: DynDatabasePool, config: &Config, ai: Arc<AiService>) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let course_repo = SqlxCourseRepository::boxed(pool.clone());
        let enrollment_repo = SqlxEnrollmentRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());
        let bubble_repo = SqlxBubbleNodeRepository::boxed(pool.clone());
        let state_repo = SqlxStudentStateRepository::boxed(pool.clone());
        let event_repo = SqlxEventLogRepository::boxed(pool.clone());
        let coin_repo = SqlxCoinTransactionRepository::boxed(pool.clone());

        let tokens = TokenService::new(
            SqlxAuthTokenRepository::boxed(pool.clone()),
            config.auth.secret_key.clone(),
            config.auth.access_token_expire_minutes,
        );

        Self {
            app: Arc::new(config.app.clone()),
            user_service: Arc::new(UserService::new(user_repo.clone(), tokens)),
            course_service: Arc::new(CourseService::new(
                course_repo.clone(),
                enrollment_repo,
                session_repo.clone(),
                user_repo.clone(),
            )),
            session_service: Arc::new(SessionService::new(
                session_repo.clone(),
                course_repo.clone(),
                bubble_repo.clone(),
                state_repo.clone(),
            )),
            progress_service: Arc::new(ProgressService::new(
                session_repo.clone(),
                bubble_repo,
                state_repo.clone(),
                event_repo.clone(),
                coin_repo.clone(),
            )),
            analytics_service: Arc::new(AnalyticsService::new(
                session_repo.clone(),
                course_repo,
                state_repo.clone(),
                event_repo.clone(),
                coin_repo.clone(),
            )),
            tutor_service: Arc::new(TutorService::new(
                ai,
                event_repo.clone(),
                coin_repo.clone(),
                state_repo.clone(),
                session_repo,
            )),
            progress_tracking_service: Arc::new(ProgressTrackingService::new(
                user_repo,
                state_repo,
                event_repo,
                coin_repo,
            )),
            rate_limiter: Arc::new(LoginRateLimiter::new()),
            pool,
        }
    }
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Raw token the request authenticated with, kept for refresh and logout
#[derive(Debug, Clone)]
pub struct PresentedToken(pub String);

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::with_details(
            "RATE_LIMITED",
            message,
            serde_json::json!({ "retry_after": retry_after_secs }),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Log the full chain and hide it from the client
    fn internal(e: &anyhow::Error) -> Self {
        tracing::error!("Internal error: {:#}", e);
        Self::internal_error("Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => Self::unauthorized(msg),
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            UserServiceError::Conflict(msg) => Self::conflict(msg),
            UserServiceError::Forbidden(msg) => Self::forbidden(msg),
            UserServiceError::InactiveUser => Self::validation_error("Inactive user"),
            UserServiceError::NotFound => Self::not_found("User not found"),
            UserServiceError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<CourseServiceError> for ApiError {
    fn from(e: CourseServiceError) -> Self {
        match e {
            CourseServiceError::NotFound => Self::not_found("Course not found"),
            CourseServiceError::Forbidden(msg) => Self::forbidden(msg),
            CourseServiceError::ValidationError(msg) => Self::validation_error(msg),
            CourseServiceError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(e: SessionServiceError) -> Self {
        match e {
            SessionServiceError::NotFound(msg) => Self::not_found(msg),
            SessionServiceError::Forbidden(msg) => Self::forbidden(msg),
            SessionServiceError::ValidationError(msg) => Self::validation_error(msg),
            SessionServiceError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::NotFound(msg) => Self::not_found(msg),
            ProgressError::Forbidden(msg) => Self::forbidden(msg),
            ProgressError::ValidationError(msg) => Self::validation_error(msg),
            ProgressError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<ProgressTrackingError> for ApiError {
    fn from(e: ProgressTrackingError) -> Self {
        match e {
            ProgressTrackingError::NotFound(msg) => Self::not_found(msg),
            ProgressTrackingError::Forbidden(msg) => Self::forbidden(msg),
            ProgressTrackingError::ValidationError(msg) => Self::validation_error(msg),
            ProgressTrackingError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(e: AnalyticsError) -> Self {
        match e {
            AnalyticsError::NotFound(msg) => Self::not_found(msg),
            AnalyticsError::Forbidden(msg) => Self::forbidden(msg),
            AnalyticsError::ValidationError(msg) => Self::validation_error(msg),
            AnalyticsError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<TutorError> for ApiError {
    fn from(e: TutorError) -> Self {
        match e {
            TutorError::ValidationError(msg) => Self::validation_error(msg),
            TutorError::InternalError(e) => Self::internal(&e),
        }
    }
}

/// Extract the access token: bearer header first, then the cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie
                    .strip_prefix(TOKEN_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

/// Client address as reported by a fronting proxy
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next());
    let real_ip = headers.get("x-real-ip").and_then(|h| h.to_str().ok());

    forwarded
        .or(real_ip)
        .and_then(|ip| ip.trim().parse().ok())
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    let user = state
        .user_service
        .validate_token(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    request.extensions_mut().insert(PresentedToken(token));
    Ok(next.run(request).await)
}
