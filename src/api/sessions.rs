//! Session endpoints
//!
//! Authoring:
//! - GET/POST /api/v1/sessions
//! - GET/PUT/DELETE /api/v1/sessions/{id}
//! - POST /api/v1/sessions/validate-graph (public)
//! - POST /api/v1/sessions/analyze-graph
//! - POST /api/v1/sessions/{id}/validate
//! - GET/POST /api/v1/sessions/{id}/bubbles, GET /api/v1/sessions/{id}/bubbles/{node_id}
//!
//! Student progress:
//! - POST /api/v1/sessions/{id}/start
//! - POST /api/v1/sessions/{id}/advance
//! - GET /api/v1/sessions/{id}/state

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{MessageResponse, PaginatedResponse};
use crate::models::{
    BubbleContentInput, BubbleGraph, CreateSessionInput, ListParams, SessionFilter,
    SessionStatus, UpdateSessionInput, User,
};
use crate::services::graph;
use crate::services::AdvanceInput;

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub course_id: Option<i64>,
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_max_attempts() -> i64 {
    3
}

fn default_coins_per_bubble() -> i64 {
    10
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    pub description: Option<String>,
    pub course_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub graph_json: BubbleGraph,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_bubble: i64,
    #[serde(default = "default_coins_per_bubble")]
    pub coins_per_bubble: i64,
    pub time_limit_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<SessionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub graph_json: Option<BubbleGraph>,
    pub max_attempts_per_bubble: Option<i64>,
    pub coins_per_bubble: Option<i64>,
    pub time_limit_minutes: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/analyze-graph", post(analyze_graph))
        .route("/{id}", get(get_session).put(update_session).delete(delete_session))
        .route("/{id}/validate", post(validate_session_graph))
        .route("/{id}/bubbles", get(list_bubbles).post(upsert_bubble))
        .route("/{id}/bubbles/{node_id}", get(get_bubble))
        .route("/{id}/start", post(start_session))
        .route("/{id}/advance", post(advance))
        .route("/{id}/state", get(student_state))
}

/// Routes that need no token
pub fn public_router() -> Router<AppState> {
    Router::new().route("/validate-graph", post(validate_graph))
}

fn ensure_staff(user: &User) -> Result<(), ApiError> {
    if !user.is_instructor_or_admin() {
        return Err(ApiError::forbidden("Only instructors and admins can perform this action"));
    }
    Ok(())
}

async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<SessionListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = SessionFilter {
        course_id: query.course_id,
        status: query.status,
        ..Default::default()
    };
    let params = ListParams::new(query.page, query.per_page);

    let sessions = state
        .session_service
        .list(&user.0, filter, query.active_only, &params)
        .await?;
    Ok(Json(PaginatedResponse::from(sessions)))
}

async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = CreateSessionInput {
        name: body.name,
        description: body.description,
        course_id: body.course_id,
        start_time: body.start_time,
        end_time: body.end_time,
        graph_json: body.graph_json,
        max_attempts_per_bubble: body.max_attempts_per_bubble,
        coins_per_bubble: body.coins_per_bubble,
        time_limit_minutes: body.time_limit_minutes,
    };

    let session = state.session_service.create(&user.0, input).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.session_service.get(&user.0, id).await?))
}

async fn update_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = UpdateSessionInput {
        name: body.name,
        description: body.description,
        status: body.status,
        start_time: body.start_time,
        end_time: body.end_time,
        graph_json: body.graph_json,
        max_attempts_per_bubble: body.max_attempts_per_bubble,
        coins_per_bubble: body.coins_per_bubble,
        time_limit_minutes: body.time_limit_minutes,
    };
    Ok(Json(state.session_service.update(&user.0, id, input).await?))
}

async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.session_service.delete(&user.0, id).await?;
    Ok(Json(MessageResponse::new("Session deleted successfully")))
}

/// POST /api/v1/sessions/validate-graph
async fn validate_graph(Json(graph): Json<BubbleGraph>) -> impl IntoResponse {
    Json(graph::validate_graph(&graph))
}

/// POST /api/v1/sessions/analyze-graph
async fn analyze_graph(
    Extension(user): Extension<AuthenticatedUser>,
    Json(graph): Json<BubbleGraph>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_staff(&user.0)?;
    Ok(Json(graph::analyze(&graph)))
}

/// POST /api/v1/sessions/{id}/validate
///
/// Validates a posted draft graph when a body is sent, the stored graph
/// otherwise.
async fn validate_session_graph(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    ensure_staff(&user.0)?;

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Json(state.session_service.validate_stored(&user.0, id).await?));
    }

    state.session_service.readable_session(&user.0, id).await?;
    let graph: BubbleGraph = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation_error(format!("Invalid graph: {}", e)))?;
    Ok(Json(graph::validate_graph(&graph)))
}

async fn list_bubbles(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.session_service.bubbles(&user.0, id).await?))
}

async fn upsert_bubble(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<BubbleContentInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.session_service.upsert_bubble(&user.0, id, body).await?))
}

async fn get_bubble(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((id, node_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.session_service.bubble(&user.0, id, &node_id).await?))
}

async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.progress_service.start_session(&user.0, id).await?))
}

async fn advance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<AdvanceInput>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.progress_service.advance(&user.0, id, body).await?))
}

async fn student_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.progress_service.state(&user.0, id).await?))
}
