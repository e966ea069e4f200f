//! Progress tracking endpoints
//!
//! Public:
//! - GET /api/v1/progress/utils/skill-domains
//! - GET /api/v1/progress/utils/learning-styles
//!
//! Authenticated (the student themself or an admin):
//! - GET /api/v1/progress/analysis/{student_id}?days=
//! - GET /api/v1/progress/skills/{student_id}?skill_domain=
//! - GET /api/v1/progress/difficulties/{student_id}
//! - GET /api/v1/progress/difficulty-recommendation/{student_id}?topic=
//! - GET /api/v1/progress/goals/{student_id}
//! - GET /api/v1/progress/badges/{student_id}
//! - GET /api/v1/progress/insights/{student_id}
//! - GET /api/v1/progress/dashboard/{student_id}

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::services::progress_tracking::{learning_style_catalogue, skill_domain_catalogue};

#[derive(Debug, Deserialize)]
pub struct AnalysisQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SkillsQuery {
    pub skill_domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopicQuery {
    pub topic: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/utils/skill-domains", get(skill_domains))
        .route("/utils/learning-styles", get(learning_styles))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analysis/{student_id}", get(analysis))
        .route("/skills/{student_id}", get(skills))
        .route("/difficulties/{student_id}", get(difficulties))
        .route(
            "/difficulty-recommendation/{student_id}",
            get(difficulty_recommendation),
        )
        .route("/goals/{student_id}", get(goals))
        .route("/badges/{student_id}", get(badges))
        .route("/insights/{student_id}", get(insights))
        .route("/dashboard/{student_id}", get(dashboard))
}

async fn skill_domains() -> impl IntoResponse {
    Json(skill_domain_catalogue())
}

async fn learning_styles() -> impl IntoResponse {
    Json(learning_style_catalogue())
}

async fn analysis(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
    Query(query): Query<AnalysisQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let analysis = state
        .progress_tracking_service
        .analysis(&user.0, student_id, query.days)
        .await?;
    Ok(Json(analysis))
}

async fn skills(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
    Query(query): Query<SkillsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let skills = state
        .progress_tracking_service
        .skills(&user.0, student_id, query.skill_domain.as_deref())
        .await?;
    Ok(Json(skills))
}

async fn difficulties(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .progress_tracking_service
            .difficulties(&user.0, student_id)
            .await?,
    ))
}

async fn difficulty_recommendation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
    Query(query): Query<TopicQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let topic = query.topic.unwrap_or_default();
    let recommendation = state
        .progress_tracking_service
        .difficulty_recommendation(&user.0, student_id, &topic)
        .await?;
    Ok(Json(recommendation))
}

async fn goals(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.progress_tracking_service.goals(&user.0, student_id).await?))
}

async fn badges(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.progress_tracking_service.badges(&user.0, student_id).await?))
}

async fn insights(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .progress_tracking_service
            .insights(&user.0, student_id)
            .await?,
    ))
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        state
            .progress_tracking_service
            .dashboard(&user.0, student_id)
            .await?,
    ))
}
