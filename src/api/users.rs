//! User administration endpoints
//!
//! - GET /api/v1/users - List users (admin, instructor)
//! - POST /api/v1/users - Create a user (admin)
//! - PUT /api/v1/users/me - Update own profile
//! - GET /api/v1/users/stats/overview - Aggregate counts (admin, instructor)
//! - GET/PUT/DELETE /api/v1/users/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_user_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{MessageResponse, PaginatedResponse};
use crate::models::{CreateUserInput, ListParams, UpdateUserInput, User, UserRole};

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_user_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
}

/// Admin update; every field optional
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
    pub is_verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/me", put(update_me))
        .route("/stats/overview", get(stats_overview))
        .route("/{id}", get(get_user).put(update_user).delete(delete_user))
}

fn ensure_admin(user: &User) -> Result<(), ApiError> {
    if !user.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }
    Ok(())
}

async fn list_users(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<UserListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let users = state
        .user_service
        .list(&user.0, query.role, query.is_active, &params)
        .await?;
    Ok(Json(PaginatedResponse::from(users)))
}

async fn create_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_admin(&user.0)?;

    let created = state
        .user_service
        .create_user(CreateUserInput {
            username: body.username,
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
            role: body.role,
        })
        .await?;

    tracing::info!(user_id = created.id, created_by = user.0.id, "User created by admin");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = UpdateUserInput {
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        avatar_url: body.avatar_url,
        ..Default::default()
    };
    Ok(Json(state.user_service.update_me(&user.0, input).await?))
}

async fn stats_overview(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    if !user.0.is_instructor_or_admin() {
        return Err(ApiError::forbidden("Not enough permissions"));
    }
    Ok(Json(state.user_service.stats().await?))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.user_service.get_visible(&user.0, id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_admin(&user.0)?;

    let input = UpdateUserInput {
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        avatar_url: None,
        role: body.role,
        is_active: body.is_active,
        is_verified: body.is_verified,
    };
    Ok(Json(state.user_service.update_user(id, input).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_admin(&user.0)?;
    state.user_service.delete_user(&user.0, id).await?;
    Ok(Json(MessageResponse::new("User deleted successfully")))
}
