//! Course endpoints
//!
//! - GET/POST /api/v1/courses
//! - GET/PUT/DELETE /api/v1/courses/{id}
//! - POST /api/v1/courses/{id}/enroll - Bulk enrollment by email
//! - GET /api/v1/courses/{id}/enrollments
//! - GET /api/v1/courses/{id}/sessions

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{MessageResponse, PaginatedResponse};
use crate::models::{CourseFilter, CreateCourseInput, EnrollmentStatus, ListParams, UpdateCourseInput};

#[derive(Debug, Deserialize)]
pub struct CourseListQuery {
    pub subject: Option<String>,
    #[serde(alias = "difficulty")]
    pub difficulty_level: Option<String>,
    pub is_public: Option<bool>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_difficulty() -> String {
    "beginner".to_string()
}

fn empty_tags() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub name: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: String,
    pub estimated_duration: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default = "empty_tags")]
    pub tags: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCourseRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub difficulty_level: Option<String>,
    pub estimated_duration: Option<i64>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    pub requires_approval: Option<bool>,
    pub learning_objectives: Option<Vec<String>>,
    pub prerequisites: Option<Vec<String>>,
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_emails: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentListQuery {
    pub status: Option<EnrollmentStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses).post(create_course))
        .route("/{id}", get(get_course).put(update_course).delete(delete_course))
        .route("/{id}/enroll", post(enroll_students))
        .route("/{id}/enrollments", get(list_enrollments))
        .route("/{id}/sessions", get(list_course_sessions))
}

async fn list_courses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<CourseListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = CourseFilter {
        subject: query.subject,
        difficulty_level: query.difficulty_level,
        is_public: query.is_public,
        ..Default::default()
    };
    let params = ListParams::new(query.page, query.per_page);

    let courses = state.course_service.list(&user.0, filter, &params).await?;
    Ok(Json(PaginatedResponse::from(courses)))
}

async fn create_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = CreateCourseInput {
        name: body.name,
        description: body.description,
        subject: body.subject,
        difficulty_level: body.difficulty_level,
        estimated_duration: body.estimated_duration,
        is_public: body.is_public,
        requires_approval: body.requires_approval,
        learning_objectives: body.learning_objectives,
        prerequisites: body.prerequisites,
        tags: body.tags,
    };

    let course = state.course_service.create(&user.0, input).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.course_service.get(&user.0, id).await?))
}

async fn update_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = UpdateCourseInput {
        name: body.name,
        description: body.description,
        subject: body.subject,
        difficulty_level: body.difficulty_level,
        estimated_duration: body.estimated_duration,
        is_active: body.is_active,
        is_public: body.is_public,
        requires_approval: body.requires_approval,
        learning_objectives: body.learning_objectives,
        prerequisites: body.prerequisites,
        tags: body.tags,
    };
    Ok(Json(state.course_service.update(&user.0, id, input).await?))
}

async fn delete_course(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.course_service.delete(&user.0, id).await?;
    Ok(Json(MessageResponse::new("Course deleted successfully")))
}

async fn enroll_students(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<EnrollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .course_service
        .enroll(&user.0, id, &body.student_emails)
        .await?;
    Ok(Json(report))
}

async fn list_enrollments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Query(query): Query<EnrollmentListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = ListParams::new(query.page, query.per_page);

    let enrollments = state
        .course_service
        .enrollments(&user.0, id, query.status, &params)
        .await?;
    Ok(Json(PaginatedResponse::from(enrollments)))
}

async fn list_course_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.course_service.sessions(&user.0, id).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{login_as, send, test_app};
    use crate::models::UserRole;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    async fn create_course(app: &axum::Router, token: &str, public: bool) -> i64 {
        let body = json!({"name": "Rust 101", "subject": "programming", "is_public": public});
        let (status, course) = send(app, Method::POST, "/api/v1/courses", Some(token), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        course["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_instructor_creates_and_student_cannot() {
        let (app, state) = test_app().await;
        let (instructor, instructor_token) = login_as(&state, "teach", UserRole::Instructor).await;
        let (_, student_token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({"name": "Rust 101"});
        let (status, course) =
            send(&app, Method::POST, "/api/v1/courses", Some(&instructor_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(course["instructor_id"], instructor.id);
        assert_eq!(course["difficulty_level"], "beginner");

        let (status, _) = send(&app, Method::POST, "/api/v1/courses", Some(&student_token), Some(body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_private_course_hidden_from_students() {
        let (app, state) = test_app().await;
        let (_, instructor_token) = login_as(&state, "teach", UserRole::Instructor).await;
        let (_, student_token) = login_as(&state, "stu", UserRole::Student).await;

        let private_id = create_course(&app, &instructor_token, false).await;
        create_course(&app, &instructor_token, true).await;

        let (status, body) = send(&app, Method::GET, "/api/v1/courses", Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["total_sessions"], 0);

        let uri = format!("/api/v1/courses/{}", private_id);
        let (status, body) = send(&app, Method::GET, &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "Course not found");
    }

    #[tokio::test]
    async fn test_enrolled_student_sees_private_course_in_list_and_get() {
        let (app, state) = test_app().await;
        let (_, instructor_token) = login_as(&state, "teach", UserRole::Instructor).await;
        let (_, student_token) = login_as(&state, "stu", UserRole::Student).await;
        let private_id = create_course(&app, &instructor_token, false).await;

        let body = json!({"student_emails": ["stu@example.com"]});
        let uri = format!("/api/v1/courses/{}/enroll", private_id);
        let (status, _) = send(&app, Method::POST, &uri, Some(&instructor_token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) = send(&app, Method::GET, "/api/v1/courses", Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        assert_eq!(list["items"][0]["id"], private_id);

        let uri = format!("/api/v1/courses/{}", private_id);
        let (status, course) = send(&app, Method::GET, &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(course["id"], private_id);

        let uri = format!("/api/v1/courses/{}/sessions", private_id);
        let (status, _) = send(&app, Method::GET, &uri, Some(&student_token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bulk_enrollment_reports_each_email() {
        let (app, state) = test_app().await;
        let (_, instructor_token) = login_as(&state, "teach", UserRole::Instructor).await;
        login_as(&state, "stu", UserRole::Student).await;
        let course_id = create_course(&app, &instructor_token, false).await;

        let body = json!({"student_emails": ["stu@example.com", "teach@example.com", "stu@example.com"]});
        let uri = format!("/api/v1/courses/{}/enroll", course_id);
        let (status, report) = send(&app, Method::POST, &uri, Some(&instructor_token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["total_processed"], 3);
        assert_eq!(report["successful_count"], 1);
        assert_eq!(report["failed_count"], 2);
        assert_eq!(
            report["failed_enrollments"][0]["error"],
            "Student not found or user is not a student"
        );
        assert_eq!(
            report["failed_enrollments"][1]["error"],
            "Student already enrolled in this course"
        );

        let uri = format!("/api/v1/courses/{}/enrollments?status=active", course_id);
        let (status, list) = send(&app, Method::GET, &uri, Some(&instructor_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        assert_eq!(list["items"][0]["student_email"], "stu@example.com");
        assert_eq!(list["items"][0]["course_name"], "Rust 101");
    }

    #[tokio::test]
    async fn test_other_instructor_cannot_update() {
        let (app, state) = test_app().await;
        let (_, owner_token) = login_as(&state, "owner", UserRole::Instructor).await;
        let (_, other_token) = login_as(&state, "other", UserRole::Instructor).await;
        let course_id = create_course(&app, &owner_token, true).await;

        let uri = format!("/api/v1/courses/{}", course_id);
        let body = json!({"name": "Renamed"});
        let (status, _) = send(&app, Method::PUT, &uri, Some(&other_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, updated) = send(&app, Method::PUT, &uri, Some(&owner_token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Renamed");
    }

    #[tokio::test]
    async fn test_delete_empty_course() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "teach", UserRole::Instructor).await;
        let course_id = create_course(&app, &token, false).await;

        let uri = format!("/api/v1/courses/{}", course_id);
        let (status, body) = send(&app, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Course deleted successfully");

        let (status, _) = send(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
