//! Analytics endpoints
//!
//! - GET /api/v1/analytics/sessions/{id}
//! - GET /api/v1/analytics/students/{id}
//! - GET /api/v1/analytics/courses/{id}
//! - GET /api/v1/analytics/events
//! - GET /api/v1/analytics/coins
//! - GET /api/v1/analytics/dashboard

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{CoinFilter, EventFilter, EventType, TransactionType};

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub student_id: Option<i64>,
    pub session_id: Option<i64>,
    pub event_type: Option<EventType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CoinQuery {
    pub student_id: Option<i64>,
    pub session_id: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions/{id}", get(session_analytics))
        .route("/students/{id}", get(student_analytics))
        .route("/courses/{id}", get(course_analytics))
        .route("/events", get(events))
        .route("/coins", get(coins))
        .route("/dashboard", get(dashboard))
}

async fn session_analytics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.analytics_service.session_analytics(&user.0, id).await?))
}

async fn student_analytics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.analytics_service.student_progress(&user.0, id).await?))
}

async fn course_analytics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.analytics_service.course_analytics(&user.0, id).await?))
}

async fn events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EventFilter {
        student_id: query.student_id,
        session_id: query.session_id,
        event_type: query.event_type,
        start_date: query.start_date,
        end_date: query.end_date,
        ..Default::default()
    };
    Ok(Json(state.analytics_service.events(&user.0, filter, query.limit).await?))
}

async fn coins(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<CoinQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = CoinFilter {
        student_id: query.student_id,
        session_id: query.session_id,
        transaction_type: query.transaction_type,
        ..Default::default()
    };
    Ok(Json(state.analytics_service.coins(&user.0, filter, query.limit).await?))
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.analytics_service.dashboard(&user.0).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{login_as, send, test_app};
    use crate::db::repositories::{
        CoinTransactionRepository, EventLogRepository, SqlxCoinTransactionRepository,
        SqlxEventLogRepository,
    };
    use crate::models::{EventType, NewCoinTransaction, NewEvent, TransactionType, UserRole};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_student_limited_to_own_progress() {
        let (app, state) = test_app().await;
        let (me, token) = login_as(&state, "stu", UserRole::Student).await;
        let (other, _) = login_as(&state, "stu2", UserRole::Student).await;

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/v1/analytics/students/{}", me.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_sessions"], 0);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/v1/analytics/students/{}", other.id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["message"], "Students can only view their own analytics");
    }

    #[tokio::test]
    async fn test_events_reject_large_limit_and_students() {
        let (app, state) = test_app().await;
        let (_, admin) = login_as(&state, "root", UserRole::Admin).await;
        let (_, student) = login_as(&state, "stu", UserRole::Student).await;

        let (status, _) =
            send(&app, Method::GET, "/api/v1/analytics/events?limit=5000", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/api/v1/analytics/events", Some(&student), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_events_filtered_by_type() {
        let (app, state) = test_app().await;
        let (admin, token) = login_as(&state, "root", UserRole::Admin).await;

        let event_repo = SqlxEventLogRepository::new(state.pool.clone());
        event_repo
            .create(&NewEvent::new(EventType::SessionStart, admin.id).session(1))
            .await
            .unwrap();
        event_repo
            .create(&NewEvent::new(EventType::BubbleFail, admin.id).session(1))
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/analytics/events?event_type=bubble_fail",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["events"][0]["event_type"], "bubble_fail");
    }

    #[tokio::test]
    async fn test_student_coins_forced_to_self() {
        let (app, state) = test_app().await;
        let (me, token) = login_as(&state, "stu", UserRole::Student).await;
        let (other, _) = login_as(&state, "stu2", UserRole::Student).await;

        let coin_repo = SqlxCoinTransactionRepository::new(state.pool.clone());
        for (student_id, amount) in [(me.id, 10), (other.id, 99)] {
            coin_repo
                .record(&NewCoinTransaction {
                    student_id,
                    transaction_type: TransactionType::Earned,
                    amount,
                    session_id: None,
                    node_id: None,
                    description: "Completed bubble: Intro".to_string(),
                    metadata: None,
                })
                .await
                .unwrap();
        }

        let uri = format!("/api/v1/analytics/coins?student_id={}", other.id);
        let (status, body) = send(&app, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_transactions"], 1);
        assert_eq!(body["total_earned"], 10);
        assert_eq!(body["net_coins"], 10);
    }

    #[tokio::test]
    async fn test_dashboard_for_instructor() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "teach", UserRole::Instructor).await;

        let (status, body) = send(&app, Method::GET, "/api/v1/analytics/dashboard", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overview"]["total_courses"], 0);
        assert_eq!(body["top_sessions"].as_array().unwrap().len(), 0);
    }
}
