//! AI tutor endpoints
//!
//! Public:
//! - GET /api/v1/ai-tutor/status
//! - GET /api/v1/ai-tutor/hints/pricing
//!
//! Authenticated:
//! - POST /api/v1/ai-tutor/ask-gpt
//! - POST /api/v1/ai-tutor/ask
//! - POST /api/v1/ai-tutor/hint
//! - POST /api/v1/ai-tutor/code-feedback
//! - GET /api/v1/ai-tutor/learning-path

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::services::tutor::{CodeFeedbackRequest, HintRequest, TutorRequest};

#[derive(Debug, Deserialize)]
pub struct AskGptRequest {
    pub question: String,
    pub system_prompt: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/hints/pricing", get(pricing))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/ask-gpt", post(ask_gpt))
        .route("/ask", post(ask))
        .route("/hint", post(hint))
        .route("/code-feedback", post(code_feedback))
        .route("/learning-path", get(learning_path))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tutor_service.status())
}

async fn pricing(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tutor_service.pricing())
}

async fn ask_gpt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<AskGptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.question.trim().is_empty() {
        return Err(ApiError::validation_error("Question cannot be empty"));
    }
    tracing::debug!(user_id = user.0.id, "Free-form tutor question");

    let answer = state
        .tutor_service
        .ask_gpt(&body.question, body.system_prompt.as_deref())
        .await;
    Ok(Json(answer))
}

async fn ask(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<TutorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.tutor_service.ask(&user.0, body).await?))
}

async fn hint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<HintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.tutor_service.hint(&user.0, body).await?))
}

async fn code_feedback(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthenticatedUser>,
    Json(body): Json<CodeFeedbackRequest>,
) -> impl IntoResponse {
    Json(state.tutor_service.code_feedback(body).await)
}

async fn learning_path(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.tutor_service.learning_path(&user.0).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{login_as, send, test_app, test_app_with_ai};
    use crate::db::repositories::{CoinTransactionRepository, SqlxCoinTransactionRepository};
    use crate::models::{NewCoinTransaction, TransactionType, UserRole};
    use crate::services::ai::test_support::ScriptedClient;
    use crate::services::ai::UNAVAILABLE_MESSAGE;
    use crate::services::AiService;
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_status_and_pricing_are_public() {
        let (app, _) = test_app().await;

        let (status, body) = send(&app, Method::GET, "/api/v1/ai-tutor/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ai_available"], false);
        assert_eq!(body["features"]["code_feedback"], true);

        let (status, body) = send(&app, Method::GET, "/api/v1/ai-tutor/hints/pricing", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["level_1"]["cost_coins"], 5);
        assert_eq!(body["level_3"]["cost_coins"], 15);
    }

    #[tokio::test]
    async fn test_ask_gpt_requires_auth_and_reports_unavailable() {
        let (app, state) = test_app().await;
        let body = json!({"question": "What is ownership?"});

        let (status, _) =
            send(&app, Method::POST, "/api/v1/ai-tutor/ask-gpt", None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, token) = login_as(&state, "stu", UserRole::Student).await;
        let (status, answer) =
            send(&app, Method::POST, "/api/v1/ai-tutor/ask-gpt", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["response"], UNAVAILABLE_MESSAGE);
        assert_eq!(answer["ai_available"], false);
    }

    #[tokio::test]
    async fn test_ask_uses_model_answer_when_available() {
        let client = ScriptedClient::answering("Borrowing lends access.\nSuggestion: Reread chapter 4");
        let ai = Arc::new(AiService::with_client(client, "gpt-test"));
        let (app, state) = test_app_with_ai(ai).await;
        let (_, token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({
            "question": "How does borrowing work?",
            "bubble_id": "concept-1",
            "bubble_type": "concept",
        });
        let (status, answer) =
            send(&app, Method::POST, "/api/v1/ai-tutor/ask", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["response"], "Borrowing lends access.");
        assert_eq!(answer["suggestions"][0], "Reread chapter 4");
    }

    #[tokio::test]
    async fn test_ask_falls_back_without_model() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({"question": "Stuck", "bubble_id": "task-1", "bubble_type": "task"});
        let (status, answer) =
            send(&app, Method::POST, "/api/v1/ai-tutor/ask", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["confidence"], 0.6);
        assert_eq!(answer["suggestions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_hint_charges_coins() {
        let (app, state) = test_app().await;
        let (student, token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({"bubble_id": "quiz-1", "question": "What is 6 * 7?", "hint_level": 2});
        let (status, err) =
            send(&app, Method::POST, "/api/v1/ai-tutor/hint", Some(&token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["message"], "Insufficient coins. Need 10, have 0");

        let coin_repo = SqlxCoinTransactionRepository::new(state.pool.clone());
        coin_repo
            .record(&NewCoinTransaction {
                student_id: student.id,
                transaction_type: TransactionType::Earned,
                amount: 20,
                session_id: None,
                node_id: None,
                description: "Completed bubble: Intro".to_string(),
                metadata: None,
            })
            .await
            .unwrap();

        let (status, hint) =
            send(&app, Method::POST, "/api/v1/ai-tutor/hint", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hint["hint_level"], 2);
        assert_eq!(hint["cost_coins"], 10);
        assert_eq!(coin_repo.balance(student.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_hint_level_out_of_range() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({"bubble_id": "quiz-1", "question": "?", "hint_level": 4});
        let (status, _) =
            send(&app, Method::POST, "/api/v1/ai-tutor/hint", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_code_feedback_fallback() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "stu", UserRole::Student).await;

        let body = json!({"code": "print(1)", "language": "python", "bubble_id": "code-1"});
        let (status, feedback) =
            send(&app, Method::POST, "/api/v1/ai-tutor/code-feedback", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feedback["is_correct"], true);
        assert!(feedback["corrected_code"].is_null());
    }

    #[tokio::test]
    async fn test_learning_path_for_new_student() {
        let (app, state) = test_app().await;
        let (_, token) = login_as(&state, "stu", UserRole::Student).await;

        let (status, path) =
            send(&app, Method::GET, "/api/v1/ai-tutor/learning-path", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(path["current_level"], "beginner");
        assert!(!path["suggestions"].as_array().unwrap().is_empty());
    }
}
