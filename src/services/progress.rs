//! Progress service
//!
//! Moves a student through a published session: starting or resuming,
//! evaluating answers per bubble type, awarding coins and logging the
//! learning events analytics are built from.

use crate::db::repositories::{
    BubbleNodeRepository, CoinTransactionRepository, EventLogRepository, SessionRepository,
    StudentStateRepository,
};
use crate::models::{
    BubbleNode, BubbleType, EventType, NewCoinTransaction, NewEvent, Session, StudentState,
    TransactionType, User,
};
use crate::services::graph;
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Stored responses are cut to this many characters in failure events
const LOGGED_RESPONSE_CHARS: usize = 100;

/// Upper bound for a single `time_spent` report, in seconds
pub const MAX_TIME_SPENT_SECS: i64 = 86_400;

/// Error types for progress operations
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// A student's answer to the bubble they are on
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceInput {
    pub node_id: String,
    #[serde(default)]
    pub student_response: String,
    #[serde(default)]
    pub code_output: Option<String>,
    /// Seconds spent on the bubble
    #[serde(default)]
    pub time_spent: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    pub success: bool,
    pub next_node_id: Option<String>,
    pub feedback: String,
    pub coins_earned: i64,
    pub is_session_complete: bool,
    pub hints_available: Vec<String>,
}

/// Judge a response against a bubble; returns whether it passed and the feedback
pub fn evaluate(bubble: &BubbleNode, response: &str, code_output: Option<&str>) -> (bool, String) {
    let verdict = |ok: bool, pass: &str, fail: String| {
        if ok {
            (true, pass.to_string())
        } else {
            (false, fail)
        }
    };

    match bubble.node_type {
        BubbleType::Concept => verdict(
            !response.trim().is_empty(),
            "Great! You've reviewed the concept.",
            "Please acknowledge that you've read the concept.".to_string(),
        ),
        BubbleType::Quiz => {
            let expected = bubble.expected_output.as_deref().unwrap_or("");
            verdict(
                response.trim().to_lowercase() == expected.trim().to_lowercase(),
                "Correct answer!",
                "That's not quite right. Try again!".to_string(),
            )
        }
        BubbleType::Task => match (bubble.expected_output.as_deref(), code_output) {
            (Some(expected), Some(actual)) => {
                let (expected, actual) = (expected.trim(), actual.trim());
                verdict(
                    expected == actual,
                    "Perfect! Your code works correctly.",
                    format!("Output doesn't match. Expected: {}, Got: {}", expected, actual),
                )
            }
            _ => verdict(
                response.trim().chars().count() > 10,
                "Good effort! Your solution has been submitted.",
                "Please provide a more complete solution.".to_string(),
            ),
        },
        BubbleType::Demo | BubbleType::Summary => (true, "Response recorded.".to_string()),
    }
}

/// Progress service
pub struct ProgressService {
    session_repo: Arc<dyn SessionRepository>,
    bubble_repo: Arc<dyn BubbleNodeRepository>,
    state_repo: Arc<dyn StudentStateRepository>,
    event_repo: Arc<dyn EventLogRepository>,
    coin_repo: Arc<dyn CoinTransactionRepository>,
}

impl ProgressService {
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        bubble_repo: Arc<dyn BubbleNodeRepository>,
        state_repo: Arc<dyn StudentStateRepository>,
        event_repo: Arc<dyn EventLogRepository>,
        coin_repo: Arc<dyn CoinTransactionRepository>,
    ) -> Self {
        Self {
            session_repo,
            bubble_repo,
            state_repo,
            event_repo,
            coin_repo,
        }
    }

    /// Start a session, or resume the student's unfinished attempt
    pub async fn start_session(&self, actor: &User, session_id: i64) -> Result<StudentState, ProgressError> {
        if !actor.is_student() {
            return Err(ProgressError::Forbidden(
                "Only students can start sessions".to_string(),
            ));
        }

        let session = self
            .session_repo
            .get_by_id(session_id)
            .await
            .context("Failed to get session")?
            .filter(Session::is_published)
            .ok_or_else(|| ProgressError::NotFound("Session not available".to_string()))?;

        if let Some(mut state) = self.find_state(actor.id, session.id).await? {
            if !state.is_completed {
                state.last_activity_at = Utc::now();
                self.state_repo
                    .update(&state)
                    .await
                    .context("Failed to resume session")?;
            }
            return Ok(state);
        }

        let start_node = session.graph_json.start_node.clone();
        let state = self
            .state_repo
            .create(&StudentState::new(actor.id, session.id, &start_node))
            .await
            .context("Failed to start session")?;

        self.log(
            NewEvent::new(EventType::SessionStart, actor.id)
                .session(session.id)
                .payload(json!({ "start_node": start_node })),
        )
        .await?;

        tracing::info!(student_id = actor.id, session_id = session.id, "Session started");
        Ok(state)
    }

    /// Submit an answer for a bubble and move on when it passes
    pub async fn advance(
        &self,
        actor: &User,
        session_id: i64,
        input: AdvanceInput,
    ) -> Result<AdvanceOutcome, ProgressError> {
        let time_spent = input.time_spent.unwrap_or(0);
        if !(0..=MAX_TIME_SPENT_SECS).contains(&time_spent) {
            return Err(ProgressError::ValidationError(format!(
                "time_spent must be between 0 and {} seconds",
                MAX_TIME_SPENT_SECS
            )));
        }

        let mut state = self
            .find_state(actor.id, session_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound("Session not started".to_string()))?;

        if state.is_completed {
            return Ok(AdvanceOutcome {
                success: false,
                next_node_id: None,
                feedback: "Session already completed".to_string(),
                coins_earned: 0,
                is_session_complete: true,
                hints_available: Vec::new(),
            });
        }

        let session = self
            .session_repo
            .get_by_id(session_id)
            .await
            .context("Failed to get session")?
            .ok_or_else(|| ProgressError::NotFound("Session not found".to_string()))?;
        let bubble = self
            .bubble_repo
            .get(session_id, &input.node_id)
            .await
            .context("Failed to get bubble")?
            .ok_or_else(|| ProgressError::NotFound("Bubble not found".to_string()))?;

        let (passed, feedback) = evaluate(&bubble, &input.student_response, input.code_output.as_deref());

        state.total_time_spent = state.total_time_spent.saturating_add(time_spent);
        state.last_activity_at = Utc::now();
        let response_time_ms = input.time_spent.map(|s| s * 1000);

        let outcome = if passed {
            self.on_success(&mut state, &session, &bubble, feedback, response_time_ms)
                .await?
        } else {
            self.on_failure(&mut state, &bubble, &input.student_response, feedback, response_time_ms)
                .await?
        };

        self.state_repo
            .update(&state)
            .await
            .context("Failed to save progress")?;
        Ok(outcome)
    }

    async fn on_success(
        &self,
        state: &mut StudentState,
        session: &Session,
        bubble: &BubbleNode,
        feedback: String,
        response_time_ms: Option<i64>,
    ) -> Result<AdvanceOutcome, ProgressError> {
        let mut coins_earned = 0;
        if state.mark_completed(&bubble.node_id) {
            coins_earned = bubble.coin_reward;
            state.total_coins += coins_earned;

            if coins_earned > 0 {
                self.coin_repo
                    .record(&NewCoinTransaction {
                        student_id: state.student_id,
                        transaction_type: TransactionType::Earned,
                        amount: coins_earned,
                        session_id: Some(session.id),
                        node_id: Some(bubble.node_id.clone()),
                        description: format!("Completed bubble: {}", bubble.title),
                        metadata: None,
                    })
                    .await
                    .context("Failed to record coins")?;
            }
        }

        let next_node_id = graph::next_nodes(&session.graph_json, &bubble.node_id)
            .into_iter()
            .next();
        match &next_node_id {
            Some(next) => state.current_node_id = Some(next.clone()),
            None => {
                state.is_completed = true;
                state.completed_at = Some(Utc::now());
            }
        }

        let total_nodes = session.graph_json.nodes.len();
        if total_nodes > 0 {
            state.completion_percentage = state.completed_nodes.len() as f64 / total_nodes as f64 * 100.0;
        }

        self.log(
            NewEvent::new(EventType::BubbleSuccess, state.student_id)
                .session(session.id)
                .node(bubble.node_id.clone())
                .success(true)
                .response_time_ms(response_time_ms)
                .payload(json!({ "coins_earned": coins_earned, "node_type": bubble.node_type.as_str() })),
        )
        .await?;

        if state.is_completed {
            self.log(
                NewEvent::new(EventType::SessionComplete, state.student_id)
                    .session(session.id)
                    .payload(json!({
                        "total_coins": state.total_coins,
                        "total_time_spent": state.total_time_spent,
                    })),
            )
            .await?;
            tracing::info!(student_id = state.student_id, session_id = session.id, "Session completed");
        }

        Ok(AdvanceOutcome {
            success: true,
            next_node_id,
            feedback,
            coins_earned,
            is_session_complete: state.is_completed,
            hints_available: Vec::new(),
        })
    }

    async fn on_failure(
        &self,
        state: &mut StudentState,
        bubble: &BubbleNode,
        response: &str,
        feedback: String,
        response_time_ms: Option<i64>,
    ) -> Result<AdvanceOutcome, ProgressError> {
        let attempts = state.record_failure(&bubble.node_id);

        // One more hint is revealed per failed attempt
        let hints_available = usize::try_from(attempts - 1)
            .ok()
            .and_then(|i| bubble.hints.get(i))
            .cloned()
            .into_iter()
            .collect();

        let logged: String = response.chars().take(LOGGED_RESPONSE_CHARS).collect();
        self.log(
            NewEvent::new(EventType::BubbleFail, state.student_id)
                .session(state.session_id)
                .node(bubble.node_id.clone())
                .success(false)
                .response_time_ms(response_time_ms)
                .payload(json!({
                    "response": logged,
                    "attempt": attempts,
                    "node_type": bubble.node_type.as_str(),
                })),
        )
        .await?;

        Ok(AdvanceOutcome {
            success: false,
            next_node_id: None,
            feedback,
            coins_earned: 0,
            is_session_complete: false,
            hints_available,
        })
    }

    /// The student's state in a session
    pub async fn state(&self, actor: &User, session_id: i64) -> Result<StudentState, ProgressError> {
        self.find_state(actor.id, session_id)
            .await?
            .ok_or_else(|| ProgressError::NotFound("Session not started".to_string()))
    }

    async fn find_state(&self, student_id: i64, session_id: i64) -> Result<Option<StudentState>, ProgressError> {
        Ok(self
            .state_repo
            .get(student_id, session_id)
            .await
            .context("Failed to get student state")?)
    }

    async fn log(&self, event: NewEvent) -> Result<(), ProgressError> {
        self.event_repo
            .create(&event)
            .await
            .with_context(|| format!("Failed to log {} event", event.event_type))?;
        Ok(())
    }
}
