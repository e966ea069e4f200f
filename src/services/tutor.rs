//! AI tutor
//!
//! Tutoring endpoints on top of [`AiService`]. Every operation has a
//! canned fallback, so a missing key or a failing provider degrades the
//! answers instead of the endpoint. Hints are paid for from the
//! student's coin balance.

use crate::db::repositories::{
    CoinTransactionRepository, EventLogRepository, SessionRepository, Spend, StudentStateRepository,
};
use crate::models::{EventFilter, EventLog, EventType, NewCoinTransaction, NewEvent, TransactionType, User};
use crate::services::ai::AiService;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Coins charged per hint level
pub const HINT_BASE_COST: i64 = 5;
const RECENT_EVENT_WINDOW: i64 = 20;
const MAX_HINT_CHARS: usize = 200;
const AI_CONFIDENCE: f64 = 0.8;
const FALLBACK_CONFIDENCE: f64 = 0.6;

#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TutorRequest {
    pub question: String,
    pub bubble_id: String,
    pub bubble_type: String,
    #[serde(default)]
    pub current_attempt: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TutorResponse {
    pub response: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HintRequest {
    pub bubble_id: String,
    pub question: String,
    #[serde(default)]
    pub current_attempt: Option<String>,
    #[serde(default = "default_hint_level")]
    pub hint_level: i64,
    #[serde(default)]
    pub previous_hints: Vec<String>,
}

fn default_hint_level() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct HintResponse {
    pub hint: String,
    pub hint_level: i64,
    pub cost_coins: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeFeedbackRequest {
    pub code: String,
    pub language: String,
    pub bubble_id: String,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub test_cases: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CodeFeedbackResponse {
    pub feedback: String,
    pub is_correct: bool,
    pub suggestions: Vec<String>,
    pub explanation: String,
    pub corrected_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LearningPathSuggestion {
    pub title: String,
    pub description: String,
    pub priority: String,
    /// Minutes
    pub estimated_time: i64,
    pub prerequisites: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningPathResponse {
    pub suggestions: Vec<LearningPathSuggestion>,
    pub current_level: String,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub motivation_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskGptResponse {
    pub response: String,
    pub ai_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TutorFeatures {
    pub personalized_responses: bool,
    pub contextual_hints: bool,
    pub code_feedback: bool,
    pub learning_paths: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TutorStatus {
    pub ai_available: bool,
    pub model: String,
    pub features: TutorFeatures,
}

#[derive(Debug, Clone, Serialize)]
pub struct HintPrice {
    pub description: &'static str,
    pub cost_coins: i64,
}

/// What the tutor knows about a student, derived from recent events
#[derive(Debug, Clone, PartialEq)]
pub struct StudentContext {
    pub success_rate: f64,
    pub learning_style: &'static str,
    pub common_mistakes: Vec<String>,
}

impl StudentContext {
    /// Derive from events ordered newest first
    pub fn from_events(events: &[EventLog]) -> Self {
        let count = |t: EventType| events.iter().filter(|e| e.event_type == t).count();

        let successes = count(EventType::BubbleSuccess);
        let attempts = successes + count(EventType::BubbleFail);
        let success_rate = if attempts == 0 {
            0.5
        } else {
            successes as f64 / attempts as f64
        };

        let learning_style = if events.is_empty() {
            "balanced"
        } else if count(EventType::HintRequested) as f64 / events.len() as f64 > 0.3 {
            "guided"
        } else {
            "independent"
        };

        let common_mistakes = events
            .iter()
            .filter(|e| e.event_type == EventType::BubbleFail)
            .take(3)
            .filter_map(|e| e.payload.as_ref()?.get("error")?.as_str().map(str::to_string))
            .collect();

        Self {
            success_rate,
            learning_style,
            common_mistakes,
        }
    }
}

/// Level label from the number of completed sessions
fn level_for(completed_sessions: usize) -> &'static str {
    match completed_sessions {
        0..=2 => "beginner",
        3..=9 => "intermediate",
        _ => "advanced",
    }
}

fn hint_cost(level: i64) -> i64 {
    HINT_BASE_COST * level
}

fn hint_description(level: i64) -> &'static str {
    match level {
        1 => "Subtle nudge in the right direction",
        2 => "Clearer guidance on approach",
        _ => "Direct help toward solution",
    }
}

fn tutor_system_prompt(bubble_type: &str, ctx: &StudentContext) -> String {
    let focus = match bubble_type {
        "concept" => {
            "Focus on clear explanations and analogies, and check understanding with guiding questions."
        }
        "task" => "Guide step by step without giving away the answer, and encourage problem-solving.",
        "quiz" => "Give constructive feedback and explain why an answer is right or wrong.",
        _ => "Adapt your teaching style to the learning objective.",
    };
    format!(
        "You are an expert AI tutor. Be supportive, encouraging and pedagogically sound.\n\n{}\n\n\
         Student context:\n- Recent performance: {:.1}%\n- Learning style: {}\n\n\
         Start with a one-line answer. Then list suggestions as lines starting with \"Suggestion:\" \
         and next steps as lines starting with \"Next:\".",
        focus,
        ctx.success_rate * 100.0,
        ctx.learning_style
    )
}

fn tutor_user_message(request: &TutorRequest, ctx: &StudentContext) -> String {
    let mut message = format!("Student question: {}\n", request.question);
    if let Some(attempt) = &request.current_attempt {
        message.push_str(&format!("Current attempt: {}\n", attempt));
    }
    if !ctx.common_mistakes.is_empty() {
        message.push_str(&format!(
            "Common student mistakes in this area: {}\n",
            ctx.common_mistakes.join(", ")
        ));
    }
    message.push_str("Please provide helpful guidance appropriate for this student.");
    message
}

fn hint_system_prompt(level: i64) -> String {
    let guidance = match level {
        1 => "Provide a subtle nudge in the right direction without revealing the answer.",
        2 => "Give a clearer hint that helps identify the approach or method.",
        _ => "Provide a more direct hint that guides toward the solution.",
    };
    format!(
        "You are providing learning hints to a student. {} Keep hints encouraging and educational. \
         Respond with just the hint, no extra formatting.",
        guidance
    )
}

/// Split a tutor answer into the reply, suggestions and next steps
pub fn parse_tutor_answer(answer: &str) -> TutorResponse {
    let mut lines = answer.trim().lines();
    let response = lines.next().unwrap_or_default().trim().to_string();

    let mut suggestions = Vec::new();
    let mut next_steps = Vec::new();
    for line in lines.map(str::trim) {
        if let Some(rest) = line.strip_prefix("Suggestion:").or_else(|| line.strip_prefix("- ")) {
            suggestions.push(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("Next step:").or_else(|| line.strip_prefix("Next:")) {
            next_steps.push(rest.trim().to_string());
        }
    }
    suggestions.truncate(3);
    next_steps.truncate(3);

    TutorResponse {
        response,
        confidence: AI_CONFIDENCE,
        suggestions,
        next_steps,
    }
}

/// Trim a hint and cap its length
pub fn clip_hint(hint: &str) -> String {
    let hint = hint.trim();
    if hint.chars().count() > MAX_HINT_CHARS {
        let head: String = hint.chars().take(MAX_HINT_CHARS).collect();
        format!("{}...", head)
    } else {
        hint.to_string()
    }
}

fn is_bullet(line: &str) -> bool {
    line.starts_with(['-', '•', '*'])
}

/// Split a code review into feedback, verdict, suggestions and explanation
pub fn parse_code_feedback(answer: &str) -> CodeFeedbackResponse {
    let lines: Vec<&str> = answer.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let feedback = lines.first().copied().unwrap_or(answer.trim()).to_string();

    let lower = answer.to_lowercase();
    let is_correct = lower.contains("correct") && !lower.contains("incorrect");

    let mut suggestions = Vec::new();
    let mut explanation = Vec::new();
    for line in lines.iter().skip(1) {
        if is_bullet(line) {
            suggestions.push(line.trim_start_matches(['-', '•', '*']).trim().to_string());
        } else {
            explanation.push(*line);
        }
    }
    suggestions.truncate(3);

    CodeFeedbackResponse {
        explanation: if explanation.is_empty() {
            feedback.clone()
        } else {
            explanation.join("\n")
        },
        feedback,
        is_correct,
        suggestions,
        corrected_code: None,
    }
}

/// Numbered or bulleted lines become suggestions, at most five
pub fn parse_learning_suggestions(answer: &str) -> Vec<LearningPathSuggestion> {
    const MARKERS: [char; 8] = ['1', '2', '3', '4', '5', '.', '-', '*'];

    answer
        .lines()
        .map(str::trim)
        .filter(|line| {
            ["1.", "2.", "3.", "4.", "5."].iter().any(|p| line.starts_with(p)) || is_bullet(line)
        })
        .map(|line| line.trim_start_matches(|c| MARKERS.contains(&c) || c == '•').trim())
        .filter(|text| text.chars().count() > 5)
        .take(5)
        .map(|text| LearningPathSuggestion {
            title: text.split(':').next().unwrap_or(text).chars().take(50).collect(),
            description: text.to_string(),
            priority: "medium".to_string(),
            estimated_time: 20,
            prerequisites: Vec::new(),
            resources: Vec::new(),
        })
        .collect()
}

fn fallback_response(bubble_type: &str) -> TutorResponse {
    let response = match bubble_type {
        "concept" => "Let me help you understand this concept. Try breaking it down into smaller parts and think about how it relates to what you already know.",
        "task" => "Great question! Let's approach this step by step. What do you think the first step should be?",
        "quiz" => "Take your time to think through this. Consider what you've learned so far and apply those principles.",
        _ => "I'm here to help! Let's work through this together.",
    };
    TutorResponse {
        response: response.to_string(),
        confidence: FALLBACK_CONFIDENCE,
        suggestions: vec![
            "Take your time".to_string(),
            "Review the material".to_string(),
            "Try a different approach".to_string(),
        ],
        next_steps: vec![
            "Practice similar problems".to_string(),
            "Ask for clarification if needed".to_string(),
        ],
    }
}

fn fallback_hint(level: i64) -> &'static str {
    match level {
        1 => "Think about the key concepts involved in this problem.",
        2 => "Consider breaking this down into smaller steps. What's the first thing you need to figure out?",
        _ => "Look at the structure of the problem. What patterns or formulas might apply here?",
    }
}

fn fallback_code_feedback() -> CodeFeedbackResponse {
    CodeFeedbackResponse {
        feedback: "Your code structure looks good. Consider testing it with different inputs to verify it works correctly.".to_string(),
        is_correct: true,
        suggestions: vec![
            "Test with edge cases".to_string(),
            "Check variable names".to_string(),
            "Review logic flow".to_string(),
        ],
        explanation: "Code feedback is currently limited. Please verify your solution manually.".to_string(),
        corrected_code: None,
    }
}

fn fallback_learning_path() -> Vec<LearningPathSuggestion> {
    vec![
        LearningPathSuggestion {
            title: "Review Fundamentals".to_string(),
            description: "Strengthen your understanding of basic concepts".to_string(),
            priority: "high".to_string(),
            estimated_time: 20,
            prerequisites: Vec::new(),
            resources: vec!["Course materials".to_string(), "Practice exercises".to_string()],
        },
        LearningPathSuggestion {
            title: "Practice Problem Solving".to_string(),
            description: "Work on applying concepts to solve problems".to_string(),
            priority: "medium".to_string(),
            estimated_time: 30,
            prerequisites: vec!["Basic understanding".to_string()],
            resources: vec!["Problem sets".to_string(), "Examples".to_string()],
        },
    ]
}

/// Tutor service
pub struct TutorService {
    ai: Arc<AiService>,
    event_repo: Arc<dyn EventLogRepository>,
    coin_repo: Arc<dyn CoinTransactionRepository>,
    state_repo: Arc<dyn StudentStateRepository>,
    session_repo: Arc<dyn SessionRepository>,
}

impl TutorService {
    pub fn new(
        ai: Arc<AiService>,
        event_repo: Arc<dyn EventLogRepository>,
        coin_repo: Arc<dyn CoinTransactionRepository>,
        state_repo: Arc<dyn StudentStateRepository>,
        session_repo: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            ai,
            event_repo,
            coin_repo,
            state_repo,
            session_repo,
        }
    }

    pub fn status(&self) -> TutorStatus {
        TutorStatus {
            ai_available: self.ai.is_available(),
            model: self.ai.model().to_string(),
            features: TutorFeatures {
                personalized_responses: true,
                contextual_hints: true,
                code_feedback: true,
                learning_paths: true,
            },
        }
    }

    pub fn pricing(&self) -> BTreeMap<String, HintPrice> {
        (1..=3)
            .map(|level| {
                (
                    format!("level_{}", level),
                    HintPrice {
                        description: hint_description(level),
                        cost_coins: hint_cost(level),
                    },
                )
            })
            .collect()
    }

    pub async fn ask_gpt(&self, question: &str, system_prompt: Option<&str>) -> AskGptResponse {
        AskGptResponse {
            response: self.ai.ask_gpt(question, system_prompt).await,
            ai_available: self.ai.is_available(),
        }
    }

    /// Personalised answer to a question about a bubble
    pub async fn ask(&self, actor: &User, request: TutorRequest) -> Result<TutorResponse, TutorError> {
        let ctx = self.student_context(actor.id).await?;

        let answer = self
            .ai
            .try_complete(
                &tutor_system_prompt(&request.bubble_type, &ctx),
                &tutor_user_message(&request, &ctx),
            )
            .await;
        let used_ai = answer.is_some();
        let response = match answer {
            Some(text) => parse_tutor_answer(&text),
            None => fallback_response(&request.bubble_type),
        };

        let question: String = request.question.chars().take(100).collect();
        let mut event = NewEvent::new(EventType::TutorInteraction, actor.id)
            .node(request.bubble_id.clone())
            .payload(json!({
                "question": question,
                "response_length": response.response.chars().count(),
                "confidence": response.confidence,
                "suggestions_count": response.suggestions.len(),
                "ai": used_ai,
            }));
        if let Some(session_id) = self.context_session(&request).await? {
            event = event.session(session_id);
        }
        self.event_repo
            .create(&event)
            .await
            .context("Failed to log tutor interaction")?;

        Ok(response)
    }

    /// The `context.session_id` of a request, kept only for a published session
    async fn context_session(&self, request: &TutorRequest) -> Result<Option<i64>, TutorError> {
        let Some(session_id) = request
            .context
            .as_ref()
            .and_then(|c| c.get("session_id"))
            .and_then(|v| v.as_i64())
        else {
            return Ok(None);
        };

        let session = self
            .session_repo
            .get_by_id(session_id)
            .await
            .context("Failed to load session")?;
        Ok(session.filter(|s| s.is_published()).map(|s| s.id))
    }

    /// A paid hint; the cost is charged against the real coin balance
    pub async fn hint(&self, actor: &User, request: HintRequest) -> Result<HintResponse, TutorError> {
        if !(1..=3).contains(&request.hint_level) {
            return Err(TutorError::ValidationError(
                "Hint level must be between 1 and 3".to_string(),
            ));
        }
        let cost = hint_cost(request.hint_level);

        // Charged up front so concurrent requests cannot share one balance
        let charge = NewCoinTransaction {
            student_id: actor.id,
            transaction_type: TransactionType::Spent,
            amount: cost,
            session_id: None,
            node_id: Some(request.bubble_id.clone()),
            description: format!("Hint level {} for bubble {}", request.hint_level, request.bubble_id),
            metadata: Some(json!({ "hint_level": request.hint_level })),
        };
        match self.coin_repo.spend(&charge).await.context("Failed to charge hint")? {
            Spend::Charged(_) => {}
            Spend::Insufficient { balance } => {
                return Err(TutorError::ValidationError(format!(
                    "Insufficient coins. Need {}, have {}",
                    cost, balance
                )));
            }
        }

        let mut user_message = format!(
            "Student is struggling with: {}\nCurrent attempt: {}",
            request.question,
            request.current_attempt.as_deref().unwrap_or("No attempt yet")
        );
        if !request.previous_hints.is_empty() {
            user_message.push_str(&format!("\nHints already given: {}", request.previous_hints.join(" | ")));
        }
        let hint = match self
            .ai
            .try_complete(&hint_system_prompt(request.hint_level), &user_message)
            .await
        {
            Some(text) => clip_hint(&text),
            None => fallback_hint(request.hint_level).to_string(),
        };

        let logged = self
            .event_repo
            .create(
                &NewEvent::new(EventType::HintRequested, actor.id)
                    .node(request.bubble_id.clone())
                    .payload(json!({ "hint_level": request.hint_level, "cost": cost })),
            )
            .await;
        if let Err(e) = logged {
            self.refund(&charge).await;
            return Err(e.context("Failed to log hint request").into());
        }

        Ok(HintResponse {
            hint,
            hint_level: request.hint_level,
            cost_coins: cost,
        })
    }

    /// Give back a charge whose hint was never delivered
    async fn refund(&self, charge: &NewCoinTransaction) {
        let refund = NewCoinTransaction {
            transaction_type: TransactionType::Refunded,
            description: format!("Refund: {}", charge.description),
            ..charge.clone()
        };
        if let Err(e) = self.coin_repo.record(&refund).await {
            tracing::error!(student_id = charge.student_id, "Failed to refund hint charge: {:#}", e);
        }
    }

    pub async fn code_feedback(&self, request: CodeFeedbackRequest) -> CodeFeedbackResponse {
        let system = format!(
            "You are a code mentor reviewing {} code. Give constructive feedback on correctness, \
             best practices and learning. Start with overall feedback, then list specific \
             suggestions as bullet points.",
            request.language
        );
        let mut message = format!("Please review this {} code:\n\n{}\n\n", request.language, request.code);
        if let Some(expected) = &request.expected_output {
            message.push_str(&format!("Expected output: {}\n", expected));
        }
        if let Some(cases) = &request.test_cases {
            message.push_str(&format!("Test cases to consider: {}\n", cases));
        }

        match self.ai.try_complete(&system, &message).await {
            Some(text) => parse_code_feedback(&text),
            None => fallback_code_feedback(),
        }
    }

    /// Next learning steps derived from the caller's progress
    pub async fn learning_path(&self, actor: &User) -> Result<LearningPathResponse, TutorError> {
        let states = self
            .state_repo
            .list_by_student(actor.id)
            .await
            .context("Failed to load progress")?;
        let ctx = self.student_context(actor.id).await?;

        let completed = states.iter().filter(|s| s.is_completed).count();
        let avg_progress = if states.is_empty() {
            0.0
        } else {
            states.iter().map(|s| s.completion_percentage).sum::<f64>() / states.len() as f64
        };
        let level = level_for(completed);

        let mut strengths = Vec::new();
        let mut improvements = Vec::new();
        if ctx.success_rate >= 0.7 {
            strengths.push("Consistent accuracy".to_string());
        } else {
            improvements.push("Accuracy on first attempts".to_string());
        }
        if completed > 0 {
            strengths.push("Finishes sessions".to_string());
        } else {
            improvements.push("Completing sessions".to_string());
        }
        match ctx.learning_style {
            "independent" => strengths.push("Independent problem solving".to_string()),
            "guided" => improvements.push("Working without hints".to_string()),
            _ => {}
        }

        let message = format!(
            "Student context:\nProgress: {:.1}%\nLevel: {}\nStrengths: {}\nAreas for improvement: {}\n\n\
             Please suggest 3-5 specific next learning steps.",
            avg_progress,
            level,
            strengths.join(", "),
            improvements.join(", ")
        );
        let system = "You are an educational advisor. Suggest personalised learning paths based on \
                      student performance. Address weaknesses while building on strengths. Format \
                      each suggestion as a numbered list item.";

        let suggestions = match self.ai.try_complete(system, &message).await {
            Some(text) => {
                let parsed = parse_learning_suggestions(&text);
                if parsed.is_empty() {
                    fallback_learning_path()
                } else {
                    parsed
                }
            }
            None => fallback_learning_path(),
        };

        Ok(LearningPathResponse {
            suggestions,
            current_level: level.to_string(),
            strengths,
            areas_for_improvement: improvements,
            motivation_message: "You're making excellent progress! Keep up the great work and focus on the suggested areas to level up your skills.".to_string(),
        })
    }

    async fn student_context(&self, student_id: i64) -> Result<StudentContext, TutorError> {
        let events = self
            .event_repo
            .list(&EventFilter {
                student_id: Some(student_id),
                limit: RECENT_EVENT_WINDOW,
                ..Default::default()
            })
            .await
            .context("Failed to load recent events")?;
        Ok(StudentContext::from_events(&events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_course, seed_session, seed_user, setup_pool};
    use crate::db::repositories::{
        SqlxCoinTransactionRepository, SqlxEventLogRepository, SqlxSessionRepository,
        SqlxStudentStateRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::UserRole;
    use crate::services::ai::test_support::ScriptedClient;
    use chrono::Utc;

    async fn setup(ai: AiService) -> (DynDatabasePool, TutorService) {
        let pool = setup_pool().await;
        let service = TutorService::new(
            Arc::new(ai),
            SqlxEventLogRepository::boxed(pool.clone()),
            SqlxCoinTransactionRepository::boxed(pool.clone()),
            SqlxStudentStateRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        );
        (pool, service)
    }

    fn event(event_type: EventType, payload: Option<serde_json::Value>) -> EventLog {
        EventLog {
            id: 0,
            event_type,
            student_id: 1,
            session_id: None,
            node_id: None,
            payload,
            response_time_ms: None,
            success: None,
            score: None,
            user_agent: None,
            ip_address: None,
            timestamp: Utc::now(),
        }
    }

    fn ask_request(bubble_type: &str) -> TutorRequest {
        TutorRequest {
            question: "Why does this move?".to_string(),
            bubble_id: "a".to_string(),
            bubble_type: bubble_type.to_string(),
            current_attempt: None,
            context: Some(json!({ "session_id": 7 })),
        }
    }

    fn hint_request(level: i64) -> HintRequest {
        HintRequest {
            bubble_id: "a".to_string(),
            question: "stuck".to_string(),
            current_attempt: None,
            hint_level: level,
            previous_hints: Vec::new(),
        }
    }

    async fn grant(pool: &DynDatabasePool, student_id: i64, amount: i64) {
        SqlxCoinTransactionRepository::new(pool.clone())
            .record(&NewCoinTransaction {
                student_id,
                transaction_type: TransactionType::Earned,
                amount,
                session_id: None,
                node_id: None,
                description: "grant".to_string(),
                metadata: None,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_student_context() {
        let empty = StudentContext::from_events(&[]);
        assert_eq!(empty.success_rate, 0.5);
        assert_eq!(empty.learning_style, "balanced");

        let events = vec![
            event(EventType::BubbleFail, Some(json!({ "error": "off by one" }))),
            event(EventType::HintRequested, None),
            event(EventType::BubbleSuccess, None),
            event(EventType::BubbleFail, None),
            event(EventType::HintRequested, None),
        ];
        let ctx = StudentContext::from_events(&events);
        assert!((ctx.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(ctx.learning_style, "guided");
        assert_eq!(ctx.common_mistakes, vec!["off by one"]);
    }

    #[test]
    fn test_parse_tutor_answer() {
        let parsed = parse_tutor_answer(
            "Values move by default.\nSuggestion: try borrowing\n- use clone sparingly\nNext: read chapter 4\nNext step: do the quiz\nfiller",
        );
        assert_eq!(parsed.response, "Values move by default.");
        assert_eq!(parsed.suggestions, vec!["try borrowing", "use clone sparingly"]);
        assert_eq!(parsed.next_steps, vec!["read chapter 4", "do the quiz"]);
        assert_eq!(parsed.confidence, 0.8);
    }

    #[test]
    fn test_clip_hint() {
        assert_eq!(clip_hint("  short  "), "short");
        let long = "h".repeat(250);
        let clipped = clip_hint(&long);
        assert_eq!(clipped.chars().count(), 203);
        assert!(clipped.ends_with("..."));
    }

    #[test]
    fn test_parse_code_feedback() {
        let parsed = parse_code_feedback(
            "Your solution is correct.\n\n- name the loop variable\n* add a test\nIt runs in linear time.",
        );
        assert_eq!(parsed.feedback, "Your solution is correct.");
        assert!(parsed.is_correct);
        assert_eq!(parsed.suggestions, vec!["name the loop variable", "add a test"]);
        assert_eq!(parsed.explanation, "It runs in linear time.");

        let wrong = parse_code_feedback("The result is incorrect.");
        assert!(!wrong.is_correct);
        assert_eq!(wrong.explanation, "The result is incorrect.");
    }

    #[test]
    fn test_parse_learning_suggestions() {
        let parsed = parse_learning_suggestions(
            "Here is a plan:\n1. Traits: learn how generics are bounded\n2. Practice lifetimes daily\n- ok\n* Build a small CLI project",
        );
        let titles: Vec<&str> = parsed.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Traits", "Practice lifetimes daily", "Build a small CLI project"]);
        assert!(parsed.iter().all(|s| s.priority == "medium" && s.estimated_time == 20));
    }

    #[tokio::test]
    async fn test_pricing_levels() {
        let service = TutorService::new(
            Arc::new(AiService::disabled("m")),
            Arc::new(NoEvents),
            Arc::new(NoCoins),
            Arc::new(NoStates),
            SqlxSessionRepository::boxed(crate::db::create_test_pool().await.unwrap()),
        );
        let pricing = service.pricing();
        assert_eq!(pricing.len(), 3);
        assert_eq!(pricing["level_1"].cost_coins, 5);
        assert_eq!(pricing["level_3"].cost_coins, 15);
    }

    // Minimal repositories for tests that never touch storage
    struct NoEvents;
    struct NoCoins;
    struct NoStates;

    #[async_trait::async_trait]
    impl EventLogRepository for NoEvents {
        async fn create(&self, _: &NewEvent) -> anyhow::Result<EventLog> {
            anyhow::bail!("unused")
        }
        async fn list(&self, _: &EventFilter) -> anyhow::Result<Vec<EventLog>> {
            Ok(Vec::new())
        }
        async fn count(&self, _: &EventFilter) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    #[async_trait::async_trait]
    impl CoinTransactionRepository for NoCoins {
        async fn record(&self, _: &NewCoinTransaction) -> anyhow::Result<crate::models::CoinTransaction> {
            anyhow::bail!("unused")
        }
        async fn spend(&self, _: &NewCoinTransaction) -> anyhow::Result<Spend> {
            Ok(Spend::Insufficient { balance: 0 })
        }
        async fn balance(&self, _: i64) -> anyhow::Result<i64> {
            Ok(0)
        }
        async fn list(&self, _: &crate::models::CoinFilter) -> anyhow::Result<Vec<crate::models::CoinTransaction>> {
            Ok(Vec::new())
        }
        async fn sum_by_type(&self, _: i64, _: TransactionType) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    #[async_trait::async_trait]
    impl StudentStateRepository for NoStates {
        async fn create(&self, _: &crate::models::StudentState) -> anyhow::Result<crate::models::StudentState> {
            anyhow::bail!("unused")
        }
        async fn get(&self, _: i64, _: i64) -> anyhow::Result<Option<crate::models::StudentState>> {
            Ok(None)
        }
        async fn update(&self, _: &crate::models::StudentState) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_by_session(&self, _: i64) -> anyhow::Result<Vec<crate::models::StudentState>> {
            Ok(Vec::new())
        }
        async fn list_by_student(&self, _: i64) -> anyhow::Result<Vec<crate::models::StudentState>> {
            Ok(Vec::new())
        }
        async fn count_by_session(&self, _: i64) -> anyhow::Result<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_ask_fallback_logs_interaction() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        let response = service.ask(&student, ask_request("unknown")).await.unwrap();
        assert_eq!(response.response, "I'm here to help! Let's work through this together.");
        assert_eq!(response.confidence, 0.6);
        assert_eq!(response.suggestions.len(), 3);

        let events = SqlxEventLogRepository::new(pool.clone())
            .list(&EventFilter {
                event_type: Some(EventType::TutorInteraction),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, None);
        assert_eq!(events[0].node_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_ask_attaches_only_published_sessions() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        let instructor = seed_user(&pool, "instructor", UserRole::Instructor).await;
        let course = seed_course(&pool, instructor.id).await;
        let draft = seed_session(&pool, course.id).await;
        let mut published = seed_session(&pool, course.id).await;
        published.status = crate::models::SessionStatus::Published;
        SqlxSessionRepository::new(pool.clone()).update(&published).await.unwrap();

        for session_id in [draft.id, published.id] {
            let mut request = ask_request("quiz");
            request.context = Some(json!({ "session_id": session_id }));
            service.ask(&student, request).await.unwrap();
        }

        let events = SqlxEventLogRepository::new(pool.clone())
            .list(&EventFilter {
                event_type: Some(EventType::TutorInteraction),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut sessions: Vec<Option<i64>> = events.iter().map(|e| e.session_id).collect();
        sessions.sort();
        assert_eq!(sessions, vec![None, Some(published.id)]);
    }

    #[tokio::test]
    async fn test_ask_uses_model_answer() {
        let client = ScriptedClient::answering("Because ownership moved.\nSuggestion: borrow it");
        let (pool, service) = setup(AiService::with_client(client.clone(), "m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        let response = service.ask(&student, ask_request("concept")).await.unwrap();
        assert_eq!(response.response, "Because ownership moved.");
        assert_eq!(response.suggestions, vec!["borrow it"]);

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("analogies"));
        assert!(prompts[0].1.contains("Why does this move?"));
    }

    #[tokio::test]
    async fn test_ask_falls_back_on_error() {
        let (pool, service) = setup(AiService::with_client(ScriptedClient::failing("boom"), "m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        let response = service.ask(&student, ask_request("task")).await.unwrap();
        assert!(response.response.starts_with("Great question!"));
    }

    #[tokio::test]
    async fn test_hint_requires_coins() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        grant(&pool, student.id, 8).await;

        match service.hint(&student, hint_request(2)).await {
            Err(TutorError::ValidationError(msg)) => assert_eq!(msg, "Insufficient coins. Need 10, have 8"),
            other => panic!("unexpected result: {:?}", other.map(|h| h.hint)),
        }
    }

    #[tokio::test]
    async fn test_hint_charges_balance() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        grant(&pool, student.id, 20).await;

        let hint = service.hint(&student, hint_request(3)).await.unwrap();
        assert_eq!(hint.cost_coins, 15);
        assert_eq!(hint.hint, fallback_hint(3));

        let balance = SqlxCoinTransactionRepository::new(pool.clone())
            .balance(student.id)
            .await
            .unwrap();
        assert_eq!(balance, 5);

        let logged = SqlxEventLogRepository::new(pool.clone())
            .count(&EventFilter {
                event_type: Some(EventType::HintRequested),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn test_concurrent_hints_share_one_balance() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        grant(&pool, student.id, 5).await;

        let (a, b) = tokio::join!(
            service.hint(&student, hint_request(1)),
            service.hint(&student, hint_request(1))
        );
        let delivered = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(delivered, 1);

        let balance = SqlxCoinTransactionRepository::new(pool.clone())
            .balance(student.id)
            .await
            .unwrap();
        assert_eq!(balance, 0);
    }

    #[tokio::test]
    async fn test_hint_refunded_when_logging_fails() {
        let pool = setup_pool().await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        grant(&pool, student.id, 10).await;
        let service = TutorService::new(
            Arc::new(AiService::disabled("m")),
            Arc::new(NoEvents),
            SqlxCoinTransactionRepository::boxed(pool.clone()),
            SqlxStudentStateRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        );

        assert!(matches!(
            service.hint(&student, hint_request(1)).await,
            Err(TutorError::InternalError(_))
        ));

        let coins = SqlxCoinTransactionRepository::new(pool.clone());
        assert_eq!(coins.balance(student.id).await.unwrap(), 10);
        assert_eq!(coins.sum_by_type(student.id, TransactionType::Refunded).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_hint_level_bounds() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        assert!(matches!(
            service.hint(&student, hint_request(4)).await,
            Err(TutorError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_ai_hint_is_clipped() {
        let long = "x".repeat(300);
        let (pool, service) = setup(AiService::with_client(ScriptedClient::answering(&long), "m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        grant(&pool, student.id, 5).await;

        let hint = service.hint(&student, hint_request(1)).await.unwrap();
        assert_eq!(hint.hint.chars().count(), 203);
    }

    #[tokio::test]
    async fn test_code_feedback_fallback() {
        let (_pool, service) = setup(AiService::disabled("m")).await;
        let feedback = service
            .code_feedback(CodeFeedbackRequest {
                code: "fn main() {}".to_string(),
                language: "rust".to_string(),
                bubble_id: "a".to_string(),
                expected_output: None,
                test_cases: None,
            })
            .await;
        assert!(feedback.is_correct);
        assert_eq!(feedback.suggestions.len(), 3);
    }

    #[tokio::test]
    async fn test_learning_path_for_new_student() {
        let (pool, service) = setup(AiService::disabled("m")).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        let path = service.learning_path(&student).await.unwrap();
        assert_eq!(path.current_level, "beginner");
        assert_eq!(path.suggestions.len(), 2);
        assert_eq!(path.suggestions[0].title, "Review Fundamentals");
        assert!(path.areas_for_improvement.contains(&"Completing sessions".to_string()));
    }
}
