//! Session service
//!
//! Authoring of learning sessions: graph validation on write, bubble
//! content management and the role-scoped read side.

use crate::db::repositories::{
    BubbleNodeRepository, CourseRepository, SessionRepository, StudentStateRepository,
};
use crate::models::{
    BubbleContentInput, BubbleGraph, BubbleNode, Course, CreateSessionInput, ListParams,
    PagedResult, Session, SessionDetails, SessionFilter, SessionStatus, UpdateSessionInput, User,
    UserRole,
};
use crate::services::graph::{self, GraphValidation};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Error types for session service operations
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl SessionServiceError {
    fn session_not_found() -> Self {
        Self::NotFound("Session not found".to_string())
    }
}

/// Session service
pub struct SessionService {
    session_repo: Arc<dyn SessionRepository>,
    course_repo: Arc<dyn CourseRepository>,
    bubble_repo: Arc<dyn BubbleNodeRepository>,
    state_repo: Arc<dyn StudentStateRepository>,
}

impl SessionService {
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        course_repo: Arc<dyn CourseRepository>,
        bubble_repo: Arc<dyn BubbleNodeRepository>,
        state_repo: Arc<dyn StudentStateRepository>,
    ) -> Self {
        Self {
            session_repo,
            course_repo,
            bubble_repo,
            state_repo,
        }
    }

    /// Create a draft session with one placeholder bubble per graph node
    pub async fn create(&self, actor: &User, input: CreateSessionInput) -> Result<Session, SessionServiceError> {
        self.managed_course(actor, input.course_id).await?;

        validate_session_fields(&SessionFields {
            name: &input.name,
            description: input.description.as_deref(),
            start_time: input.start_time,
            end_time: input.end_time,
            max_attempts_per_bubble: input.max_attempts_per_bubble,
            coins_per_bubble: input.coins_per_bubble,
            time_limit_minutes: input.time_limit_minutes,
        })?;
        ensure_valid_graph(&input.graph_json)?;

        let session = self
            .session_repo
            .create(&input)
            .await
            .context("Failed to create session")?;
        self.create_missing_bubbles(&session).await?;

        tracing::info!(
            session_id = session.id,
            course_id = session.course_id,
            nodes = session.graph_json.nodes.len(),
            "Session created"
        );
        Ok(session)
    }

    /// List sessions visible to `actor`
    pub async fn list(
        &self,
        actor: &User,
        mut filter: SessionFilter,
        active_only: bool,
        params: &ListParams,
    ) -> Result<PagedResult<Session>, SessionServiceError> {
        match actor.role {
            UserRole::Admin => {}
            UserRole::Instructor => filter.instructor_id = Some(actor.id),
            UserRole::Student => filter.status = Some(SessionStatus::Published),
        }
        if active_only {
            filter.active_at = Some(Utc::now());
        }

        let (items, total) = self
            .session_repo
            .list(&filter, params)
            .await
            .context("Failed to list sessions")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// A session with its derived counters
    pub async fn get(&self, actor: &User, id: i64) -> Result<SessionDetails, SessionServiceError> {
        let session = self.readable_session(actor, id).await?;

        let total_bubbles = self
            .bubble_repo
            .count_by_session(session.id)
            .await
            .context("Failed to count bubbles")?;
        let states = self
            .state_repo
            .list_by_session(session.id)
            .await
            .context("Failed to load student states")?;

        let durations: Vec<f64> = states
            .iter()
            .filter(|s| s.is_completed)
            .filter_map(|s| s.completion_minutes())
            .collect();
        let avg_completion_time =
            (!durations.is_empty()).then(|| durations.iter().sum::<f64>() / durations.len() as f64);

        let now = Utc::now();
        Ok(SessionDetails {
            total_bubbles,
            student_count: states.len() as i64,
            avg_completion_time,
            is_active: session.is_active_at(now),
            is_upcoming: session.is_upcoming_at(now),
            is_past: session.is_past_at(now),
            session,
        })
    }

    pub async fn update(
        &self,
        actor: &User,
        id: i64,
        input: UpdateSessionInput,
    ) -> Result<Session, SessionServiceError> {
        let mut session = self.managed_session(actor, id).await?;

        if let Some(name) = input.name {
            session.name = name;
        }
        if input.description.is_some() {
            session.description = input.description;
        }
        if let Some(start) = input.start_time {
            session.start_time = start;
        }
        if let Some(end) = input.end_time {
            session.end_time = end;
        }
        if let Some(max) = input.max_attempts_per_bubble {
            session.max_attempts_per_bubble = max;
        }
        if let Some(coins) = input.coins_per_bubble {
            session.coins_per_bubble = coins;
        }
        if input.time_limit_minutes.is_some() {
            session.time_limit_minutes = input.time_limit_minutes;
        }
        if let Some(status) = input.status {
            if status == SessionStatus::Published && session.published_at.is_none() {
                session.published_at = Some(Utc::now());
            }
            session.status = status;
        }

        validate_session_fields(&SessionFields {
            name: &session.name,
            description: session.description.as_deref(),
            start_time: session.start_time,
            end_time: session.end_time,
            max_attempts_per_bubble: session.max_attempts_per_bubble,
            coins_per_bubble: session.coins_per_bubble,
            time_limit_minutes: session.time_limit_minutes,
        })?;

        let graph_changed = input.graph_json.is_some();
        if let Some(graph) = input.graph_json {
            ensure_valid_graph(&graph)?;
            session.graph_json = graph;
        }

        let session = self
            .session_repo
            .update(&session)
            .await
            .context("Failed to update session")?;
        if graph_changed {
            self.create_missing_bubbles(&session).await?;
        }
        Ok(session)
    }

    /// Delete a session nobody has started
    pub async fn delete(&self, actor: &User, id: i64) -> Result<(), SessionServiceError> {
        let session = self.managed_session(actor, id).await?;

        let started = self
            .state_repo
            .count_by_session(session.id)
            .await
            .context("Failed to count student states")?;
        if started > 0 {
            return Err(SessionServiceError::ValidationError(
                "Cannot delete session with student progress".to_string(),
            ));
        }

        self.bubble_repo
            .delete_by_session(session.id)
            .await
            .context("Failed to delete bubbles")?;
        self.session_repo
            .delete(session.id)
            .await
            .context("Failed to delete session")?;

        tracing::info!(session_id = id, deleted_by = actor.id, "Session deleted");
        Ok(())
    }

    /// Validate the graph stored on a session
    pub async fn validate_stored(&self, actor: &User, id: i64) -> Result<GraphValidation, SessionServiceError> {
        let session = self.readable_session(actor, id).await?;
        Ok(graph::validate_graph(&session.graph_json))
    }

    /// Create or replace the content of one bubble
    pub async fn upsert_bubble(
        &self,
        actor: &User,
        session_id: i64,
        input: BubbleContentInput,
    ) -> Result<BubbleNode, SessionServiceError> {
        let session = self.managed_session(actor, session_id).await?;

        if session.graph_json.node(&input.node_id).is_none() {
            return Err(SessionServiceError::ValidationError(format!(
                "Node '{}' not found in session graph",
                input.node_id
            )));
        }
        if input.title.trim().is_empty() || input.title.chars().count() > 200 {
            return Err(SessionServiceError::ValidationError(
                "Title must be between 1 and 200 characters".to_string(),
            ));
        }
        if input.coin_reward < 0 {
            return Err(SessionServiceError::ValidationError(
                "Coin reward cannot be negative".to_string(),
            ));
        }

        Ok(self
            .bubble_repo
            .upsert(session.id, &input)
            .await
            .context("Failed to save bubble")?)
    }

    pub async fn bubbles(&self, actor: &User, session_id: i64) -> Result<Vec<BubbleNode>, SessionServiceError> {
        let session = self.readable_session(actor, session_id).await?;
        Ok(self
            .bubble_repo
            .list_by_session(session.id)
            .await
            .context("Failed to list bubbles")?)
    }

    pub async fn bubble(
        &self,
        actor: &User,
        session_id: i64,
        node_id: &str,
    ) -> Result<BubbleNode, SessionServiceError> {
        let session = self.readable_session(actor, session_id).await?;
        self.bubble_repo
            .get(session.id, node_id)
            .await
            .context("Failed to get bubble")?
            .ok_or_else(|| SessionServiceError::NotFound("Bubble not found".to_string()))
    }

    /// Load a session `actor` may read.
    ///
    /// Students only see published sessions; instructors only the
    /// sessions of their own courses.
    pub async fn readable_session(&self, actor: &User, id: i64) -> Result<Session, SessionServiceError> {
        let session = self.load(id).await?;
        match actor.role {
            UserRole::Admin => Ok(session),
            UserRole::Student if session.is_published() => Ok(session),
            UserRole::Student => Err(SessionServiceError::session_not_found()),
            UserRole::Instructor => {
                self.managed_course(actor, session.course_id).await?;
                Ok(session)
            }
        }
    }

    /// Load a session `actor` may change
    async fn managed_session(&self, actor: &User, id: i64) -> Result<Session, SessionServiceError> {
        require_author(actor)?;
        let session = self.load(id).await?;
        self.managed_course(actor, session.course_id).await?;
        Ok(session)
    }

    async fn managed_course(&self, actor: &User, course_id: i64) -> Result<Course, SessionServiceError> {
        require_author(actor)?;
        let course = self
            .course_repo
            .get_by_id(course_id)
            .await
            .context("Failed to get course")?
            .ok_or_else(|| SessionServiceError::NotFound("Course not found".to_string()))?;
        if !course.can_be_managed_by(actor) {
            return Err(SessionServiceError::Forbidden(
                "Not authorized to access this course".to_string(),
            ));
        }
        Ok(course)
    }

    async fn load(&self, id: i64) -> Result<Session, SessionServiceError> {
        self.session_repo
            .get_by_id(id)
            .await
            .context("Failed to get session")?
            .ok_or_else(SessionServiceError::session_not_found)
    }

    /// Give every graph node without content a placeholder bubble
    async fn create_missing_bubbles(&self, session: &Session) -> Result<(), SessionServiceError> {
        let existing: HashSet<String> = self
            .bubble_repo
            .list_by_session(session.id)
            .await
            .context("Failed to list bubbles")?
            .into_iter()
            .map(|b| b.node_id)
            .collect();

        for node in &session.graph_json.nodes {
            if existing.contains(&node.id) {
                continue;
            }
            let placeholder = BubbleContentInput::placeholder(
                &node.id,
                node.node_type,
                &node.title,
                session.coins_per_bubble,
            );
            self.bubble_repo
                .create(session.id, &placeholder)
                .await
                .with_context(|| format!("Failed to create bubble {}", node.id))?;
        }
        Ok(())
    }
}

fn require_author(actor: &User) -> Result<(), SessionServiceError> {
    if !actor.is_instructor_or_admin() {
        return Err(SessionServiceError::Forbidden(
            "Only instructors and admins can perform this action".to_string(),
        ));
    }
    Ok(())
}

fn ensure_valid_graph(graph: &BubbleGraph) -> Result<(), SessionServiceError> {
    let validation = graph::validate_graph(graph);
    if !validation.is_valid {
        return Err(SessionServiceError::ValidationError(format!(
            "Invalid graph: {}",
            validation.errors.join("; ")
        )));
    }
    Ok(())
}

struct SessionFields<'a> {
    name: &'a str,
    description: Option<&'a str>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    max_attempts_per_bubble: i64,
    coins_per_bubble: i64,
    time_limit_minutes: Option<i64>,
}

fn validate_session_fields(fields: &SessionFields<'_>) -> Result<(), SessionServiceError> {
    let invalid = |msg: &str| Err(SessionServiceError::ValidationError(msg.to_string()));

    let name_len = fields.name.trim().chars().count();
    if name_len == 0 || name_len > 200 {
        return invalid("Name must be between 1 and 200 characters");
    }
    if fields.description.is_some_and(|d| d.chars().count() > 1000) {
        return invalid("Description must be at most 1000 characters");
    }
    if fields.end_time <= fields.start_time {
        return invalid("End time must be after start time");
    }
    if !(1..=10).contains(&fields.max_attempts_per_bubble) {
        return invalid("Max attempts per bubble must be between 1 and 10");
    }
    if fields.coins_per_bubble < 0 {
        return invalid("Coins per bubble cannot be negative");
    }
    if fields.time_limit_minutes.is_some_and(|t| t <= 0) {
        return invalid("Time limit must be positive");
    }
    Ok(())
}
