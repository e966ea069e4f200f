//! Analytics service
//!
//! Read-only reports over student states, learning events and the coin
//! ledger, scoped to what the caller may see.

use crate::db::repositories::{
    CoinTransactionRepository, CourseRepository, EventLogRepository, SessionRepository,
    StudentStateRepository,
};
use crate::models::{
    CoinFilter, CoinTransaction, Course, EventFilter, EventLog, EventType, Session, SessionFilter,
    SessionStatus, StudentState, TransactionType, User, UserRole,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Page size for event and coin listings without an explicit limit
pub const DEFAULT_REPORT_LIMIT: i64 = 100;
pub const MAX_REPORT_LIMIT: i64 = 1000;

/// Average failed attempts above which a bubble counts as challenging
const CHALLENGE_THRESHOLD: f64 = 1.5;

/// Error types for analytics operations
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChallengingBubble {
    pub node_id: String,
    pub avg_attempts: f64,
    pub students_struggled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub student_id: i64,
    pub completion_percentage: f64,
    pub total_coins: i64,
    pub is_completed: bool,
    pub time_spent_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionAnalytics {
    pub session_id: i64,
    pub session_name: String,
    pub total_students: usize,
    pub completed_students: usize,
    pub completion_rate: f64,
    pub avg_completion_time_minutes: f64,
    pub avg_coins_earned: f64,
    pub challenging_bubbles: Vec<ChallengingBubble>,
    pub student_states: Vec<StudentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentSession {
    pub session_id: i64,
    pub completion_percentage: f64,
    pub coins_earned: i64,
    pub is_completed: bool,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentProgress {
    pub student_id: i64,
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub completion_rate: f64,
    /// Sum of earned coins over the whole ledger
    pub total_coins: i64,
    pub total_time_spent_hours: f64,
    pub avg_session_time_minutes: f64,
    pub recent_sessions: Vec<RecentSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseAnalytics {
    pub course_id: i64,
    pub course_name: String,
    pub total_sessions: usize,
    pub total_unique_students: usize,
    pub total_enrollments: usize,
    pub total_completions: usize,
    pub avg_completion_rate: f64,
    pub sessions: Vec<SessionAnalytics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub events: Vec<EventLog>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoinReport {
    pub transactions: Vec<CoinTransaction>,
    pub total_transactions: usize,
    pub total_earned: i64,
    pub total_spent: i64,
    pub net_coins: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardOverview {
    pub total_courses: usize,
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub unique_students: usize,
    pub total_enrollments: usize,
    pub completed_sessions: usize,
    pub overall_completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub new_enrollments_7d: i64,
    pub completions_7d: i64,
    pub total_events_7d: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionPerformance {
    pub session_id: i64,
    pub session_name: String,
    pub total_students: usize,
    pub completion_rate: f64,
    pub avg_completion_time_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub overview: DashboardOverview,
    pub recent_activity: RecentActivity,
    pub top_sessions: Vec<SessionPerformance>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a percentage, 0 for an empty whole
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Bubbles whose average failure count exceeds the threshold, worst first
pub fn challenging_bubbles(states: &[StudentState]) -> Vec<ChallengingBubble> {
    let mut failures: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for state in states {
        for (node, attempts) in &state.failed_attempts {
            failures.entry(node.as_str()).or_default().push(*attempts);
        }
    }

    let mut bubbles: Vec<ChallengingBubble> = failures
        .into_iter()
        .map(|(node, attempts)| ChallengingBubble {
            node_id: node.to_string(),
            avg_attempts: round2(mean(attempts.iter().map(|&a| a as f64))),
            students_struggled: attempts.len(),
        })
        .filter(|b| b.avg_attempts > CHALLENGE_THRESHOLD)
        .collect();

    bubbles.sort_by(|a, b| b.avg_attempts.total_cmp(&a.avg_attempts));
    bubbles.truncate(5);
    bubbles
}

fn summarize_session(session: &Session, states: &[StudentState]) -> SessionAnalytics {
    let completed: Vec<&StudentState> = states.iter().filter(|s| s.is_completed).collect();

    SessionAnalytics {
        session_id: session.id,
        session_name: session.name.clone(),
        total_students: states.len(),
        completed_students: completed.len(),
        completion_rate: percent(completed.len(), states.len()),
        avg_completion_time_minutes: round2(
            mean(completed.iter().map(|s| s.total_time_spent as f64)) / 60.0,
        ),
        avg_coins_earned: round2(mean(completed.iter().map(|s| s.total_coins as f64))),
        challenging_bubbles: challenging_bubbles(states),
        student_states: states
            .iter()
            .map(|s| StudentSummary {
                student_id: s.student_id,
                completion_percentage: s.completion_percentage,
                total_coins: s.total_coins,
                is_completed: s.is_completed,
                time_spent_minutes: round2(s.total_time_spent as f64 / 60.0),
            })
            .collect(),
    }
}

/// Resolve an optional limit against the report bounds
fn report_limit(limit: Option<i64>) -> Result<i64, AnalyticsError> {
    match limit {
        None => Ok(DEFAULT_REPORT_LIMIT),
        Some(l) if (1..=MAX_REPORT_LIMIT).contains(&l) => Ok(l),
        Some(_) => Err(AnalyticsError::ValidationError(format!(
            "limit must be between 1 and {}",
            MAX_REPORT_LIMIT
        ))),
    }
}

/// Analytics service
pub struct AnalyticsService {
    session_repo: Arc<dyn SessionRepository>,
    course_repo: Arc<dyn CourseRepository>,
    state_repo: Arc<dyn StudentStateRepository>,
    event_repo: Arc<dyn EventLogRepository>,
    coin_repo: Arc<dyn CoinTransactionRepository>,
}

impl AnalyticsService {
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        course_repo: Arc<dyn CourseRepository>,
        state_repo: Arc<dyn StudentStateRepository>,
        event_repo: Arc<dyn EventLogRepository>,
        coin_repo: Arc<dyn CoinTransactionRepository>,
    ) -> Self {
        Self {
            session_repo,
            course_repo,
            state_repo,
            event_repo,
            coin_repo,
        }
    }

    pub async fn session_analytics(&self, actor: &User, session_id: i64) -> Result<SessionAnalytics, AnalyticsError> {
        require_staff(actor)?;
        let session = self
            .session_repo
            .get_by_id(session_id)
            .await
            .context("Failed to get session")?
            .ok_or_else(|| AnalyticsError::NotFound("Session not found".to_string()))?;
        let course = self.load_course(session.course_id).await?;
        if !course.can_be_managed_by(actor) {
            return Err(AnalyticsError::Forbidden(
                "Not authorized to access this session".to_string(),
            ));
        }

        let states = self.session_states(session.id).await?;
        Ok(summarize_session(&session, &states))
    }

    /// Overall progress of one student
    pub async fn student_progress(&self, actor: &User, student_id: i64) -> Result<StudentProgress, AnalyticsError> {
        if actor.is_student() && actor.id != student_id {
            return Err(AnalyticsError::Forbidden(
                "Students can only view their own analytics".to_string(),
            ));
        }

        let states = self
            .state_repo
            .list_by_student(student_id)
            .await
            .context("Failed to load student states")?;
        let total_coins = self
            .coin_repo
            .sum_by_type(student_id, TransactionType::Earned)
            .await
            .context("Failed to sum earned coins")?;

        let total_sessions = states.len();
        let completed_sessions = states.iter().filter(|s| s.is_completed).count();
        let total_time: i64 = states.iter().map(|s| s.total_time_spent).sum();
        let avg_session_time_minutes = if total_sessions == 0 {
            0.0
        } else {
            round2(total_time as f64 / total_sessions as f64 / 60.0)
        };

        Ok(StudentProgress {
            student_id,
            total_sessions,
            completed_sessions,
            completion_rate: percent(completed_sessions, total_sessions),
            total_coins,
            total_time_spent_hours: round2(total_time as f64 / 3600.0),
            avg_session_time_minutes,
            recent_sessions: states
                .iter()
                .take(5)
                .map(|s| RecentSession {
                    session_id: s.session_id,
                    completion_percentage: s.completion_percentage,
                    coins_earned: s.total_coins,
                    is_completed: s.is_completed,
                    last_activity: s.last_activity_at,
                })
                .collect(),
        })
    }

    pub async fn course_analytics(&self, actor: &User, course_id: i64) -> Result<CourseAnalytics, AnalyticsError> {
        require_staff(actor)?;
        let course = self.load_course(course_id).await?;
        if !course.can_be_managed_by(actor) {
            return Err(AnalyticsError::Forbidden(
                "Not authorized to access this course".to_string(),
            ));
        }

        let sessions = self
            .session_repo
            .list_all(&SessionFilter {
                course_id: Some(course.id),
                ..Default::default()
            })
            .await
            .context("Failed to list course sessions")?;

        let mut students = HashSet::new();
        let mut reports = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let states = self.session_states(session.id).await?;
            students.extend(states.iter().map(|s| s.student_id));
            reports.push(summarize_session(session, &states));
        }

        let total_enrollments: usize = reports.iter().map(|r| r.total_students).sum();
        let total_completions: usize = reports.iter().map(|r| r.completed_students).sum();

        Ok(CourseAnalytics {
            course_id: course.id,
            course_name: course.name,
            total_sessions: sessions.len(),
            total_unique_students: students.len(),
            total_enrollments,
            total_completions,
            avg_completion_rate: percent(total_completions, total_enrollments),
            sessions: reports,
        })
    }

    /// Learning events, newest first
    pub async fn events(
        &self,
        actor: &User,
        mut filter: EventFilter,
        limit: Option<i64>,
    ) -> Result<EventReport, AnalyticsError> {
        require_staff(actor)?;
        filter.limit = report_limit(limit)?;
        if actor.role == UserRole::Instructor {
            filter.instructor_id = Some(actor.id);
        }

        let events = self
            .event_repo
            .list(&filter)
            .await
            .context("Failed to list events")?;
        Ok(EventReport {
            total: events.len(),
            events,
        })
    }

    /// Coin ledger entries with totals over the returned entries
    pub async fn coins(
        &self,
        actor: &User,
        mut filter: CoinFilter,
        limit: Option<i64>,
    ) -> Result<CoinReport, AnalyticsError> {
        if actor.is_student() {
            filter.student_id = Some(actor.id);
        }
        filter.limit = report_limit(limit)?;

        let transactions = self
            .coin_repo
            .list(&filter)
            .await
            .context("Failed to list coin transactions")?;

        let total_of = |t: TransactionType| -> i64 {
            transactions
                .iter()
                .filter(|tx| tx.transaction_type == t)
                .map(|tx| tx.amount)
                .sum()
        };
        let total_earned = total_of(TransactionType::Earned);
        let total_spent = total_of(TransactionType::Spent);

        Ok(CoinReport {
            total_transactions: transactions.len(),
            total_earned,
            total_spent,
            net_coins: total_earned - total_spent,
            transactions,
        })
    }

    /// Overview for instructors (their courses) and admins (everything)
    pub async fn dashboard(&self, actor: &User) -> Result<Dashboard, AnalyticsError> {
        require_staff(actor)?;
        let owner = (actor.role == UserRole::Instructor).then_some(actor.id);

        let courses = self
            .course_repo
            .list_owned(owner)
            .await
            .context("Failed to list courses")?;
        let sessions = self
            .session_repo
            .list_all(&SessionFilter {
                instructor_id: owner,
                ..Default::default()
            })
            .await
            .context("Failed to list sessions")?;

        let mut all_states = Vec::new();
        let mut performance = Vec::new();
        for session in &sessions {
            let states = self.session_states(session.id).await?;
            if !states.is_empty() {
                let summary = summarize_session(session, &states);
                performance.push(SessionPerformance {
                    session_id: session.id,
                    session_name: session.name.clone(),
                    total_students: summary.total_students,
                    completion_rate: summary.completion_rate,
                    avg_completion_time_minutes: summary.avg_completion_time_minutes,
                });
            }
            all_states.extend(states);
        }
        performance.sort_by(|a, b| b.completion_rate.total_cmp(&a.completion_rate));
        performance.truncate(5);

        let completed = all_states.iter().filter(|s| s.is_completed).count();
        let overview = DashboardOverview {
            total_courses: courses.len(),
            total_sessions: sessions.len(),
            active_sessions: sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Published)
                .count(),
            unique_students: all_states.iter().map(|s| s.student_id).collect::<HashSet<_>>().len(),
            total_enrollments: all_states.len(),
            completed_sessions: completed,
            overall_completion_rate: percent(completed, all_states.len()),
        };

        let week = EventFilter {
            start_date: Some(Utc::now() - Duration::days(7)),
            instructor_id: owner,
            ..Default::default()
        };
        let count = |event_type: Option<EventType>| {
            let filter = EventFilter {
                event_type,
                ..week.clone()
            };
            async move { self.event_repo.count(&filter).await }
        };
        let recent_activity = RecentActivity {
            new_enrollments_7d: count(Some(EventType::SessionStart))
                .await
                .context("Failed to count session starts")?,
            completions_7d: count(Some(EventType::SessionComplete))
                .await
                .context("Failed to count completions")?,
            total_events_7d: count(None).await.context("Failed to count events")?,
        };

        Ok(Dashboard {
            overview,
            recent_activity,
            top_sessions: performance,
        })
    }

    async fn session_states(&self, session_id: i64) -> Result<Vec<StudentState>, AnalyticsError> {
        Ok(self
            .state_repo
            .list_by_session(session_id)
            .await
            .context("Failed to load student states")?)
    }

    async fn load_course(&self, id: i64) -> Result<Course, AnalyticsError> {
        self.course_repo
            .get_by_id(id)
            .await
            .context("Failed to get course")?
            .ok_or_else(|| AnalyticsError::NotFound("Course not found".to_string()))
    }
}

fn require_staff(actor: &User) -> Result<(), AnalyticsError> {
    if !actor.is_instructor_or_admin() {
        return Err(AnalyticsError::Forbidden(
            "Only instructors and admins can access analytics".to_string(),
        ));
    }
    Ok(())
}
