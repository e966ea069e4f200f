//! Progress tracking
//!
//! Per-student learning analytics derived from the event log, session
//! states and coin ledger: performance metrics, behaviour patterns, skill
//! levels, bubble mastery, weekly trends, detected difficulties, goals and
//! badges. Everything here is read-only.
//!
//! Skill domains come from the bubble type recorded on each attempt event.
//! Debugging counts the attempts made on a bubble after failing it.

use crate::db::repositories::{
    CoinTransactionRepository, EventLogRepository, StudentStateRepository, UserRepository,
};
use crate::models::{
    BubbleType, CoinFilter, CoinTransaction, EventFilter, EventLog, EventType, StudentState,
    TransactionType, User,
};
use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_PERIOD_DAYS: i64 = 30;
pub const MAX_PERIOD_DAYS: i64 = 365;

/// Window scanned for difficulties
const DIFFICULTY_WINDOW_DAYS: i64 = 14;
/// Window scanned for badges
const BADGE_WINDOW_DAYS: i64 = 90;
/// Most events or ledger entries loaded for one report
const ACTIVITY_LIMIT: i64 = 5000;
/// Most recent topic attempts weighed for a difficulty recommendation
const TOPIC_EVENT_LIMIT: usize = 50;
const MAX_RECOMMENDATIONS: usize = 5;
/// Attempts needed in a domain before its mastery badge can be earned
const MASTERY_MIN_ATTEMPTS: usize = 10;

/// Error types for progress tracking
#[derive(Debug, thiserror::Error)]
pub enum ProgressTrackingError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

// ============================================================================
// Catalogues
// ============================================================================

/// Area of competence a bubble attempt exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillDomain {
    ProblemSolving,
    ConceptualUnderstanding,
    Implementation,
    Debugging,
}

impl SkillDomain {
    pub const ALL: [SkillDomain; 4] = [
        SkillDomain::ProblemSolving,
        SkillDomain::ConceptualUnderstanding,
        SkillDomain::Implementation,
        SkillDomain::Debugging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkillDomain::ProblemSolving => "problem_solving",
            SkillDomain::ConceptualUnderstanding => "conceptual_understanding",
            SkillDomain::Implementation => "implementation",
            SkillDomain::Debugging => "debugging",
        }
    }

    /// Title-cased name
    pub fn label(&self) -> &'static str {
        match self {
            SkillDomain::ProblemSolving => "Problem Solving",
            SkillDomain::ConceptualUnderstanding => "Conceptual Understanding",
            SkillDomain::Implementation => "Implementation",
            SkillDomain::Debugging => "Debugging",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SkillDomain::ProblemSolving => "Ability to analyze and solve problems (quiz bubbles)",
            SkillDomain::ConceptualUnderstanding => {
                "Grasp of underlying concepts (concept, demo and summary bubbles)"
            }
            SkillDomain::Implementation => "Translating ideas into working code (task bubbles)",
            SkillDomain::Debugging => "Recovering after a failed attempt on the same bubble",
        }
    }

    fn covers(&self, bubble_type: BubbleType) -> bool {
        match self {
            SkillDomain::ProblemSolving => bubble_type == BubbleType::Quiz,
            SkillDomain::ConceptualUnderstanding => matches!(
                bubble_type,
                BubbleType::Concept | BubbleType::Demo | BubbleType::Summary
            ),
            SkillDomain::Implementation => bubble_type == BubbleType::Task,
            SkillDomain::Debugging => false,
        }
    }
}

impl FromStr for SkillDomain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SkillDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Unknown skill domain: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Kinesthetic,
    ReadingWriting,
}

impl LearningStyle {
    pub const ALL: [LearningStyle; 4] = [
        LearningStyle::Visual,
        LearningStyle::Auditory,
        LearningStyle::Kinesthetic,
        LearningStyle::ReadingWriting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "visual",
            LearningStyle::Auditory => "auditory",
            LearningStyle::Kinesthetic => "kinesthetic",
            LearningStyle::ReadingWriting => "reading_writing",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "Learns best through visual aids and diagrams",
            LearningStyle::Auditory => "Learns best through listening and discussion",
            LearningStyle::Kinesthetic => "Learns best through hands-on practice",
            LearningStyle::ReadingWriting => "Learns best through reading and writing",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogueEntry {
    pub name: &'static str,
    pub description: &'static str,
}

pub fn skill_domain_catalogue() -> Vec<CatalogueEntry> {
    SkillDomain::ALL
        .iter()
        .map(|d| CatalogueEntry {
            name: d.as_str(),
            description: d.description(),
        })
        .collect()
}

pub fn learning_style_catalogue() -> Vec<CatalogueEntry> {
    LearningStyle::ALL
        .iter()
        .map(|s| CatalogueEntry {
            name: s.as_str(),
            description: s.description(),
        })
        .collect()
}

// ============================================================================
// Report types
// ============================================================================

/// Scores in 0..=1
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub overall_score: f64,
    pub accuracy: f64,
    pub speed_score: f64,
    pub consistency: f64,
    pub improvement_rate: f64,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningPattern {
    pub pattern_type: PatternType,
    pub description: String,
    pub confidence: f64,
    pub frequency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Temporal,
    ShortSessions,
    LongSessions,
    HelpSeeking,
    Independence,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillAssessment {
    pub skill_domain: SkillDomain,
    pub current_level: f64,
    pub progress_rate: f64,
    pub attempts: usize,
    pub strengths: Vec<&'static str>,
    pub weaknesses: Vec<&'static str>,
    pub next_milestones: Vec<&'static str>,
    pub confidence_score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStyleProfile {
    pub visual: f64,
    pub auditory: f64,
    pub kinesthetic: f64,
    pub reading_writing: f64,
    pub dominant_style: LearningStyle,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryStatus {
    Beginning,
    Developing,
    Proficient,
    Mastered,
}

/// Mastery of one bubble, keyed by node id
#[derive(Debug, Clone, Serialize)]
pub struct MasteryLevel {
    pub topic: String,
    pub level: MasteryStatus,
    pub score: f64,
    pub consistency: f64,
    pub last_practiced: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressTrend {
    pub metric: &'static str,
    pub direction: TrendDirection,
    pub magnitude: f64,
    pub period: &'static str,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressAnalysis {
    pub student_id: i64,
    pub analysis_period_days: i64,
    pub performance_metrics: PerformanceMetrics,
    pub learning_patterns: Vec<LearningPattern>,
    pub skill_assessments: Vec<SkillAssessment>,
    pub learning_style_profile: LearningStyleProfile,
    pub mastery_levels: Vec<MasteryLevel>,
    pub progress_trends: Vec<ProgressTrend>,
    pub recommendations: Vec<String>,
    /// Earned plus bonus coins in the period
    pub coins_earned: i64,
    pub coins_spent: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyKind {
    Confusion,
    Frustration,
    Disengagement,
    Plateau,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningDifficulty {
    #[serde(rename = "type")]
    pub kind: DifficultyKind,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendations: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DifficultyReport {
    pub student_id: i64,
    pub difficulties_detected: usize,
    pub difficulties: Vec<LearningDifficulty>,
    pub analysis_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyChange {
    Increase,
    Decrease,
    Maintain,
}

#[derive(Debug, Clone, Serialize)]
pub struct DifficultyRecommendation {
    pub topic: String,
    /// "easy", "appropriate" or "challenging"
    pub current_level: &'static str,
    pub recommended_level: DifficultyChange,
    pub confidence: f64,
    pub reasoning: &'static str,
    pub expected_improvement: f64,
    pub success_rate: f64,
    pub hint_usage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningGoal {
    pub title: String,
    pub description: String,
    pub target_metric: &'static str,
    pub current_value: f64,
    pub target_value: f64,
    pub deadline: DateTime<Utc>,
    pub priority: Priority,
    /// current_value / target_value, clamped to 0..=1
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeCategory {
    Consistency,
    Achievement,
    Mastery,
}

#[derive(Debug, Clone, Serialize)]
pub struct AchievementBadge {
    pub name: String,
    pub description: String,
    pub category: BadgeCategory,
    pub earned_date: DateTime<Utc>,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub description: String,
    pub importance: &'static str,
    pub recommendations: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightReport {
    pub student_id: i64,
    pub total_insights: usize,
    pub insights: Vec<Insight>,
    pub analysis_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub overall_score: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub engagement: f64,
    pub improvement_rate: f64,
    pub coin_balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillBreakdown {
    pub skill: SkillDomain,
    pub level: f64,
    pub progress_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StyleSummary {
    pub dominant: LearningStyle,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressDashboard {
    pub student_id: i64,
    pub summary: DashboardSummary,
    pub trends: Vec<ProgressTrend>,
    pub active_goals: Vec<LearningGoal>,
    pub recent_badges: Vec<AchievementBadge>,
    pub skill_breakdown: Vec<SkillBreakdown>,
    pub learning_style: StyleSummary,
    pub recommendations: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

// ============================================================================
// Service
// ============================================================================

/// A student's activity, events oldest first
#[derive(Debug, Clone, Default)]
pub struct Activity {
    pub events: Vec<EventLog>,
    pub states: Vec<StudentState>,
    pub coins: Vec<CoinTransaction>,
}

impl Activity {
    /// The part of this activity at or after `since`
    fn since(&self, since: DateTime<Utc>) -> Activity {
        Activity {
            events: self.events.iter().filter(|e| e.timestamp >= since).cloned().collect(),
            states: self.states.iter().filter(|s| s.started_at >= since).cloned().collect(),
            coins: self.coins.iter().filter(|c| c.created_at >= since).cloned().collect(),
        }
    }
}

pub struct ProgressTrackingService {
    user_repo: Arc<dyn UserRepository>,
    state_repo: Arc<dyn StudentStateRepository>,
    event_repo: Arc<dyn EventLogRepository>,
    coin_repo: Arc<dyn CoinTransactionRepository>,
}

impl ProgressTrackingService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        state_repo: Arc<dyn StudentStateRepository>,
        event_repo: Arc<dyn EventLogRepository>,
        coin_repo: Arc<dyn CoinTransactionRepository>,
    ) -> Self {
        Self {
            user_repo,
            state_repo,
            event_repo,
            coin_repo,
        }
    }

    /// Students read their own reports; admins read anyone's
    async fn authorize(&self, actor: &User, student_id: i64) -> Result<(), ProgressTrackingError> {
        if !actor.is_admin() && actor.id != student_id {
            return Err(ProgressTrackingError::Forbidden("Access denied".to_string()));
        }
        self.user_repo
            .get_by_id(student_id)
            .await
            .context("Failed to get student")?
            .ok_or_else(|| ProgressTrackingError::NotFound("Student not found".to_string()))?;
        Ok(())
    }

    /// Load the last `days` of a student's activity
    async fn activity(&self, student_id: i64, days: i64) -> Result<Activity, ProgressTrackingError> {
        let since = Utc::now() - Duration::days(days);
        let events = EventFilter {
            student_id: Some(student_id),
            start_date: Some(since),
            limit: ACTIVITY_LIMIT,
            ..Default::default()
        };
        let coins = CoinFilter {
            student_id: Some(student_id),
            limit: ACTIVITY_LIMIT,
            ..Default::default()
        };

        let (mut events, mut states, mut coins) = futures::try_join!(
            self.event_repo.list(&events),
            self.state_repo.list_by_student(student_id),
            self.coin_repo.list(&coins),
        )
        .context("Failed to load student activity")?;

        events.reverse();
        states.retain(|s| s.started_at >= since);
        coins.retain(|c| c.created_at >= since);
        Ok(Activity {
            events,
            states,
            coins,
        })
    }

    pub async fn analysis(
        &self,
        actor: &User,
        student_id: i64,
        days: Option<i64>,
    ) -> Result<ProgressAnalysis, ProgressTrackingError> {
        let days = period_days(days)?;
        self.authorize(actor, student_id).await?;
        let activity = self.activity(student_id, days).await?;
        Ok(analyze(student_id, days, &activity, Utc::now()))
    }

    /// Every skill, or just `domain` when given
    pub async fn skills(
        &self,
        actor: &User,
        student_id: i64,
        domain: Option<&str>,
    ) -> Result<Vec<SkillAssessment>, ProgressTrackingError> {
        let domains = match domain {
            Some(name) => vec![SkillDomain::from_str(name)
                .map_err(|e| ProgressTrackingError::ValidationError(e.to_string()))?],
            None => SkillDomain::ALL.to_vec(),
        };
        self.authorize(actor, student_id).await?;

        let activity = self.activity(student_id, DEFAULT_PERIOD_DAYS).await?;
        let events: Vec<&EventLog> = activity.events.iter().collect();
        let now = Utc::now();
        Ok(domains
            .into_iter()
            .map(|d| assess_skill(d, &skill_events(&events, d), now))
            .collect())
    }

    pub async fn difficulties(
        &self,
        actor: &User,
        student_id: i64,
    ) -> Result<DifficultyReport, ProgressTrackingError> {
        self.authorize(actor, student_id).await?;
        let activity = self.activity(student_id, DIFFICULTY_WINDOW_DAYS).await?;
        let now = Utc::now();
        let difficulties = detect_difficulties(&activity.events, now);

        Ok(DifficultyReport {
            student_id,
            difficulties_detected: difficulties.len(),
            difficulties,
            analysis_date: now,
        })
    }

    /// Recommend a difficulty change for bubbles whose node id contains `topic`
    pub async fn difficulty_recommendation(
        &self,
        actor: &User,
        student_id: i64,
        topic: &str,
    ) -> Result<DifficultyRecommendation, ProgressTrackingError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ProgressTrackingError::ValidationError(
                "topic is required".to_string(),
            ));
        }
        self.authorize(actor, student_id).await?;

        let activity = self.activity(student_id, MAX_PERIOD_DAYS).await?;
        let mut topic_events: Vec<&EventLog> = activity
            .events
            .iter()
            .rev()
            .filter(|e| e.node_id.as_deref().is_some_and(|n| n.contains(topic)))
            .take(TOPIC_EVENT_LIMIT)
            .collect();
        topic_events.reverse();

        Ok(recommend_difficulty(topic, &topic_events))
    }

    pub async fn goals(&self, actor: &User, student_id: i64) -> Result<Vec<LearningGoal>, ProgressTrackingError> {
        let analysis = self.analysis(actor, student_id, None).await?;
        Ok(learning_goals(&analysis, Utc::now()))
    }

    pub async fn badges(
        &self,
        actor: &User,
        student_id: i64,
    ) -> Result<Vec<AchievementBadge>, ProgressTrackingError> {
        self.authorize(actor, student_id).await?;
        let activity = self.activity(student_id, BADGE_WINDOW_DAYS).await?;
        Ok(achievement_badges(&activity.events, Utc::now()))
    }

    pub async fn insights(&self, actor: &User, student_id: i64) -> Result<InsightReport, ProgressTrackingError> {
        let analysis = self.analysis(actor, student_id, None).await?;
        let insights = learning_insights(&analysis);
        Ok(InsightReport {
            student_id,
            total_insights: insights.len(),
            insights,
            analysis_date: analysis.generated_at,
        })
    }

    pub async fn dashboard(
        &self,
        actor: &User,
        student_id: i64,
    ) -> Result<ProgressDashboard, ProgressTrackingError> {
        self.authorize(actor, student_id).await?;

        let now = Utc::now();
        let long = self.activity(student_id, BADGE_WINDOW_DAYS).await?;
        let recent = long.since(now - Duration::days(DEFAULT_PERIOD_DAYS));
        let coin_balance = self
            .coin_repo
            .balance(student_id)
            .await
            .context("Failed to read coin balance")?;

        let analysis = analyze(student_id, DEFAULT_PERIOD_DAYS, &recent, now);
        let goals = learning_goals(&analysis, now);
        let badges = achievement_badges(&long.events, now);
        let recent_badges = badges[badges.len().saturating_sub(3)..].to_vec();
        let m = &analysis.performance_metrics;

        Ok(ProgressDashboard {
            student_id,
            summary: DashboardSummary {
                overall_score: m.overall_score,
                accuracy: m.accuracy,
                consistency: m.consistency,
                engagement: m.engagement_score,
                improvement_rate: m.improvement_rate,
                coin_balance,
            },
            trends: analysis.progress_trends.clone(),
            active_goals: goals,
            recent_badges,
            skill_breakdown: analysis
                .skill_assessments
                .iter()
                .map(|s| SkillBreakdown {
                    skill: s.skill_domain,
                    level: s.current_level,
                    progress_rate: s.progress_rate,
                })
                .collect(),
            learning_style: StyleSummary {
                dominant: analysis.learning_style_profile.dominant_style,
                confidence: analysis.learning_style_profile.confidence,
            },
            recommendations: analysis.recommendations.iter().take(3).cloned().collect(),
            last_updated: now,
        })
    }
}

fn period_days(days: Option<i64>) -> Result<i64, ProgressTrackingError> {
    let days = days.unwrap_or(DEFAULT_PERIOD_DAYS);
    if !(1..=MAX_PERIOD_DAYS).contains(&days) {
        return Err(ProgressTrackingError::ValidationError(format!(
            "days must be between 1 and {}",
            MAX_PERIOD_DAYS
        )));
    }
    Ok(days)
}

// ============================================================================
// Computation
// ============================================================================

fn is_attempt(e: &EventLog) -> bool {
    matches!(e.event_type, EventType::BubbleSuccess | EventType::BubbleFail)
}

fn count(events: &[&EventLog], event_type: EventType) -> usize {
    events.iter().filter(|e| e.event_type == event_type).count()
}

fn attempts(events: &[&EventLog]) -> usize {
    events.iter().filter(|e| is_attempt(e)).count()
}

/// Successes over attempts; zero without attempts
fn success_rate(events: &[&EventLog]) -> f64 {
    count(events, EventType::BubbleSuccess) as f64 / attempts(events).max(1) as f64
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Success rate per calendar day that had attempts
fn daily_scores(events: &[&EventLog]) -> Vec<f64> {
    let mut days: BTreeMap<NaiveDate, Vec<&EventLog>> = BTreeMap::new();
    for e in events.iter().filter(|e| is_attempt(e)) {
        days.entry(e.timestamp.date_naive()).or_default().push(e);
    }
    days.values().map(|d| success_rate(d)).collect()
}

/// Success rate per ISO week that had attempts, oldest first
fn weekly_scores(events: &[&EventLog]) -> Vec<f64> {
    let mut weeks: BTreeMap<(i32, u32), Vec<&EventLog>> = BTreeMap::new();
    for e in events.iter().filter(|e| is_attempt(e)) {
        let week = e.timestamp.iso_week();
        weeks.entry((week.year(), week.week())).or_default().push(e);
    }
    weeks.values().map(|w| success_rate(w)).collect()
}

fn bubble_type(e: &EventLog) -> Option<BubbleType> {
    e.payload.as_ref()?.get("node_type")?.as_str()?.parse().ok()
}

/// Attempt events that exercise `domain`, in input order
fn skill_events<'a>(events: &[&'a EventLog], domain: SkillDomain) -> Vec<&'a EventLog> {
    if domain == SkillDomain::Debugging {
        let mut failed: HashSet<(Option<i64>, &str)> = HashSet::new();
        let mut out = Vec::new();
        for &e in events.iter().filter(|e| is_attempt(e)) {
            let Some(node) = e.node_id.as_deref() else {
                continue;
            };
            let key = (e.session_id, node);
            if failed.contains(&key) {
                out.push(e);
            }
            if e.event_type == EventType::BubbleFail {
                failed.insert(key);
            }
        }
        return out;
    }

    events
        .iter()
        .copied()
        .filter(|e| is_attempt(e) && bubble_type(e).is_some_and(|t| domain.covers(t)))
        .collect()
}

fn performance_metrics(events: &[&EventLog], states: &[StudentState], period_days: i64) -> PerformanceMetrics {
    if events.is_empty() {
        return PerformanceMetrics::default();
    }

    let accuracy = success_rate(events);

    let speed_score = if states.is_empty() {
        0.0
    } else {
        let hours = states.iter().map(|s| s.total_time_spent as f64).sum::<f64>() / 3600.0;
        let per_hour = count(events, EventType::BubbleSuccess) as f64 / hours.max(0.1);
        (per_hour / 10.0).min(1.0)
    };

    let daily = daily_scores(events);
    let consistency = if daily.len() > 1 {
        (1.0 - std_dev(&daily)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let improvement_rate = improvement_rate(events);
    let engagement_score = engagement_score(states, period_days);

    PerformanceMetrics {
        overall_score: accuracy * 0.3
            + speed_score * 0.2
            + consistency * 0.2
            + improvement_rate * 0.15
            + engagement_score * 0.15,
        accuracy,
        speed_score,
        consistency,
        improvement_rate,
        engagement_score,
    }
}

/// 0.5 means flat; earliest quarter of attempts against the latest quarter
fn improvement_rate(events: &[&EventLog]) -> f64 {
    let tries: Vec<&EventLog> = events.iter().copied().filter(|e| is_attempt(e)).collect();
    if tries.len() < 10 {
        return 0.0;
    }
    let quarter = tries.len() / 4;
    let early = success_rate(&tries[..quarter]);
    let recent = success_rate(&tries[tries.len() - quarter..]);
    (recent - early + 0.5).clamp(0.0, 1.0)
}

fn engagement_score(states: &[StudentState], period_days: i64) -> f64 {
    if states.is_empty() {
        return 0.0;
    }
    let avg_minutes = mean(states.iter().map(|s| s.total_time_spent as f64 / 60.0));
    let per_day = states.len() as f64 / period_days.max(1) as f64;

    // 30 minutes per session and one session per week score fully
    let length_score = (avg_minutes / 30.0).min(1.0);
    let frequency_score = (per_day * 7.0).min(1.0);
    (length_score + frequency_score) / 2.0
}

fn learning_patterns(events: &[&EventLog], states: &[StudentState]) -> Vec<LearningPattern> {
    let mut patterns = Vec::new();

    let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
    for e in events {
        *hours.entry(e.timestamp.hour()).or_default() += 1;
    }
    if !hours.is_empty() {
        let mut ranked: Vec<(u32, usize)> = hours.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(3);
        let peak = ranked.iter().map(|(h, _)| h.to_string()).collect::<Vec<_>>().join(", ");
        let covered: usize = ranked.iter().map(|(_, n)| n).sum();
        patterns.push(LearningPattern {
            pattern_type: PatternType::Temporal,
            description: format!("Most active during hours (UTC): {}", peak),
            confidence: 0.8,
            frequency: covered as f64 / events.len() as f64,
        });
    }

    if !states.is_empty() {
        let avg_minutes = mean(states.iter().map(|s| s.total_time_spent as f64 / 60.0));
        if avg_minutes < 15.0 {
            patterns.push(LearningPattern {
                pattern_type: PatternType::ShortSessions,
                description: "Prefers short, focused learning sessions".to_string(),
                confidence: 0.7,
                frequency: 0.8,
            });
        } else if avg_minutes > 45.0 {
            patterns.push(LearningPattern {
                pattern_type: PatternType::LongSessions,
                description: "Engages in long, deep learning sessions".to_string(),
                confidence: 0.7,
                frequency: 0.8,
            });
        }
    }

    let tries = attempts(events);
    if tries > 0 {
        let hint_ratio = count(events, EventType::HintRequested) as f64 / tries as f64;
        if hint_ratio > 0.3 {
            patterns.push(LearningPattern {
                pattern_type: PatternType::HelpSeeking,
                description: "Frequently seeks hints and guidance".to_string(),
                confidence: 0.8,
                frequency: hint_ratio.min(1.0),
            });
        } else if hint_ratio < 0.1 {
            patterns.push(LearningPattern {
                pattern_type: PatternType::Independence,
                description: "Prefers to work independently without hints".to_string(),
                confidence: 0.8,
                frequency: 1.0 - hint_ratio,
            });
        }
    }

    patterns
}

/// Assess one domain from its attempt events, oldest first
fn assess_skill(domain: SkillDomain, events: &[&EventLog], now: DateTime<Utc>) -> SkillAssessment {
    if events.is_empty() {
        return SkillAssessment {
            skill_domain: domain,
            current_level: 0.0,
            progress_rate: 0.0,
            attempts: 0,
            strengths: Vec::new(),
            weaknesses: vec!["Insufficient data"],
            next_milestones: vec!["Complete initial assessment"],
            confidence_score: 0.0,
            last_updated: now,
        };
    }

    let rate = success_rate(events);
    let current_level = (rate * 1.2).min(1.0);
    let progress_rate = if events.len() < 4 {
        0.0
    } else {
        let mid = events.len() / 2;
        (success_rate(&events[mid..]) - success_rate(&events[..mid])).max(0.0)
    };

    let strengths = if rate > 0.7 {
        vec!["Quick understanding", "Good problem solving"]
    } else if rate > 0.5 {
        vec!["Steady progress"]
    } else {
        Vec::new()
    };
    let weaknesses = if rate < 0.4 {
        vec!["Needs more practice", "Fundamental concepts unclear"]
    } else if rate < 0.6 {
        vec!["Inconsistent performance"]
    } else {
        Vec::new()
    };
    let milestone = if current_level < 0.3 {
        "Master basic concepts"
    } else if current_level < 0.6 {
        "Apply concepts to new problems"
    } else if current_level < 0.8 {
        "Achieve consistent performance"
    } else {
        "Tackle advanced challenges"
    };

    SkillAssessment {
        skill_domain: domain,
        current_level,
        progress_rate,
        attempts: events.len(),
        strengths,
        weaknesses,
        next_milestones: vec![milestone],
        confidence_score: (events.len() as f64 / 20.0).min(1.0),
        last_updated: now,
    }
}

/// Hint-heavy students lean on written guidance, tutor-heavy ones on dialogue
fn learning_style_profile(events: &[&EventLog]) -> LearningStyleProfile {
    let hints = count(events, EventType::HintRequested);
    let dialogue = count(events, EventType::TutorInteraction);

    let (visual, auditory, kinesthetic, reading_writing) = if hints > dialogue {
        (0.6, 0.0, 0.0, 0.7)
    } else {
        (0.0, 0.7, 0.6, 0.0)
    };
    let dominant_style = if hints > dialogue {
        LearningStyle::ReadingWriting
    } else {
        LearningStyle::Auditory
    };

    LearningStyleProfile {
        visual,
        auditory,
        kinesthetic,
        reading_writing,
        dominant_style,
        confidence: if hints + dialogue > 0 { 0.6 } else { 0.0 },
    }
}

fn mastery_levels(events: &[&EventLog]) -> Vec<MasteryLevel> {
    let mut topics: BTreeMap<&str, Vec<&EventLog>> = BTreeMap::new();
    for &e in events {
        if let Some(node) = e.node_id.as_deref() {
            topics.entry(node).or_default().push(e);
        }
    }

    topics
        .into_iter()
        .filter_map(|(topic, list)| {
            let last_practiced = list.iter().map(|e| e.timestamp).max()?;
            let score = success_rate(&list);
            let consistency = topic_consistency(&list);
            let level = if score >= 0.9 && consistency >= 0.8 {
                MasteryStatus::Mastered
            } else if score >= 0.7 && consistency >= 0.6 {
                MasteryStatus::Proficient
            } else if score >= 0.5 {
                MasteryStatus::Developing
            } else {
                MasteryStatus::Beginning
            };
            Some(MasteryLevel {
                topic: topic.to_string(),
                level,
                score,
                consistency,
                last_practiced,
            })
        })
        .collect()
}

fn topic_consistency(events: &[&EventLog]) -> f64 {
    if events.len() < 3 {
        return 0.0;
    }
    let daily = daily_scores(events);
    if daily.len() < 2 {
        return 1.0;
    }
    (1.0 - std_dev(&daily)).max(0.0)
}

fn direction(previous: f64, latest: f64) -> TrendDirection {
    if latest > previous {
        TrendDirection::Increasing
    } else if latest < previous {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

fn progress_trends(events: &[&EventLog], states: &[StudentState]) -> Vec<ProgressTrend> {
    let mut trends = Vec::new();

    let weekly = weekly_scores(events);
    if let &[.., previous, latest] = weekly.as_slice() {
        trends.push(ProgressTrend {
            metric: "weekly_performance",
            direction: direction(previous, latest),
            magnitude: (latest - previous).abs(),
            period: "week",
            confidence: 0.7,
        });
    }

    let mut weeks: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    for s in states {
        let week = s.started_at.iso_week();
        *weeks.entry((week.year(), week.week())).or_default() += 1;
    }
    let frequencies: Vec<f64> = weeks.values().map(|&n| n as f64).collect();
    if let &[.., previous, latest] = frequencies.as_slice() {
        trends.push(ProgressTrend {
            metric: "session_frequency",
            direction: direction(previous, latest),
            magnitude: (latest - previous).abs(),
            period: "week",
            confidence: 0.8,
        });
    }

    trends
}

fn recommendations(
    performance: &PerformanceMetrics,
    patterns: &[LearningPattern],
    skills: &[SkillAssessment],
) -> Vec<String> {
    let mut out = Vec::new();

    if performance.accuracy < 0.6 {
        out.push("Focus on understanding concepts before attempting problems".to_string());
    }
    if performance.consistency < 0.5 {
        out.push("Try to maintain a regular study schedule".to_string());
    }
    if performance.engagement_score < 0.6 {
        out.push("Explore different types of learning activities to increase engagement".to_string());
    }

    for pattern in patterns {
        match pattern.pattern_type {
            PatternType::HelpSeeking if pattern.frequency > 0.4 => {
                out.push("Try working through problems independently before seeking hints".to_string())
            }
            PatternType::ShortSessions => {
                out.push("Consider gradually extending study sessions for deeper learning".to_string())
            }
            _ => {}
        }
    }

    let weak: Vec<String> = skills
        .iter()
        .filter(|s| s.current_level < 0.5)
        .take(2)
        .map(|s| s.skill_domain.label().to_lowercase())
        .collect();
    if !weak.is_empty() {
        out.push(format!("Focus additional practice on: {}", weak.join(", ")));
    }

    out.truncate(MAX_RECOMMENDATIONS);
    out
}

/// Full analysis of `activity`, whose events are oldest first
pub fn analyze(student_id: i64, period_days: i64, activity: &Activity, now: DateTime<Utc>) -> ProgressAnalysis {
    let events: Vec<&EventLog> = activity.events.iter().collect();
    let states = &activity.states;

    let performance_metrics = performance_metrics(&events, states, period_days);
    let learning_patterns = learning_patterns(&events, states);
    let skill_assessments: Vec<SkillAssessment> = SkillDomain::ALL
        .iter()
        .map(|&d| assess_skill(d, &skill_events(&events, d), now))
        .collect();
    let recommendations = recommendations(&performance_metrics, &learning_patterns, &skill_assessments);

    let coin_sum = |types: &[TransactionType]| -> i64 {
        activity
            .coins
            .iter()
            .filter(|c| types.contains(&c.transaction_type))
            .map(|c| c.amount)
            .sum()
    };

    ProgressAnalysis {
        student_id,
        analysis_period_days: period_days,
        learning_style_profile: learning_style_profile(&events),
        mastery_levels: mastery_levels(&events),
        progress_trends: progress_trends(&events, states),
        performance_metrics,
        learning_patterns,
        skill_assessments,
        recommendations,
        coins_earned: coin_sum(&[TransactionType::Earned, TransactionType::Bonus]),
        coins_spent: coin_sum(&[TransactionType::Spent]),
        generated_at: now,
    }
}

/// Difficulty patterns in a window of events, oldest first
pub fn detect_difficulties(events: &[EventLog], now: DateTime<Utc>) -> Vec<LearningDifficulty> {
    let refs: Vec<&EventLog> = events.iter().collect();
    let tries = attempts(&refs).max(1) as f64;
    let mut out = Vec::new();

    let help = count(&refs, EventType::HintRequested) + count(&refs, EventType::TutorInteraction);
    if help as f64 / tries > 0.4 {
        out.push(LearningDifficulty {
            kind: DifficultyKind::Confusion,
            severity: Severity::Medium,
            description: "Student showing signs of confusion in recent sessions",
            recommendations: vec![
                "Review fundamentals",
                "Provide additional examples",
                "Consider one-on-one help",
            ],
        });
    }

    if count(&refs, EventType::BubbleFail) as f64 / tries > 0.7 {
        out.push(LearningDifficulty {
            kind: DifficultyKind::Frustration,
            severity: Severity::High,
            description: "High frequency of failed attempts without progress",
            recommendations: vec![
                "Break down complex problems",
                "Provide more hints",
                "Adjust difficulty level",
            ],
        });
    }

    // Last week against the week before
    let week_ago = now - Duration::days(7);
    let recent = events.iter().filter(|e| e.timestamp >= week_ago).count();
    let older = events.len() - recent;
    if events.len() < 10 || (recent as f64) < older as f64 * 0.7 {
        out.push(LearningDifficulty {
            kind: DifficultyKind::Disengagement,
            severity: Severity::High,
            description: "Decreasing engagement and session frequency",
            recommendations: vec![
                "Gamify learning",
                "Introduce new content",
                "Check learning preferences",
            ],
        });
    }

    let tries: Vec<&EventLog> = refs.iter().copied().filter(|e| is_attempt(e)).collect();
    if tries.len() >= 20 {
        let quarter = tries.len() / 4;
        let rates: Vec<f64> = (0..4)
            .map(|i| success_rate(&tries[i * quarter..(i + 1) * quarter]))
            .collect();
        if rates[3] <= rates[2] + 0.05 && rates[2] <= rates[1] + 0.05 {
            out.push(LearningDifficulty {
                kind: DifficultyKind::Plateau,
                severity: Severity::Medium,
                description: "Learning progress has stagnated",
                recommendations: vec![
                    "Introduce advanced challenges",
                    "Review learning style",
                    "Set new goals",
                ],
            });
        }
    }

    out
}

pub fn recommend_difficulty(topic: &str, events: &[&EventLog]) -> DifficultyRecommendation {
    let success_rate = success_rate(events);
    let hint_usage = count(events, EventType::HintRequested) as f64 / attempts(events).max(1) as f64;

    let (recommended_level, confidence, expected_improvement) =
        if success_rate > 0.8 && hint_usage < 0.2 {
            (DifficultyChange::Increase, 0.9, 0.1)
        } else if success_rate < 0.4 || hint_usage > 0.6 {
            (DifficultyChange::Decrease, 0.8, 0.2)
        } else {
            (DifficultyChange::Maintain, 0.7, 0.05)
        };

    let current_level = if success_rate > 0.8 {
        "easy"
    } else if success_rate > 0.5 {
        "appropriate"
    } else {
        "challenging"
    };

    let reasoning = if success_rate > 0.8 {
        "High success rate indicates content may be too easy"
    } else if success_rate < 0.4 {
        "Low success rate suggests content is too challenging"
    } else if hint_usage > 0.6 {
        "High hint usage indicates need for easier content"
    } else {
        "Performance metrics suggest current difficulty is appropriate"
    };

    DifficultyRecommendation {
        topic: topic.to_string(),
        current_level,
        recommended_level,
        confidence,
        reasoning,
        expected_improvement,
        success_rate,
        hint_usage,
    }
}

fn goal(
    title: String,
    description: String,
    target_metric: &'static str,
    current_value: f64,
    target_value: f64,
    deadline: DateTime<Utc>,
    priority: Priority,
) -> LearningGoal {
    let progress = if target_value > 0.0 {
        (current_value / target_value).clamp(0.0, 1.0)
    } else {
        1.0
    };
    LearningGoal {
        title,
        description,
        target_metric,
        current_value,
        target_value,
        deadline,
        priority,
        progress,
    }
}

pub fn learning_goals(analysis: &ProgressAnalysis, now: DateTime<Utc>) -> Vec<LearningGoal> {
    let mut goals = Vec::new();

    let weakest = analysis
        .skill_assessments
        .iter()
        .min_by(|a, b| a.current_level.total_cmp(&b.current_level));
    if let Some(skill) = weakest {
        goals.push(goal(
            format!("Improve {}", skill.skill_domain.label()),
            format!("Focus on developing {} skills", skill.skill_domain.as_str()),
            "skill_level",
            skill.current_level,
            (skill.current_level + 0.2).min(1.0),
            now + Duration::days(14),
            Priority::High,
        ));
    }

    let m = &analysis.performance_metrics;
    if m.overall_score < 0.7 {
        goals.push(goal(
            "Improve Overall Performance".to_string(),
            "Focus on consistency and accuracy across all topics".to_string(),
            "overall_score",
            m.overall_score,
            0.75,
            now + Duration::days(21),
            Priority::Medium,
        ));
    }
    if m.engagement_score < 0.6 {
        goals.push(goal(
            "Increase Learning Engagement".to_string(),
            "Participate more actively in learning sessions".to_string(),
            "engagement_score",
            m.engagement_score,
            0.75,
            now + Duration::days(10),
            Priority::High,
        ));
    }

    goals
}

/// Consecutive days with activity, ending today
fn learning_streak(events: &[EventLog], today: NaiveDate) -> i64 {
    let days: HashSet<NaiveDate> = events.iter().map(|e| e.timestamp.date_naive()).collect();
    let mut streak = 0;
    let mut day = today;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

/// Badges earned within a window of events, oldest first
pub fn achievement_badges(events: &[EventLog], now: DateTime<Utc>) -> Vec<AchievementBadge> {
    let mut badges = Vec::new();

    if learning_streak(events, now.date_naive()) >= 7 {
        badges.push(AchievementBadge {
            name: "Week Warrior".to_string(),
            description: "Learned on 7 consecutive days".to_string(),
            category: BadgeCategory::Consistency,
            earned_date: now,
            points: 100,
        });
    }

    let hundredth = events
        .iter()
        .filter(|e| e.event_type == EventType::BubbleSuccess)
        .nth(99);
    if let Some(e) = hundredth {
        badges.push(AchievementBadge {
            name: "Century Champion".to_string(),
            description: "Successfully completed 100 learning activities".to_string(),
            category: BadgeCategory::Achievement,
            earned_date: e.timestamp,
            points: 200,
        });
    }

    let refs: Vec<&EventLog> = events.iter().collect();
    for domain in SkillDomain::ALL {
        let domain_events = skill_events(&refs, domain);
        if domain_events.len() < MASTERY_MIN_ATTEMPTS {
            continue;
        }
        if assess_skill(domain, &domain_events, now).current_level >= 0.8 {
            badges.push(AchievementBadge {
                name: format!("{} Master", domain.label()),
                description: format!("Achieved mastery in {}", domain.label().to_lowercase()),
                category: BadgeCategory::Mastery,
                earned_date: now,
                points: 300,
            });
        }
    }

    badges
}

pub fn learning_insights(analysis: &ProgressAnalysis) -> Vec<Insight> {
    let m = &analysis.performance_metrics;
    let mut insights = Vec::new();

    if m.overall_score < 0.5 {
        insights.push(Insight {
            kind: "performance_concern",
            title: "Performance Below Average",
            description: format!(
                "Overall performance score is {:.2}, indicating need for additional support",
                m.overall_score
            ),
            importance: "high",
            recommendations: vec![
                "Review learning approach",
                "Seek additional help",
                "Focus on fundamentals",
            ],
        });
    }
    if m.consistency < 0.4 {
        insights.push(Insight {
            kind: "consistency_issue",
            title: "Inconsistent Performance",
            description: "Performance varies significantly between sessions".to_string(),
            importance: "medium",
            recommendations: vec![
                "Establish regular study routine",
                "Review difficult topics more frequently",
            ],
        });
    }
    if m.engagement_score < 0.6 {
        insights.push(Insight {
            kind: "engagement_low",
            title: "Low Engagement Detected",
            description: "Student engagement levels are below optimal".to_string(),
            importance: "medium",
            recommendations: vec![
                "Try different learning activities",
                "Set short-term goals",
                "Gamify learning",
            ],
        });
    }
    for pattern in &analysis.learning_patterns {
        if pattern.pattern_type == PatternType::HelpSeeking && pattern.frequency > 0.5 {
            insights.push(Insight {
                kind: "dependency_pattern",
                title: "High Dependency on Help",
                description: pattern.description.clone(),
                importance: "medium",
                recommendations: vec![
                    "Encourage independent problem solving",
                    "Provide scaffolded practice",
                ],
            });
        }
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::{seed_user, setup_pool};
    use crate::db::repositories::{
        SqlxCoinTransactionRepository, SqlxEventLogRepository, SqlxStudentStateRepository,
        SqlxUserRepository,
    };
    use crate::models::{NewCoinTransaction, NewEvent, UserRole};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn event(event_type: EventType, node: &str, node_type: &str, timestamp: DateTime<Utc>) -> EventLog {
        EventLog {
            id: 0,
            event_type,
            student_id: 1,
            session_id: Some(1),
            node_id: Some(node.to_string()),
            payload: Some(json!({ "node_type": node_type })),
            response_time_ms: None,
            success: None,
            score: None,
            user_agent: None,
            ip_address: None,
            timestamp,
        }
    }

    fn pass(node: &str, node_type: &str, timestamp: DateTime<Utc>) -> EventLog {
        event(EventType::BubbleSuccess, node, node_type, timestamp)
    }

    fn fail(node: &str, node_type: &str, timestamp: DateTime<Utc>) -> EventLog {
        event(EventType::BubbleFail, node, node_type, timestamp)
    }

    fn hint(node: &str, timestamp: DateTime<Utc>) -> EventLog {
        EventLog {
            payload: None,
            ..event(EventType::HintRequested, node, "", timestamp)
        }
    }

    fn state(minutes: i64, started_at: DateTime<Utc>) -> StudentState {
        let mut s = StudentState::new(1, 1, "a");
        s.total_time_spent = minutes * 60;
        s.started_at = started_at;
        s
    }

    fn refs(events: &[EventLog]) -> Vec<&EventLog> {
        events.iter().collect()
    }

    #[test]
    fn test_skill_domain_parsing() {
        assert_eq!("debugging".parse::<SkillDomain>().unwrap(), SkillDomain::Debugging);
        assert_eq!(
            " Problem_Solving ".parse::<SkillDomain>().unwrap(),
            SkillDomain::ProblemSolving
        );
        assert!("optimization".parse::<SkillDomain>().is_err());
        assert_eq!(skill_domain_catalogue().len(), 4);
        assert_eq!(learning_style_catalogue()[3].name, "reading_writing");
    }

    #[test]
    fn test_skill_events_follow_bubble_type() {
        let events = vec![
            pass("q1", "quiz", at(1, 9)),
            fail("t1", "task", at(1, 10)),
            pass("t1", "task", at(1, 11)),
            pass("c1", "concept", at(1, 12)),
            hint("q1", at(1, 13)),
        ];
        let all = refs(&events);

        assert_eq!(skill_events(&all, SkillDomain::ProblemSolving).len(), 1);
        assert_eq!(skill_events(&all, SkillDomain::Implementation).len(), 2);
        assert_eq!(skill_events(&all, SkillDomain::ConceptualUnderstanding).len(), 1);

        // Only the retry after the failure on t1
        let debugging = skill_events(&all, SkillDomain::Debugging);
        assert_eq!(debugging.len(), 1);
        assert_eq!(debugging[0].event_type, EventType::BubbleSuccess);
        assert_eq!(debugging[0].node_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_assess_skill_without_data() {
        let assessment = assess_skill(SkillDomain::Implementation, &[], at(1, 0));
        assert_eq!(assessment.current_level, 0.0);
        assert_eq!(assessment.weaknesses, vec!["Insufficient data"]);
        assert_eq!(assessment.next_milestones, vec!["Complete initial assessment"]);
    }

    #[test]
    fn test_assess_skill_levels_and_progress() {
        // Two failures then two successes: rate 0.5, second half better
        let events = vec![
            fail("q1", "quiz", at(1, 9)),
            fail("q2", "quiz", at(1, 10)),
            pass("q3", "quiz", at(2, 9)),
            pass("q4", "quiz", at(2, 10)),
        ];
        let assessment = assess_skill(SkillDomain::ProblemSolving, &refs(&events), at(3, 0));
        assert!((assessment.current_level - 0.6).abs() < 1e-9);
        assert!((assessment.progress_rate - 1.0).abs() < 1e-9);
        assert_eq!(assessment.weaknesses, vec!["Inconsistent performance"]);
        assert_eq!(assessment.next_milestones, vec!["Achieve consistent performance"]);
        assert!((assessment.confidence_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_performance_metrics_empty() {
        assert_eq!(performance_metrics(&[], &[], 30), PerformanceMetrics::default());
    }

    #[test]
    fn test_performance_metrics() {
        let events = vec![
            pass("a", "concept", at(1, 9)),
            fail("b", "quiz", at(1, 10)),
            pass("b", "quiz", at(2, 9)),
            pass("c", "quiz", at(2, 10)),
        ];
        let states = vec![state(60, at(1, 9))];
        let m = performance_metrics(&refs(&events), &states, 30);

        assert!((m.accuracy - 0.75).abs() < 1e-9);
        // 3 successes in one hour, normalized by 10 per hour
        assert!((m.speed_score - 0.3).abs() < 1e-9);
        // Daily rates 0.5 and 1.0
        assert!((m.consistency - 0.75).abs() < 1e-9);
        assert_eq!(m.improvement_rate, 0.0);
        // Full length score, one session in 30 days
        let engagement = (1.0 + 7.0 / 30.0) / 2.0;
        assert!((m.engagement_score - engagement).abs() < 1e-9);

        let overall = 0.75 * 0.3 + 0.3 * 0.2 + 0.75 * 0.2 + engagement * 0.15;
        assert!((m.overall_score - overall).abs() < 1e-9);
    }

    #[test]
    fn test_improvement_rate_compares_quarters() {
        let mut events: Vec<EventLog> = (0..4).map(|i| fail("q", "quiz", at(1, i))).collect();
        events.extend((4..8).map(|i| pass("q", "quiz", at(1, i))));
        events.extend((8..12).map(|i| pass("q", "quiz", at(1, i))));

        assert!((improvement_rate(&refs(&events)) - 1.0).abs() < 1e-9);
        assert_eq!(improvement_rate(&refs(&events[..9])), 0.0);
    }

    #[test]
    fn test_learning_patterns() {
        let events = vec![
            pass("a", "quiz", at(1, 20)),
            pass("b", "quiz", at(2, 20)),
            pass("c", "quiz", at(3, 8)),
            hint("a", at(3, 20)),
            hint("b", at(3, 21)),
        ];
        let patterns = learning_patterns(&refs(&events), &[state(10, at(1, 20))]);

        assert_eq!(patterns[0].pattern_type, PatternType::Temporal);
        assert_eq!(patterns[0].description, "Most active during hours (UTC): 20, 8, 21");
        assert_eq!(patterns[1].pattern_type, PatternType::ShortSessions);
        assert_eq!(patterns[2].pattern_type, PatternType::HelpSeeking);
        assert!((patterns[2].frequency - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mastery_levels_per_bubble() {
        let events = vec![
            pass("a", "quiz", at(1, 9)),
            pass("a", "quiz", at(1, 10)),
            pass("a", "quiz", at(2, 9)),
            fail("b", "quiz", at(1, 9)),
        ];
        let levels = mastery_levels(&refs(&events));

        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].topic, "a");
        assert_eq!(levels[0].level, MasteryStatus::Mastered);
        assert_eq!(levels[0].last_practiced, at(2, 9));
        assert_eq!(levels[1].level, MasteryStatus::Beginning);
        assert_eq!(levels[1].consistency, 0.0);
    }

    #[test]
    fn test_weekly_trends() {
        // 2026-03-02 is a Monday; the second week does better
        let events = vec![
            fail("a", "quiz", at(2, 9)),
            pass("a", "quiz", at(3, 9)),
            pass("a", "quiz", at(9, 9)),
        ];
        let states = vec![state(5, at(2, 9)), state(5, at(9, 9)), state(5, at(10, 9))];
        let trends = progress_trends(&refs(&events), &states);

        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].metric, "weekly_performance");
        assert_eq!(trends[0].direction, TrendDirection::Increasing);
        assert!((trends[0].magnitude - 0.5).abs() < 1e-9);
        assert_eq!(trends[1].metric, "session_frequency");
        assert_eq!(trends[1].direction, TrendDirection::Increasing);
        assert_eq!(trends[1].magnitude, 1.0);

        assert!(progress_trends(&refs(&events[..2]), &states[..1]).is_empty());
    }

    #[test]
    fn test_detect_difficulties() {
        let now = at(20, 12);
        assert_eq!(
            detect_difficulties(&[], now).iter().map(|d| d.kind).collect::<Vec<_>>(),
            vec![DifficultyKind::Disengagement]
        );

        // Steady recent activity, mostly failures with many hints
        let mut events = Vec::new();
        for i in 0..6 {
            events.push(fail("q", "quiz", at(15, i)));
            events.push(hint("q", at(16, i)));
        }
        events.push(pass("q", "quiz", at(17, 0)));
        let kinds: Vec<_> = detect_difficulties(&events, now).iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DifficultyKind::Confusion, DifficultyKind::Frustration]);
    }

    #[test]
    fn test_disengagement_when_activity_drops() {
        let now = at(20, 12);
        let mut events: Vec<EventLog> = (0..10).map(|i| pass("a", "quiz", at(8, i))).collect();
        events.extend((0..3).map(|i| pass("a", "quiz", at(18, i))));
        let kinds: Vec<_> = detect_difficulties(&events, now).iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DifficultyKind::Disengagement]);
    }

    #[test]
    fn test_plateau_detected_on_flat_rates() {
        let now = at(20, 12);
        let events: Vec<EventLog> = (0..20)
            .map(|i| {
                let ts = at(14 + i / 4, i % 4);
                if i % 5 < 3 {
                    pass("a", "quiz", ts)
                } else {
                    fail("a", "quiz", ts)
                }
            })
            .collect();
        let kinds: Vec<_> = detect_difficulties(&events, now).iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DifficultyKind::Plateau));
    }

    #[test]
    fn test_recommend_difficulty() {
        let easy = vec![pass("loops-1", "quiz", at(1, 0)); 5];
        let rec = recommend_difficulty("loops", &refs(&easy));
        assert_eq!(rec.recommended_level, DifficultyChange::Increase);
        assert_eq!(rec.current_level, "easy");
        assert_eq!(rec.confidence, 0.9);

        let hard = vec![fail("loops-1", "quiz", at(1, 0)), hint("loops-1", at(1, 1))];
        let rec = recommend_difficulty("loops", &refs(&hard));
        assert_eq!(rec.recommended_level, DifficultyChange::Decrease);
        assert_eq!(rec.reasoning, "Low success rate suggests content is too challenging");

        let rec = recommend_difficulty("loops", &[]);
        assert_eq!(rec.recommended_level, DifficultyChange::Decrease);
        assert_eq!(rec.current_level, "challenging");
    }

    #[test]
    fn test_goals_from_analysis() {
        let now = at(20, 12);
        let analysis = analyze(1, 30, &Activity::default(), now);
        let goals = learning_goals(&analysis, now);

        assert_eq!(goals.len(), 3);
        assert_eq!(goals[0].title, "Improve Problem Solving");
        assert!((goals[0].target_value - 0.2).abs() < 1e-9);
        assert_eq!(goals[0].deadline, now + Duration::days(14));
        assert_eq!(goals[1].target_metric, "overall_score");
        assert_eq!(goals[2].priority, Priority::High);
        assert!(goals.iter().all(|g| g.progress == 0.0));
    }

    #[test]
    fn test_badges() {
        let now = at(20, 12);
        assert!(achievement_badges(&[], now).is_empty());

        // A week of daily quiz successes, 100 in total
        let events: Vec<EventLog> = (0..100)
            .map(|i| pass("q", "quiz", at(14 + (i % 7) as u32, 1)))
            .collect();
        let names: Vec<String> = achievement_badges(&events, now).into_iter().map(|b| b.name).collect();
        assert_eq!(
            names,
            vec!["Week Warrior", "Century Champion", "Problem Solving Master"]
        );

        // Mastery needs enough attempts
        let few: Vec<EventLog> = (0..3).map(|i| pass("q", "quiz", at(20, i))).collect();
        assert!(achievement_badges(&few, now).is_empty());
    }

    #[test]
    fn test_streak_breaks_on_gap() {
        let events = vec![pass("a", "quiz", at(20, 1)), pass("a", "quiz", at(18, 1))];
        assert_eq!(learning_streak(&events, at(20, 0).date_naive()), 1);
        assert_eq!(learning_streak(&events, at(21, 0).date_naive()), 0);
    }

    #[test]
    fn test_insights_for_idle_student() {
        let analysis = analyze(1, 30, &Activity::default(), at(1, 0));
        let kinds: Vec<_> = learning_insights(&analysis).iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec!["performance_concern", "consistency_issue", "engagement_low"]);
    }

    #[test]
    fn test_analysis_counts_coins() {
        let mut activity = Activity::default();
        for (transaction_type, amount) in [
            (TransactionType::Earned, 10),
            (TransactionType::Bonus, 5),
            (TransactionType::Spent, 4),
        ] {
            activity.coins.push(CoinTransaction {
                id: 0,
                student_id: 1,
                transaction_type,
                amount,
                session_id: None,
                node_id: None,
                description: String::new(),
                metadata: None,
                balance_before: 0,
                balance_after: 0,
                created_at: at(1, 0),
            });
        }
        let analysis = analyze(1, 30, &activity, at(2, 0));
        assert_eq!(analysis.coins_earned, 15);
        assert_eq!(analysis.coins_spent, 4);
        assert_eq!(analysis.skill_assessments.len(), 4);
    }

    // ========================================================================
    // Service
    // ========================================================================

    async fn setup() -> (crate::db::DynDatabasePool, ProgressTrackingService) {
        let pool = setup_pool().await;
        let service = ProgressTrackingService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxStudentStateRepository::boxed(pool.clone()),
            SqlxEventLogRepository::boxed(pool.clone()),
            SqlxCoinTransactionRepository::boxed(pool.clone()),
        );
        (pool, service)
    }

    #[tokio::test]
    async fn test_access_rules() {
        let (pool, service) = setup().await;
        let admin = seed_user(&pool, "root", UserRole::Admin).await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;
        let other = seed_user(&pool, "other", UserRole::Student).await;

        service.analysis(&student, student.id, None).await.unwrap();
        service.analysis(&admin, student.id, Some(7)).await.unwrap();

        match service.badges(&other, student.id).await {
            Err(ProgressTrackingError::Forbidden(msg)) => assert_eq!(msg, "Access denied"),
            result => panic!("unexpected: {:?}", result),
        }
        assert!(matches!(
            service.goals(&admin, 9999).await,
            Err(ProgressTrackingError::NotFound(_))
        ));
        assert!(matches!(
            service.analysis(&student, student.id, Some(0)).await,
            Err(ProgressTrackingError::ValidationError(_))
        ));
        assert!(matches!(
            service.skills(&student, student.id, Some("juggling")).await,
            Err(ProgressTrackingError::ValidationError(_))
        ));
        assert!(matches!(
            service.difficulty_recommendation(&student, student.id, " ").await,
            Err(ProgressTrackingError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_reports_read_recorded_activity() {
        let (pool, service) = setup().await;
        let student = seed_user(&pool, "pupil", UserRole::Student).await;

        let events = SqlxEventLogRepository::new(pool.clone());
        for (event_type, node) in [
            (EventType::BubbleFail, "loops-1"),
            (EventType::BubbleSuccess, "loops-1"),
            (EventType::BubbleSuccess, "loops-2"),
        ] {
            events
                .create(
                    &NewEvent::new(event_type, student.id)
                        .node(node)
                        .payload(json!({ "node_type": "quiz" })),
                )
                .await
                .unwrap();
        }
        SqlxCoinTransactionRepository::new(pool.clone())
            .record(&NewCoinTransaction {
                student_id: student.id,
                transaction_type: TransactionType::Earned,
                amount: 20,
                session_id: None,
                node_id: Some("loops-1".to_string()),
                description: "Completed bubble: Loops".to_string(),
                metadata: None,
            })
            .await
            .unwrap();

        let analysis = service.analysis(&student, student.id, None).await.unwrap();
        assert!((analysis.performance_metrics.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(analysis.coins_earned, 20);
        assert_eq!(analysis.mastery_levels.len(), 2);

        let skills = service.skills(&student, student.id, Some("debugging")).await.unwrap();
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].attempts, 1);

        let rec = service
            .difficulty_recommendation(&student, student.id, "loops")
            .await
            .unwrap();
        assert!((rec.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(rec.recommended_level, DifficultyChange::Maintain);

        let report = service.difficulties(&student, student.id).await.unwrap();
        assert_eq!(report.difficulties_detected, report.difficulties.len());

        let dashboard = service.dashboard(&student, student.id).await.unwrap();
        assert_eq!(dashboard.summary.coin_balance, 20);
        assert_eq!(dashboard.skill_breakdown.len(), 4);
        assert!(dashboard.recommendations.len() <= 3);
    }
}
