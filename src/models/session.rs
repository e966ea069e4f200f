//! Learning session model
//!
//! A session belongs to a course and carries a bubble graph: a directed
//! graph of learning steps that students walk from `start_node`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Learning session entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    /// Display name (1-200 chars)
    pub name: String,
    pub description: Option<String>,
    pub course_id: i64,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    /// Strictly after `start_time`
    pub end_time: DateTime<Utc>,
    pub graph_json: BubbleGraph,
    /// 1-10
    pub max_attempts_per_bubble: i64,
    pub coins_per_bubble: i64,
    pub time_limit_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set the first time the session is published
    pub published_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Published and currently within its time window
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Published && self.start_time <= now && now <= self.end_time
    }

    /// Published and not started yet
    pub fn is_upcoming_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Published && now < self.start_time
    }

    /// The time window has closed
    pub fn is_past_at(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_upcoming(&self) -> bool {
        self.is_upcoming_at(Utc::now())
    }

    pub fn is_past(&self) -> bool {
        self.is_past_at(Utc::now())
    }

    pub fn is_published(&self) -> bool {
        self.status == SessionStatus::Published
    }
}

/// Publication state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Draft => write!(f, "draft"),
            SessionStatus::Published => write!(f, "published"),
            SessionStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(SessionStatus::Draft),
            "published" => Ok(SessionStatus::Published),
            "archived" => Ok(SessionStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid session status: {}", s)),
        }
    }
}

/// Kind of learning step a bubble represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleType {
    Concept,
    Task,
    Quiz,
    Demo,
    Summary,
}

impl BubbleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BubbleType::Concept => "concept",
            BubbleType::Task => "task",
            BubbleType::Quiz => "quiz",
            BubbleType::Demo => "demo",
            BubbleType::Summary => "summary",
        }
    }

    /// Task and quiz bubbles expect an answer from the student
    pub fn is_interactive(&self) -> bool {
        matches!(self, BubbleType::Task | BubbleType::Quiz)
    }
}

impl fmt::Display for BubbleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BubbleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concept" => Ok(BubbleType::Concept),
            "task" => Ok(BubbleType::Task),
            "quiz" => Ok(BubbleType::Quiz),
            "demo" => Ok(BubbleType::Demo),
            "summary" => Ok(BubbleType::Summary),
            _ => Err(anyhow::anyhow!("Invalid bubble type: {}", s)),
        }
    }
}

/// Graph of bubbles stored on a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BubbleGraph {
    pub start_node: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Node placement inside a bubble graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: BubbleType,
    pub title: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_node_width")]
    pub width: f64,
    #[serde(default = "default_node_height")]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

fn default_node_width() -> f64 {
    150.0
}

fn default_node_height() -> f64 {
    80.0
}

/// Directed edge between two graph nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    #[serde(alias = "from")]
    pub from_node: String,
    #[serde(alias = "to")]
    pub to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl BubbleGraph {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Input for creating a session
#[derive(Debug, Clone)]
pub struct CreateSessionInput {
    pub name: String,
    pub description: Option<String>,
    pub course_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub graph_json: BubbleGraph,
    pub max_attempts_per_bubble: i64,
    pub coins_per_bubble: i64,
    pub time_limit_minutes: Option<i64>,
}

/// Input for updating a session; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateSessionInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<SessionStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub graph_json: Option<BubbleGraph>,
    pub max_attempts_per_bubble: Option<i64>,
    pub coins_per_bubble: Option<i64>,
    pub time_limit_minutes: Option<i64>,
}

/// Filters for listing sessions
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub course_id: Option<i64>,
    pub status: Option<SessionStatus>,
    /// Published sessions whose window contains this instant
    pub active_at: Option<DateTime<Utc>>,
    /// Only sessions of courses owned by this instructor
    pub instructor_id: Option<i64>,
}

/// Session with derived counters for the detail view
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    #[serde(flatten)]
    pub session: Session,
    pub total_bubbles: i64,
    pub student_count: i64,
    /// Mean minutes between start and completion over completed states
    pub avg_completion_time: Option<f64>,
    pub is_active: bool,
    pub is_upcoming: bool,
    pub is_past: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(status: SessionStatus, start: DateTime<Utc>, end: DateTime<Utc>) -> Session {
        Session {
            id: 1,
            name: "Intro".to_string(),
            description: None,
            course_id: 1,
            status,
            start_time: start,
            end_time: end,
            graph_json: BubbleGraph {
                start_node: "a".to_string(),
                nodes: vec![],
                edges: vec![],
            },
            max_attempts_per_bubble: 3,
            coins_per_bubble: 10,
            time_limit_minutes: None,
            created_at: start,
            updated_at: None,
            published_at: None,
        }
    }

    #[test]
    fn test_time_window_helpers() {
        let now = Utc::now();
        let live = session(SessionStatus::Published, now - Duration::hours(1), now + Duration::hours(1));
        assert!(live.is_active_at(now));
        assert!(!live.is_upcoming_at(now));
        assert!(!live.is_past_at(now));

        let later = session(SessionStatus::Published, now + Duration::hours(1), now + Duration::hours(2));
        assert!(later.is_upcoming_at(now));
        assert!(!later.is_active_at(now));

        let done = session(SessionStatus::Published, now - Duration::hours(2), now - Duration::hours(1));
        assert!(done.is_past_at(now));
        assert!(!done.is_active_at(now));
    }

    #[test]
    fn test_draft_is_never_active_or_upcoming() {
        let now = Utc::now();
        let draft = session(SessionStatus::Draft, now - Duration::hours(1), now + Duration::hours(1));
        assert!(!draft.is_active_at(now));

        let draft = session(SessionStatus::Draft, now + Duration::hours(1), now + Duration::hours(2));
        assert!(!draft.is_upcoming_at(now));
    }

    #[test]
    fn test_graph_deserialize_defaults_and_aliases() {
        let graph: BubbleGraph = serde_json::from_value(serde_json::json!({
            "start_node": "a",
            "nodes": [
                {"id": "a", "type": "concept", "title": "A", "x": 0, "y": 0},
                {"id": "b", "type": "task", "title": "B", "x": 10.5, "y": 3}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }))
        .unwrap();

        assert_eq!(graph.nodes[0].width, 150.0);
        assert_eq!(graph.nodes[0].height, 80.0);
        assert_eq!(graph.nodes[1].node_type, BubbleType::Task);
        assert_eq!(graph.edges[0].from_node, "a");
        assert_eq!(graph.edges[0].to_node, "b");
        assert!(graph.node("b").is_some());
        assert!(graph.node("z").is_none());

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["edges"][0]["from_node"], "a");
        assert_eq!(json["nodes"][0]["type"], "concept");
    }

    #[test]
    fn test_bubble_type_from_str() {
        assert_eq!("QUIZ".parse::<BubbleType>().unwrap(), BubbleType::Quiz);
        assert!(BubbleType::Task.is_interactive());
        assert!(!BubbleType::Summary.is_interactive());
        assert!("video".parse::<BubbleType>().is_err());
    }
}
