//! Bubble content model
//!
//! The graph on a session only holds layout; the teaching material of each
//! bubble lives in its own row keyed by `(session_id, node_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BubbleType;

/// Persisted content of one bubble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BubbleNode {
    pub id: i64,
    /// Graph node id, unique within the session
    pub node_id: String,
    pub session_id: i64,
    #[serde(rename = "type")]
    pub node_type: BubbleType,
    pub title: String,
    pub content_md: Option<String>,
    pub code_template: Option<String>,
    pub test_cases: Option<serde_json::Value>,
    pub expected_output: Option<String>,
    /// Hints revealed one per failed attempt
    pub hints: Vec<String>,
    pub tutor_prompt: Option<String>,
    pub success_message: Option<String>,
    pub failure_message: Option<String>,
    pub coin_reward: i64,
    pub bonus_conditions: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Content written for a bubble, used by both create and upsert
#[derive(Debug, Clone, Deserialize)]
pub struct BubbleContentInput {
    pub node_id: String,
    #[serde(rename = "type")]
    pub node_type: BubbleType,
    pub title: String,
    #[serde(default)]
    pub content_md: Option<String>,
    #[serde(default)]
    pub code_template: Option<String>,
    #[serde(default)]
    pub test_cases: Option<serde_json::Value>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub hints: Option<Vec<String>>,
    #[serde(default)]
    pub tutor_prompt: Option<String>,
    #[serde(default)]
    pub success_message: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default = "default_coin_reward")]
    pub coin_reward: i64,
    #[serde(default)]
    pub bonus_conditions: Option<serde_json::Value>,
}

fn default_coin_reward() -> i64 {
    10
}

impl BubbleContentInput {
    /// Bare content for a freshly created graph node
    pub fn placeholder(node_id: &str, node_type: BubbleType, title: &str, coin_reward: i64) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type,
            title: title.to_string(),
            content_md: None,
            code_template: None,
            test_cases: None,
            expected_output: None,
            hints: None,
            tutor_prompt: None,
            success_message: None,
            failure_message: None,
            coin_reward,
            bonus_conditions: None,
        }
    }
}
