//! Per-student progress through a session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress of one student in one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentState {
    pub id: i64,
    pub student_id: i64,
    pub session_id: i64,
    pub current_node_id: Option<String>,
    /// Completed node ids in completion order, without duplicates
    pub completed_nodes: Vec<String>,
    /// Failed attempt count per node id
    pub failed_attempts: BTreeMap<String, i64>,
    pub total_coins: i64,
    pub is_completed: bool,
    pub completion_percentage: f64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds
    pub total_time_spent: i64,
}

impl StudentState {
    /// Fresh state positioned on `start_node`
    pub fn new(student_id: i64, session_id: i64, start_node: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            student_id,
            session_id,
            current_node_id: Some(start_node.to_string()),
            completed_nodes: Vec::new(),
            failed_attempts: BTreeMap::new(),
            total_coins: 0,
            is_completed: false,
            completion_percentage: 0.0,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
            total_time_spent: 0,
        }
    }

    pub fn has_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }

    /// Record a completion; returns false when the node was already done
    pub fn mark_completed(&mut self, node_id: &str) -> bool {
        if self.has_completed(node_id) {
            return false;
        }
        self.completed_nodes.push(node_id.to_string());
        true
    }

    /// Bump the failure counter of a node and return the new count
    pub fn record_failure(&mut self, node_id: &str) -> i64 {
        let count = self.failed_attempts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Minutes between start and completion, when completed
    pub fn completion_minutes(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 60_000.0)
    }
}
