//! Learning event and coin ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of learning event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionComplete,
    BubbleEnter,
    BubbleSuccess,
    BubbleFail,
    HintRequested,
    CodeExecuted,
    TutorInteraction,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStart => "session_start",
            EventType::SessionComplete => "session_complete",
            EventType::BubbleEnter => "bubble_enter",
            EventType::BubbleSuccess => "bubble_success",
            EventType::BubbleFail => "bubble_fail",
            EventType::HintRequested => "hint_requested",
            EventType::CodeExecuted => "code_executed",
            EventType::TutorInteraction => "tutor_interaction",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session_start" => Ok(EventType::SessionStart),
            "session_complete" => Ok(EventType::SessionComplete),
            "bubble_enter" => Ok(EventType::BubbleEnter),
            "bubble_success" => Ok(EventType::BubbleSuccess),
            "bubble_fail" => Ok(EventType::BubbleFail),
            "hint_requested" => Ok(EventType::HintRequested),
            "code_executed" => Ok(EventType::CodeExecuted),
            "tutor_interaction" => Ok(EventType::TutorInteraction),
            _ => Err(anyhow::anyhow!("Invalid event type: {}", s)),
        }
    }
}

/// One recorded learning event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: i64,
    pub event_type: EventType,
    pub student_id: i64,
    pub session_id: Option<i64>,
    pub node_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub response_time_ms: Option<i64>,
    pub success: Option<bool>,
    pub score: Option<f64>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Event about to be written
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub student_id: i64,
    pub session_id: Option<i64>,
    pub node_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub response_time_ms: Option<i64>,
    pub success: Option<bool>,
    pub score: Option<f64>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl NewEvent {
    pub fn new(event_type: EventType, student_id: i64) -> Self {
        Self {
            event_type,
            student_id,
            session_id: None,
            node_id: None,
            payload: None,
            response_time_ms: None,
            success: None,
            score: None,
            user_agent: None,
            ip_address: None,
        }
    }

    pub fn session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn response_time_ms(mut self, ms: Option<i64>) -> Self {
        self.response_time_ms = ms;
        self
    }
}

/// Filters for querying events
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub student_id: Option<i64>,
    pub session_id: Option<i64>,
    pub event_type: Option<EventType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Only events of sessions in courses owned by this instructor
    pub instructor_id: Option<i64>,
    pub limit: i64,
}

/// Direction of a coin movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earned,
    Bonus,
    Spent,
    Refunded,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Earned => "earned",
            TransactionType::Bonus => "bonus",
            TransactionType::Spent => "spent",
            TransactionType::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earned" => Ok(TransactionType::Earned),
            "bonus" => Ok(TransactionType::Bonus),
            "spent" => Ok(TransactionType::Spent),
            "refunded" => Ok(TransactionType::Refunded),
            _ => Err(anyhow::anyhow!("Invalid transaction type: {}", s)),
        }
    }
}

/// Entry in a student's coin ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinTransaction {
    pub id: i64,
    pub student_id: i64,
    pub transaction_type: TransactionType,
    /// Always positive; the type gives the direction
    pub amount: i64,
    pub session_id: Option<i64>,
    pub node_id: Option<String>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Ledger entry about to be written; balances are filled in by the repository
#[derive(Debug, Clone)]
pub struct NewCoinTransaction {
    pub student_id: i64,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub session_id: Option<i64>,
    pub node_id: Option<String>,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
}

impl NewCoinTransaction {
    /// Signed change this entry applies to the balance
    pub fn delta(&self) -> i64 {
        match self.transaction_type {
            TransactionType::Earned | TransactionType::Bonus | TransactionType::Refunded => {
                self.amount
            }
            TransactionType::Spent => -self.amount,
        }
    }
}

/// Filters for listing coin transactions
#[derive(Debug, Clone, Default)]
pub struct CoinFilter {
    pub student_id: Option<i64>,
    pub session_id: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub limit: i64,
}
