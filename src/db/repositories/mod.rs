//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles CRUD operations for a specific entity.

pub mod auth_token;
pub mod bubble_node;
pub mod coin_transaction;
pub mod course;
pub mod enrollment;
pub mod event_log;
pub mod session;
pub mod student_state;
pub mod user;

pub use auth_token::{AuthTokenRepository, SqlxAuthTokenRepository};
pub use bubble_node::{BubbleNodeRepository, SqlxBubbleNodeRepository};
pub use coin_transaction::{CoinTransactionRepository, Spend, SqlxCoinTransactionRepository};
pub use course::{CourseRepository, SqlxCourseRepository};
pub use enrollment::{EnrollmentRepository, SqlxEnrollmentRepository};
pub use event_log::{EventLogRepository, SqlxEventLogRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use student_state::{SqlxStudentStateRepository, StudentStateRepository};
pub use user::{SqlxUserRepository, UserRepository};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a value for a JSON TEXT column
pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

/// Encode an optional value; `None` stays SQL NULL
pub(crate) fn encode_json_opt<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(encode_json).transpose()
}

/// Decode a JSON TEXT column
pub(crate) fn decode_json<T: DeserializeOwned>(text: &str, column: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("Invalid JSON in column {}", column))
}

/// Decode an optional JSON TEXT column
pub(crate) fn decode_json_opt<T: DeserializeOwned>(text: Option<String>, column: &str) -> Result<Option<T>> {
    text.as_deref().map(|t| decode_json(t, column)).transpose()
}
