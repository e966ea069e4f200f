//! Learning event repository

use super::{decode_json_opt, encode_json_opt};
use crate::db::{Backend, DynDatabasePool};
use crate::models::{EventFilter, EventLog, EventType, NewEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound applied when a filter carries no limit
const DEFAULT_EVENT_LIMIT: i64 = 1000;

/// Learning event repository trait
#[async_trait]
pub trait EventLogRepository: Send + Sync {
    /// Append an event stamped with the current time
    async fn create(&self, event: &NewEvent) -> Result<EventLog>;

    /// Events matching `filter`, newest first
    async fn list(&self, filter: &EventFilter) -> Result<Vec<EventLog>>;

    /// Number of events matching `filter`, ignoring its limit
    async fn count(&self, filter: &EventFilter) -> Result<i64>;
}

/// SQLx-based event repository implementation
pub struct SqlxEventLogRepository {
    pool: DynDatabasePool,
}

impl SqlxEventLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EventLogRepository> {
        Arc::new(Self::new(pool))
    }
}

const EVENT_COLUMNS: &str = "e.id, e.event_type, e.student_id, e.session_id, e.node_id, e.payload, \
     e.response_time_ms, e.success, e.score, e.user_agent, e.ip_address, e.timestamp";

const INSERT_EVENT: &str = r#"
    INSERT INTO event_logs (event_type, student_id, session_id, node_id, payload, response_time_ms,
                            success, score, user_agent, ip_address, timestamp)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const EVENT_FILTER: &str = r#"
    WHERE (? IS NULL OR e.student_id = ?)
      AND (? IS NULL OR e.session_id = ?)
      AND (? IS NULL OR e.event_type = ?)
      AND (? IS NULL OR e.timestamp >= ?)
      AND (? IS NULL OR e.timestamp <= ?)
      AND (? IS NULL OR e.session_id IN (
            SELECT s.id FROM sessions s JOIN courses c ON c.id = s.course_id
            WHERE c.instructor_id = ?))
"#;

/// Bind the filter placeholders of [`EVENT_FILTER`], each value twice
macro_rules! bind_event_filter {
    ($query:expr, $filter:expr, $event_type:expr) => {
        $query
            .bind($filter.student_id)
            .bind($filter.student_id)
            .bind($filter.session_id)
            .bind($filter.session_id)
            .bind($event_type)
            .bind($event_type)
            .bind($filter.start_date)
            .bind($filter.start_date)
            .bind($filter.end_date)
            .bind($filter.end_date)
            .bind($filter.instructor_id)
            .bind($filter.instructor_id)
    };
}

fn effective_limit(filter: &EventFilter) -> i64 {
    if filter.limit > 0 {
        filter.limit
    } else {
        DEFAULT_EVENT_LIMIT
    }
}

#[async_trait]
impl EventLogRepository for SqlxEventLogRepository {
    async fn create(&self, event: &NewEvent) -> Result<EventLog> {
        let payload = encode_json_opt(event.payload.as_ref())?;
        let now = Utc::now();

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_EVENT)
                .bind(event.event_type.as_str())
                .bind(event.student_id)
                .bind(event.session_id)
                .bind(&event.node_id)
                .bind(&payload)
                .bind(event.response_time_ms)
                .bind(event.success)
                .bind(event.score)
                .bind(&event.user_agent)
                .bind(&event.ip_address)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(INSERT_EVENT)
                .bind(event.event_type.as_str())
                .bind(event.student_id)
                .bind(event.session_id)
                .bind(&event.node_id)
                .bind(&payload)
                .bind(event.response_time_ms)
                .bind(event.success)
                .bind(event.score)
                .bind(&event.user_agent)
                .bind(&event.ip_address)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to record event")?;

        Ok(EventLog {
            id,
            event_type: event.event_type,
            student_id: event.student_id,
            session_id: event.session_id,
            node_id: event.node_id.clone(),
            payload: event.payload.clone(),
            response_time_ms: event.response_time_ms,
            success: event.success,
            score: event.score,
            user_agent: event.user_agent.clone(),
            ip_address: event.ip_address.clone(),
            timestamp: now,
        })
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<EventLog>> {
        let sql = format!(
            "SELECT {} FROM event_logs e {} ORDER BY e.timestamp DESC, e.id DESC LIMIT ?",
            EVENT_COLUMNS, EVENT_FILTER
        );
        let event_type = filter.event_type.map(|t| t.as_str());
        let limit = effective_limit(filter);

        match self.pool.backend() {
            Backend::Sqlite(p) => bind_event_filter!(sqlx::query(&sql), filter, event_type)
                .bind(limit)
                .fetch_all(p)
                .await
                .context("Failed to list events")?
                .iter()
                .map(row_to_event_sqlite)
                .collect(),
            Backend::Mysql(p) => bind_event_filter!(sqlx::query(&sql), filter, event_type)
                .bind(limit)
                .fetch_all(p)
                .await
                .context("Failed to list events")?
                .iter()
                .map(row_to_event_mysql)
                .collect(),
        }
    }

    async fn count(&self, filter: &EventFilter) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM event_logs e {}", EVENT_FILTER);
        let event_type = filter.event_type.map(|t| t.as_str());

        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => {
                bind_event_filter!(sqlx::query_as(&sql), filter, event_type)
                    .fetch_one(p)
                    .await
            }
            Backend::Mysql(p) => {
                bind_event_filter!(sqlx::query_as(&sql), filter, event_type)
                    .fetch_one(p)
                    .await
            }
        }
        .context("Failed to count events")?;
        Ok(count)
    }
}

fn row_to_event_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<EventLog> {
    let event_type: String = row.get("event_type");

    Ok(EventLog {
        id: row.get("id"),
        event_type: EventType::from_str(&event_type)?,
        student_id: row.get("student_id"),
        session_id: row.get("session_id"),
        node_id: row.get("node_id"),
        payload: decode_json_opt(row.get("payload"), "payload")?,
        response_time_ms: row.get("response_time_ms"),
        success: row.get("success"),
        score: row.get("score"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        timestamp: row.get("timestamp"),
    })
}

fn row_to_event_mysql(row: &sqlx::mysql::MySqlRow) -> Result<EventLog> {
    let event_type: String = row.get("event_type");

    Ok(EventLog {
        id: row.get("id"),
        event_type: EventType::from_str(&event_type)?,
        student_id: row.get("student_id"),
        session_id: row.get("session_id"),
        node_id: row.get("node_id"),
        payload: decode_json_opt(row.get("payload"), "payload")?,
        response_time_ms: row.get("response_time_ms"),
        success: row.get("success"),
        score: row.get("score"),
        user_agent: row.get("user_agent"),
        ip_address: row.get("ip_address"),
        timestamp: row.get("timestamp"),
    })
}
