//! Learning session repository
//!
//! Database operations for sessions. The bubble graph is stored as a JSON
//! document in `graph_json`.

use super::{decode_json, encode_json};
use crate::db::{Backend, DynDatabasePool};
use crate::models::{CreateSessionInput, ListParams, Session, SessionFilter, SessionStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session in draft state
    async fn create(&self, input: &CreateSessionInput) -> Result<Session>;

    /// Get session by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Session>>;

    /// Persist every mutable column of `session`
    async fn update(&self, session: &Session) -> Result<Session>;

    /// Delete a session
    async fn delete(&self, id: i64) -> Result<()>;

    /// List sessions matching `filter`, returning the page and the total
    async fn list(&self, filter: &SessionFilter, params: &ListParams) -> Result<(Vec<Session>, i64)>;

    /// Every session matching `filter`, oldest first
    async fn list_all(&self, filter: &SessionFilter) -> Result<Vec<Session>>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

const SESSION_COLUMNS: &str = "s.id, s.name, s.description, s.course_id, s.status, s.start_time, \
     s.end_time, s.graph_json, s.max_attempts_per_bubble, s.coins_per_bubble, \
     s.time_limit_minutes, s.created_at, s.updated_at, s.published_at";

const INSERT_SESSION: &str = r#"
    INSERT INTO sessions (name, description, course_id, status, start_time, end_time, graph_json,
                          max_attempts_per_bubble, coins_per_bubble, time_limit_minutes, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_SESSION: &str = r#"
    UPDATE sessions
    SET name = ?, description = ?, status = ?, start_time = ?, end_time = ?, graph_json = ?,
        max_attempts_per_bubble = ?, coins_per_bubble = ?, time_limit_minutes = ?,
        updated_at = ?, published_at = ?
    WHERE id = ?
"#;

const SESSION_FILTER: &str = r#"
    WHERE (? IS NULL OR s.course_id = ?)
      AND (? IS NULL OR s.status = ?)
      AND (? IS NULL OR (s.status = 'published' AND s.start_time <= ? AND s.end_time >= ?))
      AND (? IS NULL OR s.course_id IN (SELECT c.id FROM courses c WHERE c.instructor_id = ?))
"#;

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, input: &CreateSessionInput) -> Result<Session> {
        let graph = encode_json(&input.graph_json)?;
        let now = Utc::now();
        let status = SessionStatus::Draft;

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_SESSION)
                .bind(&input.name)
                .bind(&input.description)
                .bind(input.course_id)
                .bind(status.to_string())
                .bind(input.start_time)
                .bind(input.end_time)
                .bind(&graph)
                .bind(input.max_attempts_per_bubble)
                .bind(input.coins_per_bubble)
                .bind(input.time_limit_minutes)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(INSERT_SESSION)
                .bind(&input.name)
                .bind(&input.description)
                .bind(input.course_id)
                .bind(status.to_string())
                .bind(input.start_time)
                .bind(input.end_time)
                .bind(&graph)
                .bind(input.max_attempts_per_bubble)
                .bind(input.coins_per_bubble)
                .bind(input.time_limit_minutes)
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create session")?;

        Ok(Session {
            id,
            name: input.name.clone(),
            description: input.description.clone(),
            course_id: input.course_id,
            status,
            start_time: input.start_time,
            end_time: input.end_time,
            graph_json: input.graph_json.clone(),
            max_attempts_per_bubble: input.max_attempts_per_bubble,
            coins_per_bubble: input.coins_per_bubble,
            time_limit_minutes: input.time_limit_minutes,
            created_at: now,
            updated_at: None,
            published_at: None,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions s WHERE s.id = ?", SESSION_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get session")?
                .as_ref()
                .map(row_to_session_sqlite)
                .transpose(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get session")?
                .as_ref()
                .map(row_to_session_mysql)
                .transpose(),
        }
    }

    async fn update(&self, session: &Session) -> Result<Session> {
        let graph = encode_json(&session.graph_json)?;
        let now = Utc::now();

        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(UPDATE_SESSION)
                .bind(&session.name)
                .bind(&session.description)
                .bind(session.status.to_string())
                .bind(session.start_time)
                .bind(session.end_time)
                .bind(&graph)
                .bind(session.max_attempts_per_bubble)
                .bind(session.coins_per_bubble)
                .bind(session.time_limit_minutes)
                .bind(now)
                .bind(session.published_at)
                .bind(session.id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(UPDATE_SESSION)
                .bind(&session.name)
                .bind(&session.description)
                .bind(session.status.to_string())
                .bind(session.start_time)
                .bind(session.end_time)
                .bind(&graph)
                .bind(session.max_attempts_per_bubble)
                .bind(session.coins_per_bubble)
                .bind(session.time_limit_minutes)
                .bind(now)
                .bind(session.published_at)
                .bind(session.id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to update session")?;

        Ok(Session {
            updated_at: Some(now),
            ..session.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to delete session")
    }

    async fn list(&self, filter: &SessionFilter, params: &ListParams) -> Result<(Vec<Session>, i64)> {
        match self.pool.backend() {
            Backend::Sqlite(p) => list_sessions_sqlite(p, filter, Some(params)).await,
            Backend::Mysql(p) => list_sessions_mysql(p, filter, Some(params)).await,
        }
    }

    async fn list_all(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let (sessions, _) = match self.pool.backend() {
            Backend::Sqlite(p) => list_sessions_sqlite(p, filter, None).await?,
            Backend::Mysql(p) => list_sessions_mysql(p, filter, None).await?,
        };
        Ok(sessions)
    }
}

/// Build the listing SQL; without pagination the rows come back oldest first
fn list_sql(paged: bool) -> String {
    if paged {
        format!(
            "SELECT {} FROM sessions s {} ORDER BY s.start_time DESC, s.id DESC LIMIT ? OFFSET ?",
            SESSION_COLUMNS, SESSION_FILTER
        )
    } else {
        format!(
            "SELECT {} FROM sessions s {} ORDER BY s.id",
            SESSION_COLUMNS, SESSION_FILTER
        )
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn list_sessions_sqlite(
    pool: &SqlitePool,
    filter: &SessionFilter,
    params: Option<&ListParams>,
) -> Result<(Vec<Session>, i64)> {
    let status = filter.status.map(|s| s.to_string());

    let count_sql = format!("SELECT COUNT(*) FROM sessions s {}", SESSION_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(filter.course_id)
        .bind(filter.course_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.instructor_id)
        .bind(filter.instructor_id)
        .fetch_one(pool)
        .await
        .context("Failed to count sessions")?;

    let sql = list_sql(params.is_some());
    let mut query = sqlx::query(&sql)
        .bind(filter.course_id)
        .bind(filter.course_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.instructor_id)
        .bind(filter.instructor_id);
    if let Some(params) = params {
        query = query.bind(params.limit()).bind(params.offset());
    }
    let rows = query.fetch_all(pool).await.context("Failed to list sessions")?;

    let sessions = rows.iter().map(row_to_session_sqlite).collect::<Result<Vec<_>>>()?;
    Ok((sessions, total))
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let status: String = row.get("status");
    let graph: String = row.get("graph_json");

    Ok(Session {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        course_id: row.get("course_id"),
        status: SessionStatus::from_str(&status)?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        graph_json: decode_json(&graph, "graph_json")?,
        max_attempts_per_bubble: row.get("max_attempts_per_bubble"),
        coins_per_bubble: row.get("coins_per_bubble"),
        time_limit_minutes: row.get("time_limit_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        published_at: row.get("published_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn list_sessions_mysql(
    pool: &MySqlPool,
    filter: &SessionFilter,
    params: Option<&ListParams>,
) -> Result<(Vec<Session>, i64)> {
    let status = filter.status.map(|s| s.to_string());

    let count_sql = format!("SELECT COUNT(*) FROM sessions s {}", SESSION_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(filter.course_id)
        .bind(filter.course_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.instructor_id)
        .bind(filter.instructor_id)
        .fetch_one(pool)
        .await
        .context("Failed to count sessions")?;

    let sql = list_sql(params.is_some());
    let mut query = sqlx::query(&sql)
        .bind(filter.course_id)
        .bind(filter.course_id)
        .bind(&status)
        .bind(&status)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.active_at)
        .bind(filter.instructor_id)
        .bind(filter.instructor_id);
    if let Some(params) = params {
        query = query.bind(params.limit()).bind(params.offset());
    }
    let rows = query.fetch_all(pool).await.context("Failed to list sessions")?;

    let sessions = rows.iter().map(row_to_session_mysql).collect::<Result<Vec<_>>>()?;
    Ok((sessions, total))
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let status: String = row.get("status");
    let graph: String = row.get("graph_json");

    Ok(Session {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        course_id: row.get("course_id"),
        status: SessionStatus::from_str(&status)?,
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        graph_json: decode_json(&graph, "graph_json")?,
        max_attempts_per_bubble: row.get("max_attempts_per_bubble"),
        coins_per_bubble: row.get("coins_per_bubble"),
        time_limit_minutes: row.get("time_limit_minutes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        published_at: row.get("published_at"),
    })
}
