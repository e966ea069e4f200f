//! Student progress repository

use super::{decode_json, encode_json};
use crate::db::{Backend, DynDatabasePool};
use crate::models::StudentState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

/// Student progress repository trait
#[async_trait]
pub trait StudentStateRepository: Send + Sync {
    /// Insert a new progress row; fails if the student already has one for the session
    async fn create(&self, state: &StudentState) -> Result<StudentState>;

    async fn get(&self, student_id: i64, session_id: i64) -> Result<Option<StudentState>>;

    /// Persist every mutable column of `state`
    async fn update(&self, state: &StudentState) -> Result<()>;

    async fn list_by_session(&self, session_id: i64) -> Result<Vec<StudentState>>;

    /// Progress rows of a student, most recently active first
    async fn list_by_student(&self, student_id: i64) -> Result<Vec<StudentState>>;

    async fn count_by_session(&self, session_id: i64) -> Result<i64>;
}

/// SQLx-based student progress repository implementation
pub struct SqlxStudentStateRepository {
    pool: DynDatabasePool,
}

impl SqlxStudentStateRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StudentStateRepository> {
        Arc::new(Self::new(pool))
    }
}

const STATE_COLUMNS: &str = "id, student_id, session_id, current_node_id, completed_nodes, \
     failed_attempts, total_coins, is_completed, completion_percentage, started_at, \
     last_activity_at, completed_at, total_time_spent";

const INSERT_STATE: &str = r#"
    INSERT INTO student_states (student_id, session_id, current_node_id, completed_nodes,
                                failed_attempts, total_coins, is_completed, completion_percentage,
                                started_at, last_activity_at, completed_at, total_time_spent)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_STATE: &str = r#"
    UPDATE student_states
    SET current_node_id = ?, completed_nodes = ?, failed_attempts = ?, total_coins = ?,
        is_completed = ?, completion_percentage = ?, last_activity_at = ?, completed_at = ?,
        total_time_spent = ?
    WHERE id = ?
"#;

#[async_trait]
impl StudentStateRepository for SqlxStudentStateRepository {
    async fn create(&self, state: &StudentState) -> Result<StudentState> {
        let completed = encode_json(&state.completed_nodes)?;
        let failed = encode_json(&state.failed_attempts)?;

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_STATE)
                .bind(state.student_id)
                .bind(state.session_id)
                .bind(&state.current_node_id)
                .bind(&completed)
                .bind(&failed)
                .bind(state.total_coins)
                .bind(state.is_completed)
                .bind(state.completion_percentage)
                .bind(state.started_at)
                .bind(state.last_activity_at)
                .bind(state.completed_at)
                .bind(state.total_time_spent)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(INSERT_STATE)
                .bind(state.student_id)
                .bind(state.session_id)
                .bind(&state.current_node_id)
                .bind(&completed)
                .bind(&failed)
                .bind(state.total_coins)
                .bind(state.is_completed)
                .bind(state.completion_percentage)
                .bind(state.started_at)
                .bind(state.last_activity_at)
                .bind(state.completed_at)
                .bind(state.total_time_spent)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create student state")?;

        Ok(StudentState {
            id,
            ..state.clone()
        })
    }

    async fn get(&self, student_id: i64, session_id: i64) -> Result<Option<StudentState>> {
        let sql = format!(
            "SELECT {} FROM student_states WHERE student_id = ? AND session_id = ?",
            STATE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(student_id)
                .bind(session_id)
                .fetch_optional(p)
                .await
                .context("Failed to get student state")?
                .as_ref()
                .map(row_to_state_sqlite)
                .transpose(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(student_id)
                .bind(session_id)
                .fetch_optional(p)
                .await
                .context("Failed to get student state")?
                .as_ref()
                .map(row_to_state_mysql)
                .transpose(),
        }
    }

    async fn update(&self, state: &StudentState) -> Result<()> {
        let completed = encode_json(&state.completed_nodes)?;
        let failed = encode_json(&state.failed_attempts)?;

        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(UPDATE_STATE)
                .bind(&state.current_node_id)
                .bind(&completed)
                .bind(&failed)
                .bind(state.total_coins)
                .bind(state.is_completed)
                .bind(state.completion_percentage)
                .bind(state.last_activity_at)
                .bind(state.completed_at)
                .bind(state.total_time_spent)
                .bind(state.id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(UPDATE_STATE)
                .bind(&state.current_node_id)
                .bind(&completed)
                .bind(&failed)
                .bind(state.total_coins)
                .bind(state.is_completed)
                .bind(state.completion_percentage)
                .bind(state.last_activity_at)
                .bind(state.completed_at)
                .bind(state.total_time_spent)
                .bind(state.id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to update student state")
    }

    async fn list_by_session(&self, session_id: i64) -> Result<Vec<StudentState>> {
        let sql = format!(
            "SELECT {} FROM student_states WHERE session_id = ? ORDER BY id",
            STATE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(session_id)
                .fetch_all(p)
                .await
                .context("Failed to list student states")?
                .iter()
                .map(row_to_state_sqlite)
                .collect(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(session_id)
                .fetch_all(p)
                .await
                .context("Failed to list student states")?
                .iter()
                .map(row_to_state_mysql)
                .collect(),
        }
    }

    async fn list_by_student(&self, student_id: i64) -> Result<Vec<StudentState>> {
        let sql = format!(
            "SELECT {} FROM student_states WHERE student_id = ? ORDER BY last_activity_at DESC, id DESC",
            STATE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(student_id)
                .fetch_all(p)
                .await
                .context("Failed to list student states")?
                .iter()
                .map(row_to_state_sqlite)
                .collect(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(student_id)
                .fetch_all(p)
                .await
                .context("Failed to list student states")?
                .iter()
                .map(row_to_state_mysql)
                .collect(),
        }
    }

    async fn count_by_session(&self, session_id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM student_states WHERE session_id = ?";
        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(sql).bind(session_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as(sql).bind(session_id).fetch_one(p).await,
        }
        .context("Failed to count student states")?;
        Ok(count)
    }
}

fn row_to_state_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<StudentState> {
    let completed: String = row.get("completed_nodes");
    let failed: String = row.get("failed_attempts");

    Ok(StudentState {
        id: row.get("id"),
        student_id: row.get("student_id"),
        session_id: row.get("session_id"),
        current_node_id: row.get("current_node_id"),
        completed_nodes: decode_json(&completed, "completed_nodes")?,
        failed_attempts: decode_json(&failed, "failed_attempts")?,
        total_coins: row.get("total_coins"),
        is_completed: row.get("is_completed"),
        completion_percentage: row.get("completion_percentage"),
        started_at: row.get("started_at"),
        last_activity_at: row.get("last_activity_at"),
        completed_at: row.get("completed_at"),
        total_time_spent: row.get("total_time_spent"),
    })
}

fn row_to_state_mysql(row: &sqlx::mysql::MySqlRow) -> Result<StudentState> {
    let completed: String = row.get("completed_nodes");
    let failed: String = row.get("failed_attempts");

    Ok(StudentState {
        id: row.get("id"),
        student_id: row.get("student_id"),
        session_id: row.get("session_id"),
        current_node_id: row.get("current_node_id"),
        completed_nodes: decode_json(&completed, "completed_nodes")?,
        failed_attempts: decode_json(&failed, "failed_attempts")?,
        total_coins: row.get("total_coins"),
        is_completed: row.get("is_completed"),
        completion_percentage: row.get("completion_percentage"),
        started_at: row.get("started_at"),
        last_activity_at: row.get("last_activity_at"),
        completed_at: row.get("completed_at"),
        total_time_spent: row.get("total_time_spent"),
    })
}
