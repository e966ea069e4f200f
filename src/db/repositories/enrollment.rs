//! Enrollment repository

use crate::db::{Backend, DynDatabasePool};
use crate::models::{Enrollment, EnrollmentDetails, EnrollmentStatus, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

/// Enrollment repository trait
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Enroll a student in a course with status active
    async fn create(&self, student_id: i64, course_id: i64) -> Result<Enrollment>;

    /// Find the enrollment of a student in a course
    async fn get(&self, student_id: i64, course_id: i64) -> Result<Option<Enrollment>>;

    /// Enrollments of a course joined with student and course names
    async fn list_by_course(
        &self,
        course_id: i64,
        status: Option<EnrollmentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<EnrollmentDetails>, i64)>;

    /// Number of enrollments in a course
    async fn count_by_course(&self, course_id: i64) -> Result<i64>;
}

/// SQLx-based enrollment repository implementation
pub struct SqlxEnrollmentRepository {
    pool: DynDatabasePool,
}

impl SqlxEnrollmentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EnrollmentRepository> {
        Arc::new(Self::new(pool))
    }
}

const ENROLLMENT_COLUMNS: &str = "e.id, e.student_id, e.course_id, e.status, e.enrolled_at, \
     e.completed_at, e.progress_percentage, e.last_accessed_at";

const INSERT_ENROLLMENT: &str = r#"
    INSERT INTO enrollments (student_id, course_id, status, enrolled_at, progress_percentage)
    VALUES (?, ?, ?, ?, 0)
"#;

const DETAILS_FROM: &str = r#"
    FROM enrollments e
    INNER JOIN users u ON u.id = e.student_id
    INNER JOIN courses c ON c.id = e.course_id
    WHERE e.course_id = ? AND (? IS NULL OR e.status = ?)
"#;

const COUNT_BY_COURSE: &str = "SELECT COUNT(*) FROM enrollments WHERE course_id = ?";

#[async_trait]
impl EnrollmentRepository for SqlxEnrollmentRepository {
    async fn create(&self, student_id: i64, course_id: i64) -> Result<Enrollment> {
        let now = Utc::now();
        let status = EnrollmentStatus::Active;

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_ENROLLMENT)
                .bind(student_id)
                .bind(course_id)
                .bind(status.to_string())
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_rowid()),
            Backend::Mysql(p) => sqlx::query(INSERT_ENROLLMENT)
                .bind(student_id)
                .bind(course_id)
                .bind(status.to_string())
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.last_insert_id() as i64),
        }
        .context("Failed to create enrollment")?;

        Ok(Enrollment {
            id,
            student_id,
            course_id,
            status,
            enrolled_at: now,
            completed_at: None,
            progress_percentage: 0.0,
            last_accessed_at: None,
        })
    }

    async fn get(&self, student_id: i64, course_id: i64) -> Result<Option<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollments e WHERE e.student_id = ? AND e.course_id = ?",
            ENROLLMENT_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(student_id)
                .bind(course_id)
                .fetch_optional(p)
                .await
                .context("Failed to get enrollment")?
                .as_ref()
                .map(row_to_enrollment_sqlite)
                .transpose(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(student_id)
                .bind(course_id)
                .fetch_optional(p)
                .await
                .context("Failed to get enrollment")?
                .as_ref()
                .map(row_to_enrollment_mysql)
                .transpose(),
        }
    }

    async fn list_by_course(
        &self,
        course_id: i64,
        status: Option<EnrollmentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<EnrollmentDetails>, i64)> {
        let status = status.map(|s| s.to_string());
        let count_sql = format!("SELECT COUNT(*) {}", DETAILS_FROM);
        let sql = format!(
            "SELECT {}, u.username, u.first_name, u.last_name, u.email, c.name AS course_name {} \
             ORDER BY e.enrolled_at DESC, e.id DESC LIMIT ? OFFSET ?",
            ENROLLMENT_COLUMNS, DETAILS_FROM
        );

        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let (total,): (i64,) = sqlx::query_as(&count_sql)
                    .bind(course_id)
                    .bind(&status)
                    .bind(&status)
                    .fetch_one(p)
                    .await
                    .context("Failed to count enrollments")?;
                let rows = sqlx::query(&sql)
                    .bind(course_id)
                    .bind(&status)
                    .bind(&status)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(p)
                    .await
                    .context("Failed to list enrollments")?;
                let mut items = Vec::with_capacity(rows.len());
                for row in &rows {
                    items.push(EnrollmentDetails {
                        enrollment: row_to_enrollment_sqlite(row)?,
                        student_name: display_name(
                            row.get("first_name"),
                            row.get("last_name"),
                            row.get("username"),
                        ),
                        student_email: row.get("email"),
                        course_name: row.get("course_name"),
                    });
                }
                Ok((items, total))
            }
            Backend::Mysql(p) => {
                let (total,): (i64,) = sqlx::query_as(&count_sql)
                    .bind(course_id)
                    .bind(&status)
                    .bind(&status)
                    .fetch_one(p)
                    .await
                    .context("Failed to count enrollments")?;
                let rows = sqlx::query(&sql)
                    .bind(course_id)
                    .bind(&status)
                    .bind(&status)
                    .bind(params.limit())
                    .bind(params.offset())
                    .fetch_all(p)
                    .await
                    .context("Failed to list enrollments")?;
                let mut items = Vec::with_capacity(rows.len());
                for row in &rows {
                    items.push(EnrollmentDetails {
                        enrollment: row_to_enrollment_mysql(row)?,
                        student_name: display_name(
                            row.get("first_name"),
                            row.get("last_name"),
                            row.get("username"),
                        ),
                        student_email: row.get("email"),
                        course_name: row.get("course_name"),
                    });
                }
                Ok((items, total))
            }
        }
    }

    async fn count_by_course(&self, course_id: i64) -> Result<i64> {
        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(COUNT_BY_COURSE).bind(course_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as(COUNT_BY_COURSE).bind(course_id).fetch_one(p).await,
        }
        .context("Failed to count enrollments")?;
        Ok(count)
    }
}

fn display_name(first: Option<String>, last: Option<String>, username: String) -> String {
    match (first, last) {
        (Some(f), Some(l)) => format!("{} {}", f, l),
        (Some(f), None) => f,
        (None, Some(l)) => l,
        (None, None) => username,
    }
}

fn row_to_enrollment_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Enrollment> {
    let status: String = row.get("status");
    Ok(Enrollment {
        id: row.get("id"),
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        status: EnrollmentStatus::from_str(&status)?,
        enrolled_at: row.get("enrolled_at"),
        completed_at: row.get("completed_at"),
        progress_percentage: row.get("progress_percentage"),
        last_accessed_at: row.get("last_accessed_at"),
    })
}

fn row_to_enrollment_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Enrollment> {
    let status: String = row.get("status");
    Ok(Enrollment {
        id: row.get("id"),
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        status: EnrollmentStatus::from_str(&status)?,
        enrolled_at: row.get("enrolled_at"),
        completed_at: row.get("completed_at"),
        progress_percentage: row.get("progress_percentage"),
        last_accessed_at: row.get("last_accessed_at"),
    })
}
