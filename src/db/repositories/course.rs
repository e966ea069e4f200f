//! Course repository
//!
//! Database operations for courses and the counters shown next to them.

use super::{decode_json, encode_json};
use crate::db::{Backend, DynDatabasePool};
use crate::models::{Course, CourseFilter, CreateCourseInput, ListParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Course repository trait
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Create a course owned by `instructor_id`
    async fn create(&self, instructor_id: i64, input: &CreateCourseInput) -> Result<Course>;

    /// Get course by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Course>>;

    /// Persist every mutable column of `course`
    async fn update(&self, course: &Course) -> Result<Course>;

    /// Delete a course
    async fn delete(&self, id: i64) -> Result<()>;

    /// List courses matching `filter`, returning the page and the total
    async fn list(&self, filter: &CourseFilter, params: &ListParams) -> Result<(Vec<Course>, i64)>;

    /// All courses, or only those owned by `instructor_id`
    async fn list_owned(&self, instructor_id: Option<i64>) -> Result<Vec<Course>>;

    /// Number of sessions in the course
    async fn session_count(&self, course_id: i64) -> Result<i64>;

    /// Distinct students with progress in any session of the course
    async fn student_count(&self, course_id: i64) -> Result<i64>;
}

/// SQLx-based course repository implementation
pub struct SqlxCourseRepository {
    pool: DynDatabasePool,
}

impl SqlxCourseRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CourseRepository> {
        Arc::new(Self::new(pool))
    }
}

const COURSE_COLUMNS: &str = "id, name, description, subject, difficulty_level, estimated_duration, \
     is_active, is_public, requires_approval, learning_objectives, prerequisites, tags, \
     instructor_id, created_at, updated_at";

const INSERT_COURSE: &str = r#"
    INSERT INTO courses (name, description, subject, difficulty_level, estimated_duration,
                         is_active, is_public, requires_approval, learning_objectives,
                         prerequisites, tags, instructor_id, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_COURSE: &str = r#"
    UPDATE courses
    SET name = ?, description = ?, subject = ?, difficulty_level = ?, estimated_duration = ?,
        is_active = ?, is_public = ?, requires_approval = ?, learning_objectives = ?,
        prerequisites = ?, tags = ?, updated_at = ?
    WHERE id = ?
"#;

const COURSE_FILTER: &str = r#"
    WHERE (? IS NULL OR subject = ?)
      AND (? IS NULL OR difficulty_level = ?)
      AND (? IS NULL OR is_public = ?)
      AND (? IS NULL OR (is_active = 1 AND (is_public = 1
           OR id IN (SELECT course_id FROM enrollments WHERE student_id = ?))))
      AND (? IS NULL OR instructor_id = ? OR is_public = 1)
"#;

const SESSION_COUNT: &str = "SELECT COUNT(*) FROM sessions WHERE course_id = ?";

const STUDENT_COUNT: &str = r#"
    SELECT COUNT(DISTINCT ss.student_id)
    FROM student_states ss
    INNER JOIN sessions s ON s.id = ss.session_id
    WHERE s.course_id = ?
"#;

/// Column values shared by insert and update
struct CourseJson {
    objectives: String,
    prerequisites: String,
    tags: String,
}

impl CourseJson {
    fn encode(objectives: &[String], prerequisites: &[String], tags: &serde_json::Value) -> Result<Self> {
        Ok(Self {
            objectives: encode_json(&objectives)?,
            prerequisites: encode_json(&prerequisites)?,
            tags: encode_json(tags)?,
        })
    }
}

#[async_trait]
impl CourseRepository for SqlxCourseRepository {
    async fn create(&self, instructor_id: i64, input: &CreateCourseInput) -> Result<Course> {
        let json = CourseJson::encode(&input.learning_objectives, &input.prerequisites, &input.tags)?;
        let now = Utc::now();

        let id = match self.pool.backend() {
            Backend::Sqlite(p) => insert_course_sqlite(p, instructor_id, input, &json, now).await?,
            Backend::Mysql(p) => insert_course_mysql(p, instructor_id, input, &json, now).await?,
        };

        Ok(Course {
            id,
            name: input.name.clone(),
            description: input.description.clone(),
            subject: input.subject.clone(),
            difficulty_level: input.difficulty_level.clone(),
            estimated_duration: input.estimated_duration,
            is_active: true,
            is_public: input.is_public,
            requires_approval: input.requires_approval,
            learning_objectives: input.learning_objectives.clone(),
            prerequisites: input.prerequisites.clone(),
            tags: input.tags.clone(),
            instructor_id,
            created_at: now,
            updated_at: None,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Course>> {
        let sql = format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get course")?
                .as_ref()
                .map(row_to_course_sqlite)
                .transpose(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get course")?
                .as_ref()
                .map(row_to_course_mysql)
                .transpose(),
        }
    }

    async fn update(&self, course: &Course) -> Result<Course> {
        let json = CourseJson::encode(&course.learning_objectives, &course.prerequisites, &course.tags)?;
        let now = Utc::now();

        match self.pool.backend() {
            Backend::Sqlite(p) => update_course_sqlite(p, course, &json, now).await?,
            Backend::Mysql(p) => update_course_mysql(p, course, &json, now).await?,
        }

        Ok(Course {
            updated_at: Some(now),
            ..course.clone()
        })
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query("DELETE FROM courses WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query("DELETE FROM courses WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to delete course")
    }

    async fn list(&self, filter: &CourseFilter, params: &ListParams) -> Result<(Vec<Course>, i64)> {
        match self.pool.backend() {
            Backend::Sqlite(p) => list_courses_sqlite(p, filter, params).await,
            Backend::Mysql(p) => list_courses_mysql(p, filter, params).await,
        }
    }

    async fn list_owned(&self, instructor_id: Option<i64>) -> Result<Vec<Course>> {
        let sql = format!(
            "SELECT {} FROM courses WHERE (? IS NULL OR instructor_id = ?) ORDER BY id",
            COURSE_COLUMNS
        );
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(&sql)
                .bind(instructor_id)
                .bind(instructor_id)
                .fetch_all(p)
                .await
                .context("Failed to list courses")?
                .iter()
                .map(row_to_course_sqlite)
                .collect(),
            Backend::Mysql(p) => sqlx::query(&sql)
                .bind(instructor_id)
                .bind(instructor_id)
                .fetch_all(p)
                .await
                .context("Failed to list courses")?
                .iter()
                .map(row_to_course_mysql)
                .collect(),
        }
    }

    async fn session_count(&self, course_id: i64) -> Result<i64> {
        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(SESSION_COUNT).bind(course_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as(SESSION_COUNT).bind(course_id).fetch_one(p).await,
        }
        .context("Failed to count course sessions")?;
        Ok(count)
    }

    async fn student_count(&self, course_id: i64) -> Result<i64> {
        let (count,): (i64,) = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as(STUDENT_COUNT).bind(course_id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as(STUDENT_COUNT).bind(course_id).fetch_one(p).await,
        }
        .context("Failed to count course students")?;
        Ok(count)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn insert_course_sqlite(
    pool: &SqlitePool,
    instructor_id: i64,
    input: &CreateCourseInput,
    json: &CourseJson,
    now: chrono::DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(INSERT_COURSE)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.subject)
        .bind(&input.difficulty_level)
        .bind(input.estimated_duration)
        .bind(true)
        .bind(input.is_public)
        .bind(input.requires_approval)
        .bind(&json.objectives)
        .bind(&json.prerequisites)
        .bind(&json.tags)
        .bind(instructor_id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create course")?;
    Ok(result.last_insert_rowid())
}

async fn update_course_sqlite(
    pool: &SqlitePool,
    course: &Course,
    json: &CourseJson,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    sqlx::query(UPDATE_COURSE)
        .bind(&course.name)
        .bind(&course.description)
        .bind(&course.subject)
        .bind(&course.difficulty_level)
        .bind(course.estimated_duration)
        .bind(course.is_active)
        .bind(course.is_public)
        .bind(course.requires_approval)
        .bind(&json.objectives)
        .bind(&json.prerequisites)
        .bind(&json.tags)
        .bind(now)
        .bind(course.id)
        .execute(pool)
        .await
        .context("Failed to update course")?;
    Ok(())
}

async fn list_courses_sqlite(
    pool: &SqlitePool,
    filter: &CourseFilter,
    params: &ListParams,
) -> Result<(Vec<Course>, i64)> {
    let count_sql = format!("SELECT COUNT(*) FROM courses {}", COURSE_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.subject)
        .bind(&filter.subject)
        .bind(&filter.difficulty_level)
        .bind(&filter.difficulty_level)
        .bind(filter.is_public)
        .bind(filter.is_public)
        .bind(filter.visible_to_student)
        .bind(filter.visible_to_student)
        .bind(filter.owned_by_or_public)
        .bind(filter.owned_by_or_public)
        .fetch_one(pool)
        .await
        .context("Failed to count courses")?;

    let sql = format!(
        "SELECT {} FROM courses {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        COURSE_COLUMNS, COURSE_FILTER
    );
    let rows = sqlx::query(&sql)
        .bind(&filter.subject)
        .bind(&filter.subject)
        .bind(&filter.difficulty_level)
        .bind(&filter.difficulty_level)
        .bind(filter.is_public)
        .bind(filter.is_public)
        .bind(filter.visible_to_student)
        .bind(filter.visible_to_student)
        .bind(filter.owned_by_or_public)
        .bind(filter.owned_by_or_public)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?;

    let courses = rows.iter().map(row_to_course_sqlite).collect::<Result<Vec<_>>>()?;
    Ok((courses, total))
}

fn row_to_course_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Course> {
    let objectives: String = row.get("learning_objectives");
    let prerequisites: String = row.get("prerequisites");
    let tags: String = row.get("tags");

    Ok(Course {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        subject: row.get("subject"),
        difficulty_level: row.get("difficulty_level"),
        estimated_duration: row.get("estimated_duration"),
        is_active: row.get("is_active"),
        is_public: row.get("is_public"),
        requires_approval: row.get("requires_approval"),
        learning_objectives: decode_json(&objectives, "learning_objectives")?,
        prerequisites: decode_json(&prerequisites, "prerequisites")?,
        tags: decode_json(&tags, "tags")?,
        instructor_id: row.get("instructor_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn insert_course_mysql(
    pool: &MySqlPool,
    instructor_id: i64,
    input: &CreateCourseInput,
    json: &CourseJson,
    now: chrono::DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(INSERT_COURSE)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.subject)
        .bind(&input.difficulty_level)
        .bind(input.estimated_duration)
        .bind(true)
        .bind(input.is_public)
        .bind(input.requires_approval)
        .bind(&json.objectives)
        .bind(&json.prerequisites)
        .bind(&json.tags)
        .bind(instructor_id)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create course")?;
    Ok(result.last_insert_id() as i64)
}

async fn update_course_mysql(
    pool: &MySqlPool,
    course: &Course,
    json: &CourseJson,
    now: chrono::DateTime<Utc>,
) -> Result<()> {
    sqlx::query(UPDATE_COURSE)
        .bind(&course.name)
        .bind(&course.description)
        .bind(&course.subject)
        .bind(&course.difficulty_level)
        .bind(course.estimated_duration)
        .bind(course.is_active)
        .bind(course.is_public)
        .bind(course.requires_approval)
        .bind(&json.objectives)
        .bind(&json.prerequisites)
        .bind(&json.tags)
        .bind(now)
        .bind(course.id)
        .execute(pool)
        .await
        .context("Failed to update course")?;
    Ok(())
}

async fn list_courses_mysql(
    pool: &MySqlPool,
    filter: &CourseFilter,
    params: &ListParams,
) -> Result<(Vec<Course>, i64)> {
    let count_sql = format!("SELECT COUNT(*) FROM courses {}", COURSE_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.subject)
        .bind(&filter.subject)
        .bind(&filter.difficulty_level)
        .bind(&filter.difficulty_level)
        .bind(filter.is_public)
        .bind(filter.is_public)
        .bind(filter.visible_to_student)
        .bind(filter.visible_to_student)
        .bind(filter.owned_by_or_public)
        .bind(filter.owned_by_or_public)
        .fetch_one(pool)
        .await
        .context("Failed to count courses")?;

    let sql = format!(
        "SELECT {} FROM courses {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        COURSE_COLUMNS, COURSE_FILTER
    );
    let rows = sqlx::query(&sql)
        .bind(&filter.subject)
        .bind(&filter.subject)
        .bind(&filter.difficulty_level)
        .bind(&filter.difficulty_level)
        .bind(filter.is_public)
        .bind(filter.is_public)
        .bind(filter.visible_to_student)
        .bind(filter.visible_to_student)
        .bind(filter.owned_by_or_public)
        .bind(filter.owned_by_or_public)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list courses")?;

    let courses = rows.iter().map(row_to_course_mysql).collect::<Result<Vec<_>>>()?;
    Ok((courses, total))
}

fn row_to_course_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Course> {
    let objectives: String = row.get("learning_objectives");
    let prerequisites: String = row.get("prerequisites");
    let tags: String = row.get("tags");

    Ok(Course {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        subject: row.get("subject"),
        difficulty_level: row.get("difficulty_level"),
        estimated_duration: row.get("estimated_duration"),
        is_active: row.get("is_active"),
        is_public: row.get("is_public"),
        requires_approval: row.get("requires_approval"),
        learning_objectives: decode_json(&objectives, "learning_objectives")?,
        prerequisites: decode_json(&prerequisites, "prerequisites")?,
        tags: decode_json(&tags, "tags")?,
        instructor_id: row.get("instructor_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
