//! Database migrations module
//!
//! Code-based database migrations for the AI tutor backend. All migrations
//! are embedded directly in Rust code as SQL strings, one variant for SQLite
//! and one for MySQL, so the binary can bootstrap an empty database.
//!
//! # Usage
//!
//! ```ignore
//! use ai_tutor::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! Each migration is defined as a `Migration` struct containing:
//! - `version`: Unique version number for ordering
//! - `name`: Human-readable migration name
//! - `up_sqlite`: SQL for SQLite database
//! - `up_mysql`: SQL for MySQL database
//!
//! Timestamp columns are always written by the application, never by column
//! defaults, so that values compare consistently inside SQLite.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};

use super::{Backend, DynDatabasePool};
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    /// Migration version number
    pub version: i64,
    /// Migration name/description
    pub name: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// All schema migrations, applied in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'student',
                first_name VARCHAR(50),
                last_name VARCHAR(50),
                avatar_url VARCHAR(500),
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_verified BOOLEAN NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP,
                last_login TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(50) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'student',
                first_name VARCHAR(50) NULL,
                last_name VARCHAR(50) NULL,
                avatar_url VARCHAR(500) NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NULL,
                last_login DATETIME(6) NULL
            );
            CREATE INDEX idx_users_role ON users(role);
        "#,
    },
    Migration {
        version: 2,
        name: "create_auth_tokens",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token_hash VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_auth_tokens_user_id ON auth_tokens(user_id);
            CREATE INDEX IF NOT EXISTS idx_auth_tokens_expires_at ON auth_tokens(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token_hash VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at DATETIME(6) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_auth_tokens_expires_at ON auth_tokens(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_courses",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(200) NOT NULL,
                description TEXT,
                subject VARCHAR(100),
                difficulty_level VARCHAR(20) NOT NULL DEFAULT 'beginner',
                estimated_duration INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_public BOOLEAN NOT NULL DEFAULT 0,
                requires_approval BOOLEAN NOT NULL DEFAULT 0,
                learning_objectives TEXT NOT NULL,
                prerequisites TEXT NOT NULL,
                tags TEXT NOT NULL,
                instructor_id INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP,
                FOREIGN KEY (instructor_id) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_courses_instructor_id ON courses(instructor_id);
            CREATE INDEX IF NOT EXISTS idx_courses_subject ON courses(subject);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS courses (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(200) NOT NULL,
                description TEXT NULL,
                subject VARCHAR(100) NULL,
                difficulty_level VARCHAR(20) NOT NULL DEFAULT 'beginner',
                estimated_duration BIGINT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                requires_approval BOOLEAN NOT NULL DEFAULT FALSE,
                learning_objectives TEXT NOT NULL,
                prerequisites TEXT NOT NULL,
                tags TEXT NOT NULL,
                instructor_id BIGINT NOT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NULL,
                FOREIGN KEY (instructor_id) REFERENCES users(id)
            );
            CREATE INDEX idx_courses_subject ON courses(subject);
        "#,
    },
    Migration {
        version: 4,
        name: "create_enrollments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS enrollments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                enrolled_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                progress_percentage REAL NOT NULL DEFAULT 0,
                last_accessed_at TIMESTAMP,
                UNIQUE (student_id, course_id),
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_enrollments_course_id ON enrollments(course_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS enrollments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                student_id BIGINT NOT NULL,
                course_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                enrolled_at DATETIME(6) NOT NULL,
                completed_at DATETIME(6) NULL,
                progress_percentage DOUBLE NOT NULL DEFAULT 0,
                last_accessed_at DATETIME(6) NULL,
                UNIQUE KEY uk_enrollments_student_course (student_id, course_id),
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 5,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(200) NOT NULL,
                description TEXT,
                course_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                start_time TIMESTAMP NOT NULL,
                end_time TIMESTAMP NOT NULL,
                graph_json TEXT NOT NULL,
                max_attempts_per_bubble INTEGER NOT NULL DEFAULT 3,
                coins_per_bubble INTEGER NOT NULL DEFAULT 10,
                time_limit_minutes INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP,
                published_at TIMESTAMP,
                FOREIGN KEY (course_id) REFERENCES courses(id)
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_course_id ON sessions(course_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(200) NOT NULL,
                description TEXT NULL,
                course_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                start_time DATETIME(6) NOT NULL,
                end_time DATETIME(6) NOT NULL,
                graph_json LONGTEXT NOT NULL,
                max_attempts_per_bubble BIGINT NOT NULL DEFAULT 3,
                coins_per_bubble BIGINT NOT NULL DEFAULT 10,
                time_limit_minutes BIGINT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NULL,
                published_at DATETIME(6) NULL,
                FOREIGN KEY (course_id) REFERENCES courses(id)
            );
            CREATE INDEX idx_sessions_status ON sessions(status);
        "#,
    },
    Migration {
        version: 6,
        name: "create_bubble_nodes",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS bubble_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id VARCHAR(100) NOT NULL,
                session_id INTEGER NOT NULL,
                node_type VARCHAR(20) NOT NULL,
                title VARCHAR(200) NOT NULL,
                content_md TEXT,
                code_template TEXT,
                test_cases TEXT,
                expected_output TEXT,
                hints TEXT NOT NULL,
                tutor_prompt TEXT,
                success_message TEXT,
                failure_message TEXT,
                coin_reward INTEGER NOT NULL DEFAULT 10,
                bonus_conditions TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP,
                UNIQUE (session_id, node_id),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS bubble_nodes (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                node_id VARCHAR(100) NOT NULL,
                session_id BIGINT NOT NULL,
                node_type VARCHAR(20) NOT NULL,
                title VARCHAR(200) NOT NULL,
                content_md LONGTEXT NULL,
                code_template LONGTEXT NULL,
                test_cases TEXT NULL,
                expected_output TEXT NULL,
                hints TEXT NOT NULL,
                tutor_prompt TEXT NULL,
                success_message TEXT NULL,
                failure_message TEXT NULL,
                coin_reward BIGINT NOT NULL DEFAULT 10,
                bonus_conditions TEXT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NULL,
                UNIQUE KEY uk_bubble_nodes_session_node (session_id, node_id),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 7,
        name: "create_student_states",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS student_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                session_id INTEGER NOT NULL,
                current_node_id VARCHAR(100),
                completed_nodes TEXT NOT NULL,
                failed_attempts TEXT NOT NULL,
                total_coins INTEGER NOT NULL DEFAULT 0,
                is_completed BOOLEAN NOT NULL DEFAULT 0,
                completion_percentage REAL NOT NULL DEFAULT 0,
                started_at TIMESTAMP NOT NULL,
                last_activity_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                total_time_spent INTEGER NOT NULL DEFAULT 0,
                UNIQUE (student_id, session_id),
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
            CREATE INDEX IF NOT EXISTS idx_student_states_session_id ON student_states(session_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS student_states (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                student_id BIGINT NOT NULL,
                session_id BIGINT NOT NULL,
                current_node_id VARCHAR(100) NULL,
                completed_nodes TEXT NOT NULL,
                failed_attempts TEXT NOT NULL,
                total_coins BIGINT NOT NULL DEFAULT 0,
                is_completed BOOLEAN NOT NULL DEFAULT FALSE,
                completion_percentage DOUBLE NOT NULL DEFAULT 0,
                started_at DATETIME(6) NOT NULL,
                last_activity_at DATETIME(6) NOT NULL,
                completed_at DATETIME(6) NULL,
                total_time_spent BIGINT NOT NULL DEFAULT 0,
                UNIQUE KEY uk_student_states_student_session (student_id, session_id),
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );
        "#,
    },
    Migration {
        version: 8,
        name: "create_event_logs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS event_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type VARCHAR(30) NOT NULL,
                student_id INTEGER NOT NULL,
                session_id INTEGER,
                node_id VARCHAR(100),
                payload TEXT,
                response_time_ms INTEGER,
                success BOOLEAN,
                score REAL,
                user_agent VARCHAR(500),
                ip_address VARCHAR(45),
                timestamp TIMESTAMP NOT NULL,
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_event_logs_student_id ON event_logs(student_id);
            CREATE INDEX IF NOT EXISTS idx_event_logs_session_id ON event_logs(session_id);
            CREATE INDEX IF NOT EXISTS idx_event_logs_timestamp ON event_logs(timestamp);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS event_logs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                event_type VARCHAR(30) NOT NULL,
                student_id BIGINT NOT NULL,
                session_id BIGINT NULL,
                node_id VARCHAR(100) NULL,
                payload TEXT NULL,
                response_time_ms BIGINT NULL,
                success BOOLEAN NULL,
                score DOUBLE NULL,
                user_agent VARCHAR(500) NULL,
                ip_address VARCHAR(45) NULL,
                `timestamp` DATETIME(6) NOT NULL,
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_event_logs_session_id ON event_logs(session_id);
            CREATE INDEX idx_event_logs_timestamp ON event_logs(`timestamp`);
        "#,
    },
    Migration {
        version: 9,
        name: "create_coin_transactions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS coin_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                transaction_type VARCHAR(20) NOT NULL,
                amount INTEGER NOT NULL,
                session_id INTEGER,
                node_id VARCHAR(100),
                description VARCHAR(200) NOT NULL,
                metadata TEXT,
                balance_before INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_coin_transactions_student_id ON coin_transactions(student_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS coin_transactions (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                student_id BIGINT NOT NULL,
                transaction_type VARCHAR(20) NOT NULL,
                amount BIGINT NOT NULL,
                session_id BIGINT NULL,
                node_id VARCHAR(100) NULL,
                description VARCHAR(200) NOT NULL,
                metadata TEXT NULL,
                balance_before BIGINT NOT NULL,
                balance_after BIGINT NOT NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (student_id) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
];

/// Run all pending migrations
///
/// This function:
/// 1. Creates the migrations tracking table if it doesn't exist
/// 2. Checks which migrations have already been applied
/// 3. Runs any pending migrations in order
///
/// # Arguments
///
/// * `pool` - Database connection pool
///
/// # Returns
///
/// Number of migrations applied
///
/// # Errors
///
/// Returns an error if any migration fails to apply
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

const SELECT_APPLIED: &str = "SELECT version, name, applied_at FROM _migrations ORDER BY version";

/// Get list of already applied migrations
async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    match pool.backend() {
        Backend::Sqlite(p) => get_applied_migrations_sqlite(p).await,
        Backend::Mysql(p) => get_applied_migrations_mysql(p).await,
    }
}

async fn get_applied_migrations_sqlite(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query(SELECT_APPLIED).fetch_all(pool).await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

async fn get_applied_migrations_mysql(pool: &MySqlPool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query(SELECT_APPLIED).fetch_all(pool).await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

/// Apply a single migration
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    match pool.backend() {
        Backend::Sqlite(p) => apply_migration_sqlite(p, migration).await,
        Backend::Mysql(p) => apply_migration_mysql(p, migration).await,
    }
}

async fn apply_migration_sqlite(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    // Migration SQL may contain multiple statements
    for statement in split_sql_statements(migration.up_sqlite) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

async fn apply_migration_mysql(pool: &MySqlPool, migration: &Migration) -> Result<()> {
    for statement in split_sql_statements(migration.up_mysql) {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(applied.len() == MIGRATIONS.len())
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

/// Get migration by version
pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    fn sqlite(pool: &DynDatabasePool) -> &SqlitePool {
        match pool.backend() {
            Backend::Sqlite(p) => p,
            Backend::Mysql(_) => panic!("migration tests run on SQLite"),
        }
    }

    async fn insert_user(pool: &SqlitePool, username: &str, role: &str) -> sqlx::Result<i64> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(format!("{}@example.com", username))
        .bind("hash123")
        .bind(role)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        // Running again should apply 0 migrations
        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_up_to_date() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let up_to_date = is_up_to_date(&pool).await.expect("Failed to check");
        assert!(!up_to_date);

        run_migrations(&pool).await.expect("Failed to run migrations");
        let up_to_date = is_up_to_date(&pool).await.expect("Failed to check");
        assert!(up_to_date);
    }

    #[tokio::test]
    async fn test_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");
        let pending = pending_count(&pool).await.expect("Failed to check");
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_users_table_defaults() {
        let pool = migrated_pool().await;
        let sqlite_pool = sqlite(&pool);

        let id = insert_user(sqlite_pool, "instructor", "instructor")
            .await
            .expect("Failed to insert user");

        let row = sqlx::query("SELECT is_active, is_verified FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(sqlite_pool)
            .await
            .expect("Failed to read user");
        let is_active: bool = row.get("is_active");
        let is_verified: bool = row.get("is_verified");
        assert!(is_active);
        assert!(!is_verified);
    }

    #[tokio::test]
    async fn test_auth_token_requires_user() {
        let pool = migrated_pool().await;
        let sqlite_pool = sqlite(&pool);

        let result = sqlx::query(
            "INSERT INTO auth_tokens (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind("abc")
        .bind(999i64)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unique_username() {
        let pool = migrated_pool().await;
        let sqlite_pool = sqlite(&pool);

        insert_user(sqlite_pool, "alice", "student").await.expect("first insert");
        let duplicate = sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind("alice")
        .bind("other@example.com")
        .bind("hash")
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await;

        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_enrollment_pair_is_unique() {
        let pool = migrated_pool().await;
        let sqlite_pool = sqlite(&pool);

        let instructor = insert_user(sqlite_pool, "instructor", "instructor").await.unwrap();
        let student = insert_user(sqlite_pool, "pupil", "student").await.unwrap();
        let course = sqlx::query(
            "INSERT INTO courses (name, learning_objectives, prerequisites, tags, instructor_id, created_at) VALUES (?, '[]', '[]', '{}', ?, ?)",
        )
        .bind("Rust 101")
        .bind(instructor)
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await
        .expect("Failed to create course")
        .last_insert_rowid();

        let enroll = || {
            sqlx::query(
                "INSERT INTO enrollments (student_id, course_id, enrolled_at) VALUES (?, ?, ?)",
            )
            .bind(student)
            .bind(course)
            .bind(Utc::now())
            .execute(sqlite_pool)
        };

        assert!(enroll().await.is_ok());
        assert!(enroll().await.is_err());
    }

    #[tokio::test]
    async fn test_bubble_nodes_cascade_with_session() {
        let pool = migrated_pool().await;
        let sqlite_pool = sqlite(&pool);

        let instructor = insert_user(sqlite_pool, "instructor", "instructor").await.unwrap();
        let course = sqlx::query(
            "INSERT INTO courses (name, learning_objectives, prerequisites, tags, instructor_id, created_at) VALUES ('C', '[]', '[]', '{}', ?, ?)",
        )
        .bind(instructor)
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await
        .unwrap()
        .last_insert_rowid();
        let session = sqlx::query(
            "INSERT INTO sessions (name, course_id, start_time, end_time, graph_json, created_at) VALUES ('S', ?, ?, ?, '{}', ?)",
        )
        .bind(course)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await
        .unwrap()
        .last_insert_rowid();
        sqlx::query(
            "INSERT INTO bubble_nodes (node_id, session_id, node_type, title, hints, created_at) VALUES ('n1', ?, 'concept', 'Intro', '[]', ?)",
        )
        .bind(session)
        .bind(Utc::now())
        .execute(sqlite_pool)
        .await
        .unwrap();

        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session)
            .execute(sqlite_pool)
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS count FROM bubble_nodes")
            .fetch_one(sqlite_pool)
            .await
            .unwrap();
        let count: i64 = row.get("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_get_migration() {
        let migration = get_migration(1);
        assert!(migration.is_some());
        assert_eq!(migration.unwrap().name, "create_users");

        let migration = get_migration(999);
        assert!(migration.is_none());
    }

    #[test]
    fn test_total_migrations() {
        assert_eq!(total_migrations(), 9);
    }

    #[test]
    fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);";
        let statements = split_sql_statements(sql_with_comments);
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }

    #[test]
    fn test_truncate_sql() {
        let long = "x".repeat(150);
        assert_eq!(truncate_sql(&long).len(), 103);
        assert_eq!(truncate_sql("SELECT 1"), "SELECT 1");
    }
}
