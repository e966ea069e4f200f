//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::db::{Backend, DynDatabasePool};
use crate::models::{ListParams, User, UserFilter, UserRole, UserStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Get user by username
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist every mutable column of `user`
    async fn update(&self, user: &User) -> Result<User>;

    /// Delete a user
    async fn delete(&self, id: i64) -> Result<()>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// Number of courses the user teaches
    async fn owned_course_count(&self, id: i64) -> Result<i64>;

    /// List users matching `filter`, returning the page and the total
    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)>;

    /// Counts per role plus active and verified totals
    async fn stats(&self) -> Result<UserStats>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        match self.pool.backend() {
            Backend::Sqlite(p) => create_user_sqlite(p, user).await,
            Backend::Mysql(p) => create_user_mysql(p, user).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by ID")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(username)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by username")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(username)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by username")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_sqlite).transpose()
            }
            Backend::Mysql(p) => {
                let row = sqlx::query(&sql)
                    .bind(email)
                    .fetch_optional(p)
                    .await
                    .context("Failed to get user by email")?;
                row.as_ref().map(row_to_user_mysql).transpose()
            }
        }
    }

    async fn update(&self, user: &User) -> Result<User> {
        match self.pool.backend() {
            Backend::Sqlite(p) => update_user_sqlite(p, user).await,
            Backend::Mysql(p) => update_user_mysql(p, user).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(p)
                    .await
                    .context("Failed to delete user")?;
            }
            Backend::Mysql(p) => {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(p)
                    .await
                    .context("Failed to delete user")?;
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let row = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users")
                .fetch_one(p)
                .await,
            Backend::Mysql(p) => sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM users")
                .fetch_one(p)
                .await,
        }
        .context("Failed to count users")?;
        Ok(row.0)
    }

    async fn owned_course_count(&self, id: i64) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM courses WHERE instructor_id = ?";
        let row = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as::<_, (i64,)>(sql).bind(id).fetch_one(p).await,
            Backend::Mysql(p) => sqlx::query_as::<_, (i64,)>(sql).bind(id).fetch_one(p).await,
        }
        .context("Failed to count owned courses")?;
        Ok(row.0)
    }

    async fn list(&self, filter: &UserFilter, params: &ListParams) -> Result<(Vec<User>, i64)> {
        match self.pool.backend() {
            Backend::Sqlite(p) => list_users_sqlite(p, filter, params).await,
            Backend::Mysql(p) => list_users_mysql(p, filter, params).await,
        }
    }

    async fn stats(&self) -> Result<UserStats> {
        let row = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64)>(STATS_SQL)
                .fetch_one(p)
                .await,
            Backend::Mysql(p) => sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64)>(STATS_SQL)
                .fetch_one(p)
                .await,
        }
        .context("Failed to compute user stats")?;

        Ok(UserStats {
            total_users: row.0,
            total_students: row.1,
            total_instructors: row.2,
            total_admins: row.3,
            active_users: row.4,
            verified_users: row.5,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, first_name, last_name, \
     avatar_url, is_active, is_verified, created_at, updated_at, last_login";

const INSERT_USER: &str = r#"
    INSERT INTO users (username, email, password_hash, role, first_name, last_name,
                       avatar_url, is_active, is_verified, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const UPDATE_USER: &str = r#"
    UPDATE users
    SET email = ?, password_hash = ?, role = ?, first_name = ?, last_name = ?,
        avatar_url = ?, is_active = ?, is_verified = ?, updated_at = ?, last_login = ?
    WHERE id = ?
"#;

// Each optional filter is bound twice: once for the NULL test, once for the comparison.
const USER_FILTER: &str = r#"
    WHERE (? IS NULL OR role = ?)
      AND (? IS NULL OR is_active = ?)
      AND (? IS NULL OR role = 'student' OR id = ?)
"#;

const STATS_SQL: &str = r#"
    SELECT COUNT(*),
           CAST(COALESCE(SUM(CASE WHEN role = 'student' THEN 1 ELSE 0 END), 0) AS SIGNED),
           CAST(COALESCE(SUM(CASE WHEN role = 'instructor' THEN 1 ELSE 0 END), 0) AS SIGNED),
           CAST(COALESCE(SUM(CASE WHEN role = 'admin' THEN 1 ELSE 0 END), 0) AS SIGNED),
           CAST(COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS SIGNED),
           CAST(COALESCE(SUM(CASE WHEN is_verified THEN 1 ELSE 0 END), 0) AS SIGNED)
    FROM users
"#;

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_USER)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.avatar_url)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_rowid(),
        created_at: now,
        updated_at: None,
        ..user.clone()
    })
}

async fn update_user_sqlite(pool: &SqlitePool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(UPDATE_USER)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.avatar_url)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(now)
        .bind(user.last_login)
        .bind(user.id)
        .execute(pool)
        .await
        .context("Failed to update user")?;

    Ok(User {
        updated_at: Some(now),
        ..user.clone()
    })
}

async fn list_users_sqlite(
    pool: &SqlitePool,
    filter: &UserFilter,
    params: &ListParams,
) -> Result<(Vec<User>, i64)> {
    let role = filter.role.map(|r| r.to_string());

    let count_sql = format!("SELECT COUNT(*) FROM users {}", USER_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&role)
        .bind(&role)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .bind(filter.students_and_self)
        .bind(filter.students_and_self)
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    let sql = format!(
        "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        USER_COLUMNS, USER_FILTER
    );
    let rows = sqlx::query(&sql)
        .bind(&role)
        .bind(&role)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .bind(filter.students_and_self)
        .bind(filter.students_and_self)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    let users = rows.iter().map(row_to_user_sqlite).collect::<Result<Vec<_>>>()?;
    Ok((users, total))
}

fn row_to_user_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        avatar_url: row.get("avatar_url"),
        is_active: row.get("is_active"),
        is_verified: row.get("is_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login: row.get("last_login"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    let result = sqlx::query(INSERT_USER)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.avatar_url)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create user")?;

    Ok(User {
        id: result.last_insert_id() as i64,
        created_at: now,
        updated_at: None,
        ..user.clone()
    })
}

async fn update_user_mysql(pool: &MySqlPool, user: &User) -> Result<User> {
    let now = Utc::now();

    sqlx::query(UPDATE_USER)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.to_string())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.avatar_url)
        .bind(user.is_active)
        .bind(user.is_verified)
        .bind(now)
        .bind(user.last_login)
        .bind(user.id)
        .execute(pool)
        .await
        .context("Failed to update user")?;

    Ok(User {
        updated_at: Some(now),
        ..user.clone()
    })
}

async fn list_users_mysql(
    pool: &MySqlPool,
    filter: &UserFilter,
    params: &ListParams,
) -> Result<(Vec<User>, i64)> {
    let role = filter.role.map(|r| r.to_string());

    let count_sql = format!("SELECT COUNT(*) FROM users {}", USER_FILTER);
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&role)
        .bind(&role)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .bind(filter.students_and_self)
        .bind(filter.students_and_self)
        .fetch_one(pool)
        .await
        .context("Failed to count users")?;

    let sql = format!(
        "SELECT {} FROM users {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        USER_COLUMNS, USER_FILTER
    );
    let rows = sqlx::query(&sql)
        .bind(&role)
        .bind(&role)
        .bind(filter.is_active)
        .bind(filter.is_active)
        .bind(filter.students_and_self)
        .bind(filter.students_and_self)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list users")?;

    let users = rows.iter().map(row_to_user_mysql).collect::<Result<Vec<_>>>()?;
    Ok((users, total))
}

fn row_to_user_mysql(row: &sqlx::mysql::MySqlRow) -> Result<User> {
    let role_str: String = row.get("role");
    let role = UserRole::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        avatar_url: row.get("avatar_url"),
        is_active: row.get("is_active"),
        is_verified: row.get("is_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_login: row.get("last_login"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup_test_repo() -> (DynDatabasePool, SqlxUserRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxUserRepository::new(pool.clone());
        (pool, repo)
    }

    fn create_test_user(username: &str, role: UserRole) -> User {
        User::new(
            username.to_string(),
            format!("{}@example.com", username),
            "hashed".to_string(),
            role,
        )
    }

    #[tokio::test]
    async fn test_create_user() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = create_test_user("testuser", UserRole::Student);
        user.first_name = Some("Test".to_string());

        let created = repo.create(&user).await.expect("Failed to create user");

        assert!(created.id > 0);
        assert_eq!(created.username, "testuser");
        assert_eq!(created.first_name.as_deref(), Some("Test"));
        assert_eq!(created.role, UserRole::Student);
    }

    #[tokio::test]
    async fn test_get_user_by_id_username_email() {
        let (_pool, repo) = setup_test_repo().await;
        let created = repo
            .create(&create_test_user("alice", UserRole::Instructor))
            .await
            .expect("Failed to create user");

        let by_id = repo.get_by_id(created.id).await.unwrap().expect("by id");
        assert_eq!(by_id.username, "alice");
        assert!(by_id.is_active);

        let by_name = repo.get_by_username("alice").await.unwrap().expect("by name");
        assert_eq!(by_name.id, created.id);

        let by_email = repo.get_by_email("alice@example.com").await.unwrap().expect("by email");
        assert_eq!(by_email.id, created.id);
        assert_eq!(by_email.role, UserRole::Instructor);

        assert!(repo.get_by_id(999).await.unwrap().is_none());
        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&create_test_user("dup", UserRole::Student)).await.unwrap();

        let mut other = create_test_user("dup", UserRole::Student);
        other.email = "other@example.com".to_string();
        assert!(repo.create(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_update_user() {
        let (_pool, repo) = setup_test_repo().await;
        let mut user = repo.create(&create_test_user("bob", UserRole::Student)).await.unwrap();

        user.email = "bob@new.example.com".to_string();
        user.is_verified = true;
        user.last_login = Some(Utc::now());
        let updated = repo.update(&user).await.expect("Failed to update user");
        assert!(updated.updated_at.is_some());

        let found = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(found.email, "bob@new.example.com");
        assert!(found.is_verified);
        assert!(found.last_login.is_some());
    }

    #[tokio::test]
    async fn test_delete_and_count() {
        let (_pool, repo) = setup_test_repo().await;
        let user = repo.create(&create_test_user("carol", UserRole::Student)).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);

        repo.delete(user.id).await.expect("Failed to delete user");
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let (_pool, repo) = setup_test_repo().await;
        let instructor = repo.create(&create_test_user("instructor", UserRole::Instructor)).await.unwrap();
        repo.create(&create_test_user("other_instructor", UserRole::Instructor)).await.unwrap();
        repo.create(&create_test_user("s1", UserRole::Student)).await.unwrap();
        let mut s2 = create_test_user("s2", UserRole::Student);
        s2.is_active = false;
        repo.create(&s2).await.unwrap();

        let params = ListParams::new(1, 50);

        let (all, total) = repo.list(&UserFilter::default(), &params).await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(all.len(), 4);

        let students = UserFilter {
            role: Some(UserRole::Student),
            ..Default::default()
        };
        let (_, total) = repo.list(&students, &params).await.unwrap();
        assert_eq!(total, 2);

        let active_students = UserFilter {
            role: Some(UserRole::Student),
            is_active: Some(true),
            ..Default::default()
        };
        let (items, total) = repo.list(&active_students, &params).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].username, "s1");

        let instructor_view = UserFilter {
            students_and_self: Some(instructor.id),
            ..Default::default()
        };
        let (items, total) = repo.list(&instructor_view, &params).await.unwrap();
        assert_eq!(total, 3);
        assert!(items.iter().all(|u| u.username != "other_instructor"));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let (_pool, repo) = setup_test_repo().await;
        for i in 0..5 {
            repo.create(&create_test_user(&format!("user{}", i), UserRole::Student))
                .await
                .unwrap();
        }

        let (page, total) = repo
            .list(&UserFilter::default(), &ListParams::new(2, 2))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_pool, repo) = setup_test_repo().await;
        repo.create(&create_test_user("admin", UserRole::Admin)).await.unwrap();
        repo.create(&create_test_user("instructor", UserRole::Instructor)).await.unwrap();
        let mut student = create_test_user("student", UserRole::Student);
        student.is_verified = true;
        repo.create(&student).await.unwrap();
        let mut inactive = create_test_user("gone", UserRole::Student);
        inactive.is_active = false;
        repo.create(&inactive).await.unwrap();

        let stats = repo.stats().await.expect("Failed to compute stats");
        assert_eq!(
            stats,
            UserStats {
                total_users: 4,
                total_students: 2,
                total_instructors: 1,
                total_admins: 1,
                active_users: 3,
                verified_users: 1,
            }
        );
    }
}
