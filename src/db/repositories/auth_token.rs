//! Login token repository
//!
//! Database operations for issued access tokens. Rows are keyed by the
//! token digest; the raw token never reaches the database.

use crate::db::{Backend, DynDatabasePool};
use crate::models::AuthToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

/// Token repository trait
#[async_trait]
pub trait AuthTokenRepository: Send + Sync {
    /// Store a new token
    async fn create(&self, token: &AuthToken) -> Result<AuthToken>;

    /// Get a token by its digest
    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<AuthToken>>;

    /// Delete a token
    async fn delete(&self, token_hash: &str) -> Result<()>;

    /// Delete all tokens for a user
    async fn delete_by_user(&self, user_id: i64) -> Result<()>;

    /// Delete expired tokens, returning how many were removed
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based token repository implementation
pub struct SqlxAuthTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxAuthTokenRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuthTokenRepository> {
        Arc::new(Self::new(pool))
    }
}

const INSERT_TOKEN: &str =
    "INSERT INTO auth_tokens (token_hash, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)";

const SELECT_TOKEN: &str =
    "SELECT token_hash, user_id, expires_at, created_at FROM auth_tokens WHERE token_hash = ?";

#[async_trait]
impl AuthTokenRepository for SqlxAuthTokenRepository {
    async fn create(&self, token: &AuthToken) -> Result<AuthToken> {
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(INSERT_TOKEN)
                .bind(&token.token_hash)
                .bind(token.user_id)
                .bind(token.expires_at)
                .bind(token.created_at)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query(INSERT_TOKEN)
                .bind(&token.token_hash)
                .bind(token.user_id)
                .bind(token.expires_at)
                .bind(token.created_at)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to store auth token")?;

        Ok(token.clone())
    }

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<AuthToken>> {
        let token = match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query(SELECT_TOKEN)
                .bind(token_hash)
                .fetch_optional(p)
                .await
                .context("Failed to get auth token")?
                .map(|row| AuthToken {
                    token_hash: row.get("token_hash"),
                    user_id: row.get("user_id"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                }),
            Backend::Mysql(p) => sqlx::query(SELECT_TOKEN)
                .bind(token_hash)
                .fetch_optional(p)
                .await
                .context("Failed to get auth token")?
                .map(|row| AuthToken {
                    token_hash: row.get("token_hash"),
                    user_id: row.get("user_id"),
                    expires_at: row.get("expires_at"),
                    created_at: row.get("created_at"),
                }),
        };
        Ok(token)
    }

    async fn delete(&self, token_hash: &str) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query("DELETE FROM auth_tokens WHERE token_hash = ?")
                .bind(token_hash)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query("DELETE FROM auth_tokens WHERE token_hash = ?")
                .bind(token_hash)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to delete auth token")
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<()> {
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
                .bind(user_id)
                .execute(p)
                .await
                .map(|_| ()),
            Backend::Mysql(p) => sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
                .bind(user_id)
                .execute(p)
                .await
                .map(|_| ()),
        }
        .context("Failed to delete user tokens")
    }

    async fn delete_expired(&self) -> Result<u64> {
        let now = Utc::now();
        match self.pool.backend() {
            Backend::Sqlite(p) => sqlx::query("DELETE FROM auth_tokens WHERE expires_at < ?")
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
            Backend::Mysql(p) => sqlx::query("DELETE FROM auth_tokens WHERE expires_at < ?")
                .bind(now)
                .execute(p)
                .await
                .map(|r| r.rows_affected()),
        }
        .context("Failed to delete expired tokens")
    }
}
