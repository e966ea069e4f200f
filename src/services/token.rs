//! Access tokens
//!
//! Tokens are random UUIDs handed to the client once. The database only
//! keeps `HMAC-SHA256(secret_key, token)`, so a leaked table cannot be
//! replayed without the key.

use crate::db::repositories::AuthTokenRepository;
use crate::models::AuthToken;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Freshly issued token, returned to the client exactly once
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

/// Issues, resolves and revokes access tokens
pub struct TokenService {
    repo: Arc<dyn AuthTokenRepository>,
    secret_key: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(repo: Arc<dyn AuthTokenRepository>, secret_key: impl Into<String>, ttl_minutes: i64) -> Self {
        Self {
            repo,
            secret_key: secret_key.into(),
            ttl: Duration::minutes(ttl_minutes),
        }
    }

    /// Keyed digest stored in place of the raw token
    pub fn digest(&self, token: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid token key: {}", e))?;
        mac.update(token.as_bytes());
        Ok(HEXLOWER.encode(&mac.finalize().into_bytes()))
    }

    pub async fn issue(&self, user_id: i64) -> Result<IssuedToken> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();

        self.repo
            .create(&AuthToken {
                token_hash: self.digest(&token)?,
                user_id,
                expires_at: now + self.ttl,
                created_at: now,
            })
            .await
            .context("Failed to store access token")?;

        Ok(IssuedToken {
            token,
            expires_in: self.ttl.num_seconds(),
        })
    }

    /// User id behind a live token. Expired tokens are removed on sight.
    pub async fn resolve(&self, token: &str) -> Result<Option<i64>> {
        let hash = self.digest(token)?;
        let Some(stored) = self.repo.get_by_hash(&hash).await? else {
            return Ok(None);
        };

        if stored.is_expired() {
            self.repo.delete(&hash).await?;
            return Ok(None);
        }
        Ok(Some(stored.user_id))
    }

    pub async fn revoke(&self, token: &str) -> Result<()> {
        let hash = self.digest(token)?;
        self.repo.delete(&hash).await
    }

    pub async fn revoke_all(&self, user_id: i64) -> Result<()> {
        self.repo.delete_by_user(user_id).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.repo.delete_expired().await
    }
}
