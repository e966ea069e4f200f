//! Login token model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored login token. Only the keyed digest of the raw token is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    /// HMAC-SHA256 digest of the raw token, lowercase hex
    pub token_hash: String,
    /// Associated user ID
    pub user_id: i64,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AuthToken {
    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let mut token = AuthToken {
            token_hash: "abc".to_string(),
            user_id: 1,
            expires_at: now + Duration::minutes(5),
            created_at: now,
        };
        assert!(!token.is_expired());

        token.expires_at = now - Duration::seconds(1);
        assert!(token.is_expired());
    }
}
