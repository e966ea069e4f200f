//! Login throttling
//!
//! Two sliding windows guard the login endpoints:
//! - failed attempts per username: 5 within 15 minutes
//! - requests per client IP: 10 within 1 minute

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

/// Timestamps per key, trimmed to a fixed window on every look
struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash> SlidingWindow<K> {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: RwLock::new(HashMap::new()),
        }
    }

    async fn is_limited(&self, key: K, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.window;
        let mut hits = self.hits.write().await;
        let times = hits.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        times.len() >= self.limit
    }

    async fn record(&self, key: K, now: DateTime<Utc>) {
        self.hits.write().await.entry(key).or_default().push(now);
    }

    async fn clear(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    async fn cleanup(&self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.hits.write().await.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.hits.read().await.len()
    }
}

/// Login rate limiter shared by the auth handlers
pub struct LoginRateLimiter {
    usernames: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            usernames: SlidingWindow::new(5, Duration::minutes(15)),
            ips: SlidingWindow::new(10, Duration::minutes(1)),
        }
    }

    /// Usernames are compared case-insensitively
    pub async fn is_username_limited(&self, username: &str) -> bool {
        self.usernames
            .is_limited(username.to_lowercase(), Utc::now())
            .await
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        self.usernames.record(username.to_lowercase(), Utc::now()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_username_attempts(&self, username: &str) {
        self.usernames.clear(&username.to_lowercase()).await;
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.ips.is_limited(ip, Utc::now()).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ips.record(ip, Utc::now()).await;
    }

    /// Drop expired entries; run periodically from a background task
    pub async fn cleanup(&self) {
        let now = Utc::now();
        self.usernames.cleanup(now).await;
        self.ips.cleanup(now).await;
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_username_limit_after_five_failures() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            limiter.record_failed_attempt("alice").await;
        }
        assert!(!limiter.is_username_limited("alice").await);

        limiter.record_failed_attempt("ALICE").await;
        assert!(limiter.is_username_limited("Alice").await);

        limiter.clear_username_attempts("alice").await;
        assert!(!limiter.is_username_limited("alice").await);
    }

    #[tokio::test]
    async fn test_ip_limit_after_ten_requests() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("10.0.0.1").unwrap();
        let other = IpAddr::from_str("10.0.0.2").unwrap();

        for _ in 0..10 {
            assert!(!limiter.is_ip_limited(ip).await);
            limiter.record_ip_request(ip).await;
        }
        assert!(limiter.is_ip_limited(ip).await);
        assert!(!limiter.is_ip_limited(other).await);
    }

    #[tokio::test]
    async fn test_window_expiry_and_cleanup() {
        let window: SlidingWindow<&str> = SlidingWindow::new(2, Duration::minutes(1));
        let start = Utc::now() - Duration::minutes(5);

        window.record("k", start).await;
        window.record("k", start).await;
        assert!(window.is_limited("k", start).await);

        // Both hits fall outside the window a few minutes later
        assert!(!window.is_limited("k", Utc::now()).await);

        window.record("old", start).await;
        window.cleanup(Utc::now()).await;
        assert_eq!(window.tracked_keys().await, 0);
    }
}
