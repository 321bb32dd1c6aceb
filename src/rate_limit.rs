use sqlx::{AnyPool, Row};

use crate::error::AppResult;

/// `identity_hash = first_16_hex_chars(sha256(identity))`.
pub fn identity_hash(identity: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(identity.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub total_hits: i64,
    pub time_to_expire_secs: i64,
    pub blocked: bool,
}

/// Persistent sliding-window counter, keyed on `identity_hash`.
#[derive(Clone)]
pub struct RateLimiter {
    pool: AnyPool,
    window_secs: i64,
    limit: i64,
}

const UPSERT_SQL: &str = "
INSERT INTO rate_limit (identity_hash, count, window_start, expires_at)
VALUES (?, 1, ?, ?)
ON CONFLICT(identity_hash) DO UPDATE SET
  count = CASE WHEN rate_limit.expires_at > ? THEN rate_limit.count + 1 ELSE 1 END,
  window_start = CASE WHEN rate_limit.expires_at > ? THEN rate_limit.window_start ELSE ? END,
  expires_at = CASE WHEN rate_limit.expires_at > ? THEN rate_limit.expires_at ELSE ? END
RETURNING count, expires_at";

impl RateLimiter {
    pub fn new(pool: AnyPool, window_secs: i64, limit: i64) -> Self {
        Self {
            pool,
            window_secs,
            limit,
        }
    }

    /// Atomic increment-or-insert-or-reset against storage, per the
    /// window policy in the spec: `now()` is passed in so tests can drive
    /// it deterministically.
    pub async fn check_and_increment(
        &self,
        identity: &str,
        now: i64,
    ) -> AppResult<RateLimitOutcome> {
        let hash = identity_hash(identity);
        let expires_at = now + self.window_secs;

        let row = sqlx::query(UPSERT_SQL)
            .bind(&hash)
            .bind(now)
            .bind(expires_at)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        let expires_at: i64 = row.try_get("expires_at")?;

        Ok(RateLimitOutcome {
            total_hits: count,
            time_to_expire_secs: (expires_at - now).max(0),
            blocked: count > self.limit,
        })
    }

    /// Deletes every record whose window has expired. Failure is logged and
    /// swallowed; it must never propagate to a request handler.
    pub async fn sweep_expired(&self, now: i64) {
        let result = sqlx::query("DELETE FROM rate_limit WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await;
        if let Err(err) = result {
            log::warn!("rate limit sweep failed: {err}");
        }
    }

    pub fn spawn_sweeper(self, interval: std::time::Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let now = chrono::Utc::now().timestamp();
                self.sweep_expired(now).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> AnyPool {
        sqlx::any::install_default_drivers();
        let pool = AnyPool::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate_for_test(&pool).await;
        pool
    }

    #[tokio::test]
    async fn first_request_creates_a_record() {
        let pool = test_pool().await;
        let limiter = RateLimiter::new(pool, 3600, 60);
        let outcome = limiter.check_and_increment("1.2.3.4", 1_000).await.unwrap();
        assert_eq!(outcome.total_hits, 1);
        assert!(!outcome.blocked);
        assert_eq!(outcome.time_to_expire_secs, 3600);
    }

    #[tokio::test]
    async fn consecutive_requests_increment_monotonically() {
        let pool = test_pool().await;
        let limiter = RateLimiter::new(pool, 3600, 60);
        let mut last = 0;
        for _ in 0..5 {
            let outcome = limiter.check_and_increment("same-ip", 1_000).await.unwrap();
            assert!(outcome.total_hits > last);
            last = outcome.total_hits;
        }
    }

    #[tokio::test]
    async fn blocks_after_limit_exceeded() {
        let pool = test_pool().await;
        let limiter = RateLimiter::new(pool, 3600, 2);
        limiter.check_and_increment("ip", 1_000).await.unwrap();
        limiter.check_and_increment("ip", 1_000).await.unwrap();
        let third = limiter.check_and_increment("ip", 1_000).await.unwrap();
        assert!(third.blocked);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let pool = test_pool().await;
        let limiter = RateLimiter::new(pool, 100, 2);
        limiter.check_and_increment("ip", 0).await.unwrap();
        let after_expiry = limiter.check_and_increment("ip", 200).await.unwrap();
        assert_eq!(after_expiry.total_hits, 1);
        assert!(!after_expiry.blocked);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let pool = test_pool().await;
        let limiter = RateLimiter::new(pool.clone(), 100, 60);
        limiter.check_and_increment("stale", 0).await.unwrap();
        limiter.check_and_increment("fresh", 1_000).await.unwrap();
        limiter.sweep_expired(500).await;

        let remaining: i64 = sqlx::query("SELECT COUNT(*) AS c FROM rate_limit")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("c")
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
