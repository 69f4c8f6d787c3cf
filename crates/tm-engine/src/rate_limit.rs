//! Token-bucket style rate limiting for the upstream adapters, with
//! per-minute and per-hour windows keyed by adapter name.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

impl std::fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limit exceeded, retry after {} seconds",
            self.retry_after_secs
        )
    }
}

impl std::error::Error for RateLimitExceeded {}

#[derive(Debug)]
struct Bucket {
    minute_count: u32,
    hour_count: u32,
    minute_reset: DateTime<Utc>,
    hour_reset: DateTime<Utc>,
}

impl Bucket {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            minute_count: 0,
            hour_count: 0,
            minute_reset: now + Duration::minutes(1),
            hour_reset: now + Duration::hours(1),
        }
    }

    fn maybe_reset(&mut self, now: DateTime<Utc>) {
        if now >= self.minute_reset {
            self.minute_count = 0;
            self.minute_reset = now + Duration::minutes(1);
        }
        if now >= self.hour_reset {
            self.hour_count = 0;
            self.hour_reset = now + Duration::hours(1);
        }
    }
}

/// Shared limiter: adapters call [`RateLimiter::acquire`] before each
/// outbound request.
#[derive(Default)]
pub struct RateLimiter {
    configs: RwLock<HashMap<String, RateLimitConfig>>,
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_limit(&self, key: &str, config: RateLimitConfig) {
        self.configs.write().await.insert(key.to_string(), config);
    }

    /// Check the windows for `key` and record the request if allowed.
    /// Unconfigured keys are always allowed.
    pub async fn acquire(&self, key: &str) -> Result<(), RateLimitExceeded> {
        let config = match self.configs.read().await.get(key) {
            Some(c) => c.clone(),
            None => return Ok(()),
        };

        let now = Utc::now();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(key.to_string()).or_insert_with(Bucket::new);
        bucket.maybe_reset(now);

        if bucket.minute_count >= config.requests_per_minute {
            let retry_after = (bucket.minute_reset - now).num_seconds().max(1) as u64;
            return Err(RateLimitExceeded {
                retry_after_secs: retry_after,
            });
        }
        if bucket.hour_count >= config.requests_per_hour {
            let retry_after = (bucket.hour_reset - now).num_seconds().max(1) as u64;
            return Err(RateLimitExceeded {
                retry_after_secs: retry_after,
            });
        }

        bucket.minute_count += 1;
        bucket.hour_count += 1;
        Ok(())
    }
}
