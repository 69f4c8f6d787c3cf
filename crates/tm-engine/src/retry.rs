//! Retry policy for retryable upstream failures: capped exponential backoff,
//! last error propagated typed.

use std::future::Future;
use std::time::Duration;

use tm_core::TmResult;

const BACKOFF_CAP_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(base_delay_secs),
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt,
    /// capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let secs = self
            .base_delay
            .as_secs()
            .saturating_mul(factor)
            .min(BACKOFF_CAP_SECS);
        Duration::from_secs(secs)
    }
}

/// Run `op`, retrying on `TmError::Retryable` up to the policy's attempt
/// budget. Non-retryable errors propagate immediately.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> TmResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TmResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
