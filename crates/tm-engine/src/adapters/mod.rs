//! HTTP adapters for the source task service and destination knowledge
//! base. Adapters hide the wire protocol, classify failures into the
//! `TmError` taxonomy, throttle through the shared rate limiter, and retry
//! retryable failures internally.

pub mod notion;
pub mod todoist;

pub use notion::NotionAdapter;
pub use todoist::TodoistAdapter;

use tm_core::TmError;

use crate::rate_limit::RateLimiter;

/// Map an HTTP status to the error taxonomy: 429 and 5xx are retryable,
/// 401/403 are auth, 404 is not-found, remaining 4xx are permanent.
pub(crate) fn classify_status(status: reqwest::StatusCode, context: &str) -> TmError {
    match status.as_u16() {
        401 | 403 => TmError::Auth(format!("{context}: {status}")),
        404 => TmError::NotFound(context.to_string()),
        429 => TmError::Retryable(format!("{context}: rate limited")),
        s if s >= 500 => TmError::Retryable(format!("{context}: {status}")),
        _ => TmError::Permanent(format!("{context}: {status}")),
    }
}

/// Transport-level failures (timeouts, connection resets) are retryable.
pub(crate) fn classify_transport(error: reqwest::Error, context: &str) -> TmError {
    TmError::Retryable(format!("{context}: {error}"))
}

pub(crate) async fn throttle(limiter: &RateLimiter, key: &str) -> Result<(), TmError> {
    limiter
        .acquire(key)
        .await
        .map_err(|e| TmError::Retryable(e.to_string()))
}
