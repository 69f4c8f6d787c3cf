use thiserror::Error;

/// Error taxonomy shared across the workspace.
///
/// Upstream (adapter) failures are pre-classified so the sync engine can
/// pattern-match on the category instead of inspecting messages:
/// `Retryable` is redelivered with backoff, `Permanent` is persisted as an
/// error note and skipped, `Auth` degrades health, `NotFound` on a source
/// fetch means the item was deleted upstream.
#[derive(Error, Debug)]
pub enum TmError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("retryable upstream error: {0}")]
    Retryable(String),

    #[error("permanent upstream error: {0}")]
    Permanent(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

impl TmError {
    /// Whether the queue should redeliver the message that hit this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TmError::Retryable(_))
    }
}

pub type TmResult<T> = Result<T, TmError>;
