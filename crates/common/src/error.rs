//! Error types for gbp-publisher.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Infrastructure error type shared by stores, the queue and the process wiring.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable error code used in logs and failure reasons.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::Queue(_) | Self::ExternalService(_)
        )
    }
}

/// How a failed unit of work may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryClass {
    /// Permanent failure; retrying cannot help.
    Never,
    /// Retry at most once more (e.g. an auth race with a concurrent refresh).
    Once,
    /// Transient failure; retry with exponential backoff up to the attempt budget.
    Backoff,
}

impl RetryClass {
    /// Total attempts allowed for this class given the configured budget.
    #[must_use]
    pub fn attempt_limit(self, max_attempts: u32) -> u32 {
        match self {
            Self::Never => 1,
            Self::Once => max_attempts.min(2),
            Self::Backoff => max_attempts,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
