//! Queue error type.

use gbp_common::AppError;
use thiserror::Error;

/// Errors raised by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// `schedule` was called for a post that already has a job; use
    /// `reschedule` instead.
    #[error("post {0} already has a scheduled job")]
    AlreadyScheduled(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("malformed job payload: {0}")]
    Serialization(String),
}

impl From<fred::error::Error> for QueueError {
    fn from(err: fred::error::Error) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Redis(message) => Self::Redis(message),
            other => Self::Queue(other.to_string()),
        }
    }
}
