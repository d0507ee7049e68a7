//! Retry configuration and dead letter queue handling.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gbp_common::RetryClass;
use gbp_common::config::WorkerConfig;
use serde::{Deserialize, Serialize};

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per enqueued job, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(900),
            multiplier: 2.0,
        }
    }
}

impl From<&WorkerConfig> for RetryConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_secs(config.initial_backoff_secs),
            max_delay: Duration::from_secs(config.max_backoff_secs),
            multiplier: config.backoff_multiplier.max(1.0),
        }
    }
}

impl RetryConfig {
    /// Delay before the retry that follows attempt number `attempt` (1-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether a job that has made `attempts` attempts and last failed with
    /// `class` gets another one.
    #[must_use]
    pub fn should_retry(&self, attempts: u32, class: RetryClass) -> bool {
        attempts < class.attempt_limit(self.max_attempts)
    }
}

/// Dead letter queue entry for failed jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry<T> {
    /// The failed job.
    pub job: T,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last error message.
    pub last_error: String,
    /// Timestamp of last failure.
    pub failed_at: DateTime<Utc>,
}

impl<T> DeadLetterEntry<T> {
    /// Create a new dead letter entry.
    pub const fn new(job: T, attempts: u32, error: String, failed_at: DateTime<Utc>) -> Self {
        Self {
            job,
            attempts,
            last_error: error,
            failed_at,
        }
    }
}
