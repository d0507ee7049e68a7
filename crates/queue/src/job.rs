//! Job definitions.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delayed request to publish one post.
///
/// The queue holds at most one job per `post_id`. `job_id` changes every time
/// the job is replaced, which lets the queue tell a running attempt of a
/// superseded job apart from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishJob {
    pub job_id: String,
    pub post_id: String,
    /// Who asked for the publish (user email or service name), for attribution.
    #[serde(default)]
    pub requested_by: Option<String>,
    /// Attempts started so far, incremented when the job is fetched.
    #[serde(default)]
    pub attempts: u32,
    pub run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Error from the most recent failed attempt.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PublishJob {
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        post_id: impl Into<String>,
        requested_by: Option<String>,
        run_at: DateTime<Utc>,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            post_id: post_id.into(),
            requested_by,
            attempts: 0,
            run_at,
            enqueued_at,
            last_error: None,
        }
    }
}

/// Reference to an enqueued job, returned to callers of the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub post_id: String,
    pub run_at: DateTime<Utc>,
}

impl From<&PublishJob> for JobHandle {
    fn from(job: &PublishJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            post_id: job.post_id.clone(),
            run_at: job.run_at,
        }
    }
}

/// Queue sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    /// Jobs waiting for their run time or a free slot.
    pub scheduled: u64,
    /// Jobs leased by a worker slot.
    pub active: u64,
    /// Jobs in the dead-letter set.
    pub dead: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_json_shape() {
        let at = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let job = PublishJob::new("job1", "post1", Some("owner@example.com".into()), at, at);

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["post_id"], "post1");
        assert_eq!(value["attempts"], 0);
        assert_eq!(value["requested_by"], "owner@example.com");

        // Jobs written before `last_error` existed still decode.
        let legacy = r#"{"job_id":"j","post_id":"p","run_at":"2025-06-01T12:00:00Z","enqueued_at":"2025-06-01T12:00:00Z"}"#;
        let decoded: PublishJob = serde_json::from_str(legacy).unwrap();
        assert_eq!(decoded.attempts, 0);
        assert!(decoded.last_error.is_none());
        assert!(decoded.requested_by.is_none());
    }
}
