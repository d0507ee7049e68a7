//! Job queue backends.
//!
//! A backend stores at most one job per post id. A job is either *scheduled*
//! (waiting for `run_at`) or *active* (leased by a worker slot until a lease
//! deadline). Jobs that run out of attempts move to a dead-letter set.
//!
//! Every mutating operation that follows a fetch (`complete`, `retry`,
//! `bury`) only applies when the stored job still carries the same `job_id`
//! as the one passed in. A job that was cancelled or replaced while an
//! attempt was running is therefore never retried or buried by that attempt.

mod memory;
mod redis;

pub use memory::MemoryJobQueue;
pub use redis::RedisJobQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueError;
use crate::job::{JobCounts, PublishJob};
use crate::retry::DeadLetterEntry;

/// Dead-letter record for a publish job.
pub type DeadJob = DeadLetterEntry<PublishJob>;

/// Storage primitives for delayed publish jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert `job` unless its post already has one.
    async fn schedule(&self, job: &PublishJob) -> Result<(), QueueError>;

    /// Replace any job for the post with `job` in one atomic step.
    ///
    /// Returns the id of the job that was replaced, if any.
    async fn reschedule(&self, job: &PublishJob) -> Result<Option<String>, QueueError>;

    /// Remove the post's job. Returns `false` if there was none.
    ///
    /// An attempt already running is not interrupted.
    async fn cancel(&self, post_id: &str) -> Result<bool, QueueError>;

    /// Lease the earliest job due at `now` until `lease_until`, counting one
    /// more attempt.
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<PublishJob>, QueueError>;

    /// Drop a job whose attempt succeeded. Returns `false` if superseded.
    async fn complete(&self, job: &PublishJob) -> Result<bool, QueueError>;

    /// Put a leased job back to run at `run_at`. Returns `false` if superseded.
    async fn retry(
        &self,
        job: &PublishJob,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, QueueError>;

    /// Move a job to the dead-letter set. Returns `false` if superseded.
    async fn bury(
        &self,
        job: &PublishJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Return jobs whose lease expired before `now` to the scheduled set.
    async fn reap_stalled(&self, now: DateTime<Utc>) -> Result<u64, QueueError>;

    /// The post's current job, scheduled or active.
    async fn pending(&self, post_id: &str) -> Result<Option<PublishJob>, QueueError>;

    /// The post's dead-letter record, if its last job died.
    async fn dead_letter(&self, post_id: &str) -> Result<Option<DeadJob>, QueueError>;

    async fn counts(&self) -> Result<JobCounts, QueueError>;
}

/// Millisecond score used for sorted-set ordering.
pub(crate) fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
