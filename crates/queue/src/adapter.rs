//! API-facing facade over the job queue.
//!
//! The API layer calls this whenever it creates, edits, reschedules or
//! deletes a post. There is one code path for "publish now" and "publish
//! later": a run time in the past is clamped to now.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gbp_common::{IdGenerator, get_metrics};
use gbp_core::Clock;
use gbp_db::entities::post::{self, PostStatus};
use tracing::{debug, info};

use crate::backend::JobQueue;
use crate::error::QueueError;
use crate::job::{JobHandle, PublishJob};

/// What [`JobQueueAdapter::sync_post`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// A job now exists for the post at the given time.
    Scheduled(JobHandle),
    /// Any job for the post was removed.
    Cancelled { removed: bool },
}

/// Schedules, cancels and reschedules publish jobs keyed by post id.
#[derive(Clone)]
pub struct JobQueueAdapter {
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    id_gen: IdGenerator,
}

impl JobQueueAdapter {
    /// Create a new adapter.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            clock,
            id_gen: IdGenerator::new(),
        }
    }

    fn build_job(&self, post_id: &str, run_at: DateTime<Utc>, requested_by: Option<&str>) -> PublishJob {
        let now = self.clock.now();
        PublishJob::new(
            self.id_gen.generate(),
            post_id,
            requested_by.map(str::to_string),
            run_at.max(now),
            now,
        )
    }

    /// Enqueue a job for a post that has none.
    ///
    /// Fails with [`QueueError::AlreadyScheduled`] if the post already has a
    /// job; use [`reschedule`](Self::reschedule) to move it.
    pub async fn schedule(
        &self,
        post_id: &str,
        run_at: DateTime<Utc>,
        requested_by: Option<&str>,
    ) -> Result<JobHandle, QueueError> {
        let job = self.build_job(post_id, run_at, requested_by);
        self.queue.schedule(&job).await?;
        get_metrics().record_enqueued();

        info!(post_id, job_id = %job.job_id, run_at = %job.run_at, "Publish job scheduled");
        Ok(JobHandle::from(&job))
    }

    /// Remove the post's pending job. A missing job is not an error.
    ///
    /// An attempt that has already started is not interrupted; cancelling
    /// only prevents attempts that have not begun.
    pub async fn cancel(&self, post_id: &str) -> Result<bool, QueueError> {
        let removed = self.queue.cancel(post_id).await?;
        if removed {
            get_metrics().record_cancelled();
            info!(post_id, "Publish job cancelled");
        } else {
            debug!(post_id, "No publish job to cancel");
        }
        Ok(removed)
    }

    /// Replace the post's job (if any) with one running at `run_at`.
    pub async fn reschedule(
        &self,
        post_id: &str,
        run_at: DateTime<Utc>,
        requested_by: Option<&str>,
    ) -> Result<JobHandle, QueueError> {
        let job = self.build_job(post_id, run_at, requested_by);
        let replaced = self.queue.reschedule(&job).await?;
        get_metrics().record_enqueued();

        info!(
            post_id,
            job_id = %job.job_id,
            replaced = ?replaced,
            run_at = %job.run_at,
            "Publish job rescheduled"
        );
        Ok(JobHandle::from(&job))
    }

    /// Bring the queue in line with the post's current state.
    ///
    /// A `SCHEDULED` post gets exactly one job at its `scheduled_at` (or now
    /// if unset); any other status removes the job.
    pub async fn sync_post(
        &self,
        post: &post::Model,
        requested_by: Option<&str>,
    ) -> Result<SyncAction, QueueError> {
        match post.status {
            PostStatus::Scheduled => {
                let run_at = post
                    .scheduled_at
                    .map_or_else(|| self.clock.now(), |at| at.with_timezone(&Utc));
                self.reschedule(&post.id, run_at, requested_by)
                    .await
                    .map(SyncAction::Scheduled)
            }
            PostStatus::Draft
            | PostStatus::Published
            | PostStatus::Failed
            | PostStatus::Deleted => {
                let removed = self.cancel(&post.id).await?;
                Ok(SyncAction::Cancelled { removed })
            }
        }
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryJobQueue;
    use chrono::Duration;
    use gbp_core::ManualClock;
    use gbp_core::testing::fixtures;

    fn adapter() -> (JobQueueAdapter, Arc<MemoryJobQueue>, Arc<ManualClock>) {
        let queue = Arc::new(MemoryJobQueue::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (
            JobQueueAdapter::new(queue.clone(), clock.clone()),
            queue,
            clock,
        )
    }

    #[tokio::test]
    async fn test_schedule_clamps_past_run_at() {
        let (adapter, queue, clock) = adapter();
        let now = clock.now();

        let handle = adapter
            .schedule("p1", now - Duration::hours(1), Some("owner@example.com"))
            .await
            .unwrap();

        assert_eq!(handle.run_at, now);
        let job = queue.pending("p1").await.unwrap().unwrap();
        assert_eq!(job.requested_by.as_deref(), Some("owner@example.com"));
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_schedule_twice_is_an_error() {
        let (adapter, _, clock) = adapter();
        let at = clock.now() + Duration::minutes(5);

        adapter.schedule("p1", at, None).await.unwrap();
        let err = adapter.schedule("p1", at, None).await.unwrap_err();
        assert!(matches!(err, QueueError::AlreadyScheduled(_)));
    }

    #[tokio::test]
    async fn test_reschedule_keeps_one_job_at_last_time() {
        let (adapter, queue, clock) = adapter();
        let base = clock.now();

        adapter.schedule("p1", base + Duration::minutes(5), None).await.unwrap();
        let mut last = None;
        for minutes in [10, 20, 7] {
            last = Some(
                adapter
                    .reschedule("p1", base + Duration::minutes(minutes), None)
                    .await
                    .unwrap(),
            );
        }

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.scheduled, 1);
        let pending = queue.pending("p1").await.unwrap().unwrap();
        let last = last.unwrap();
        assert_eq!(pending.job_id, last.job_id);
        assert_eq!(pending.run_at, base + Duration::minutes(7));
    }

    #[tokio::test]
    async fn test_cancel_missing_job_is_noop() {
        let (adapter, _, _) = adapter();
        assert!(!adapter.cancel("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_post_follows_status() {
        let (adapter, queue, clock) = adapter();
        let at = clock.now() + Duration::minutes(30);
        let mut post = fixtures::scheduled_post("p1", "loc1", at);

        let action = adapter.sync_post(&post, None).await.unwrap();
        assert!(matches!(action, SyncAction::Scheduled(ref h) if h.run_at == at));

        // Editing the time moves the single job.
        let moved = at + Duration::minutes(15);
        post.scheduled_at = Some(moved.into());
        adapter.sync_post(&post, None).await.unwrap();
        assert_eq!(queue.counts().await.unwrap().scheduled, 1);
        assert_eq!(queue.pending("p1").await.unwrap().unwrap().run_at, moved);

        post.status = PostStatus::Draft;
        let action = adapter.sync_post(&post, None).await.unwrap();
        assert_eq!(action, SyncAction::Cancelled { removed: true });
        assert!(queue.pending("p1").await.unwrap().is_none());

        post.status = PostStatus::Deleted;
        let action = adapter.sync_post(&post, None).await.unwrap();
        assert_eq!(action, SyncAction::Cancelled { removed: false });
    }
}
