//! Job handler that publishes posts.

use std::sync::Arc;

use async_trait::async_trait;
use gbp_core::services::{PublishError, PublishExecutor, PublishOutcome, SkipReason};
use tracing::{debug, error, info, warn};

use crate::job::PublishJob;
use crate::worker::{HandlerError, JobHandler};

/// Runs [`PublishExecutor::publish`] for each job and marks the post failed
/// once the job's attempts are spent.
#[derive(Clone)]
pub struct PublishHandler {
    executor: Arc<PublishExecutor>,
}

impl PublishHandler {
    #[must_use]
    pub const fn new(executor: Arc<PublishExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl JobHandler for PublishHandler {
    async fn handle(&self, job: &PublishJob) -> Result<(), HandlerError> {
        match self.executor.publish(&job.post_id).await {
            Ok(PublishOutcome::Published { published_at, .. }) => {
                info!(
                    post_id = %job.post_id,
                    requested_by = ?job.requested_by,
                    %published_at,
                    "Publish job succeeded"
                );
                Ok(())
            }
            // The running publish owns the post's outcome.
            Ok(PublishOutcome::Skipped(SkipReason::InFlight)) => {
                info!(
                    post_id = %job.post_id,
                    job_id = %job.job_id,
                    "Publish already running, job done"
                );
                Ok(())
            }
            Ok(PublishOutcome::Skipped(reason)) => {
                debug!(post_id = %job.post_id, ?reason, "Publish job skipped");
                Ok(())
            }
            Err(e) => Err(HandlerError::new(
                e.retry_class(),
                e.failure_code(),
                e.to_string(),
            )),
        }
    }

    async fn on_exhausted(&self, job: &PublishJob, error: &HandlerError) {
        if error.code == PublishError::STATUS_WRITE_FAILED {
            error!(
                post_id = %job.post_id,
                reason = %error,
                "Post is live on the provider but not recorded as published"
            );
            return;
        }
        match self.executor.mark_failed(&job.post_id, &error.to_string()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(post_id = %job.post_id, "Post already settled, not marking failed");
            }
            Err(e) => {
                error!(post_id = %job.post_id, error = %e, "Failed to mark post failed");
                warn!(post_id = %job.post_id, reason = %error, "Post left without a terminal status");
            }
        }
    }
}
