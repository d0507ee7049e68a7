//! Worker runtime.
//!
//! Pulls due jobs from a [`JobQueue`] and runs them through a [`JobHandler`]
//! with a bounded number of attempts and exponential backoff between them.
//!
//! Per attempt:
//!
//! ```text
//! scheduled --(run_at reached)--> active --(Ok)--> completed
//!                                        --(Err)--> retry (back to scheduled)
//!                                        --(Err, budget spent)--> dead
//! ```
//!
//! How many attempts a failure allows depends on its [`RetryClass`]. A job
//! whose lease expires (the process died mid-attempt) is returned to the
//! scheduled set by the reaper and keeps its attempt count.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gbp_common::config::WorkerConfig;
use gbp_common::{RetryClass, get_metrics};
use gbp_core::Clock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::backend::JobQueue;
use crate::error::QueueError;
use crate::job::PublishJob;
use crate::retry::RetryConfig;

/// A failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub class: RetryClass,
    /// Stable machine-readable tag.
    pub code: String,
    pub message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(class: RetryClass, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            message: message.into(),
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self::new(
            RetryClass::Backoff,
            "TIMEOUT",
            format!("attempt did not finish within {}s", after.as_secs()),
        )
    }

    fn budget_spent(attempts: u32) -> Self {
        Self::new(
            RetryClass::Never,
            "ATTEMPTS_EXHAUSTED",
            format!("job stalled after {attempts} attempts"),
        )
    }
}

/// Work performed for each job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one attempt.
    async fn handle(&self, job: &PublishJob) -> Result<(), HandlerError>;

    /// Called once when the job is moved to the dead-letter set.
    async fn on_exhausted(&self, job: &PublishJob, error: &HandlerError);
}

/// What happened to a fetched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    Retrying { run_at: DateTime<Utc> },
    Dead,
    /// The job was cancelled or replaced while the attempt ran.
    Superseded,
}

/// Tuning knobs for [`Worker::run`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub reap_interval: Duration,
    pub handler_timeout: Duration,
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
            lease: config.lease(),
            reap_interval: config.reap_interval(),
            handler_timeout: config.handler_timeout(),
        }
    }
}

fn after(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}

struct Inner<H> {
    queue: Arc<dyn JobQueue>,
    handler: Arc<H>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    options: WorkerOptions,
}

/// Queue consumer.
pub struct Worker<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for Worker<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: JobHandler> Worker<H> {
    /// Create a worker from the worker configuration section.
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<H>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Self {
        Self::with_options(
            queue,
            handler,
            clock,
            RetryConfig::from(config),
            WorkerOptions::from(config),
        )
    }

    #[must_use]
    pub fn with_options(
        queue: Arc<dyn JobQueue>,
        handler: Arc<H>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        options: WorkerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                handler,
                clock,
                retry,
                options,
            }),
        }
    }

    /// Run worker slots and the stalled-lease reaper until `shutdown` turns
    /// `true`. Attempts in progress are finished before this returns.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        for slot in 0..self.inner.options.concurrency {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { worker.slot_loop(slot, shutdown).await });
        }
        let worker = self.clone();
        tasks.spawn(async move { worker.reap_loop(shutdown).await });

        info!(
            concurrency = self.inner.options.concurrency,
            max_attempts = self.inner.retry.max_attempts,
            "Worker started"
        );

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker stopped");
    }

    async fn slot_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(slot, "Worker slot started");
        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(slot, error = %e, "Failed to process job"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = sleep(self.inner.options.poll_interval) => {}
            }
        }
        debug!(slot, "Worker slot stopped");
    }

    async fn reap_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.inner.options.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.inner.queue.reap_stalled(self.inner.clock.now()).await {
                        Ok(0) => {}
                        Ok(count) => {
                            get_metrics().record_reaped(count);
                            warn!(count, "Returned stalled jobs to the queue");
                        }
                        Err(e) => error!(error = %e, "Failed to reap stalled jobs"),
                    }
                }
            }
        }
    }

    /// Process every job that is due now, one at a time.
    pub async fn drain(&self) -> Result<Vec<AttemptOutcome>, QueueError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Fetch and process at most one due job.
    pub async fn run_once(&self) -> Result<Option<AttemptOutcome>, QueueError> {
        let now = self.inner.clock.now();
        let lease_until = after(now, self.inner.options.lease);
        match self.inner.queue.fetch_due(now, lease_until).await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn process(&self, job: PublishJob) -> Result<AttemptOutcome, QueueError> {
        let inner = &self.inner;

        // Only reachable when a lease expired after the last allowed attempt.
        if job.attempts > inner.retry.max_attempts {
            let err = HandlerError::budget_spent(job.attempts - 1);
            return self.bury(&job, &err).await;
        }

        get_metrics().record_attempt();
        info!(
            post_id = %job.post_id,
            job_id = %job.job_id,
            attempt = job.attempts,
            "Running job"
        );

        let result = match timeout(inner.options.handler_timeout, inner.handler.handle(&job)).await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::timed_out(inner.options.handler_timeout)),
        };

        let err = match result {
            Ok(()) => {
                if !inner.queue.complete(&job).await? {
                    debug!(post_id = %job.post_id, job_id = %job.job_id, "Completed job was superseded");
                }
                get_metrics().record_completed();
                info!(post_id = %job.post_id, job_id = %job.job_id, attempt = job.attempts, "Job completed");
                return Ok(AttemptOutcome::Completed);
            }
            Err(err) => err,
        };

        if !inner.retry.should_retry(job.attempts, err.class) {
            return self.bury(&job, &err).await;
        }

        let delay = inner.retry.delay_for_attempt(job.attempts);
        let run_at = after(inner.clock.now(), delay);
        if !inner.queue.retry(&job, run_at, &err.to_string()).await? {
            info!(post_id = %job.post_id, job_id = %job.job_id, "Failed job was superseded, not retrying");
            return Ok(AttemptOutcome::Superseded);
        }

        get_metrics().record_retried();
        warn!(
            post_id = %job.post_id,
            job_id = %job.job_id,
            attempt = job.attempts,
            code = %err.code,
            error = %err.message,
            retry_in_secs = delay.as_secs(),
            "Job failed, will retry"
        );
        Ok(AttemptOutcome::Retrying { run_at })
    }

    async fn bury(&self, job: &PublishJob, err: &HandlerError) -> Result<AttemptOutcome, QueueError> {
        let inner = &self.inner;
        if !inner.queue.bury(job, &err.to_string(), inner.clock.now()).await? {
            info!(post_id = %job.post_id, job_id = %job.job_id, "Failed job was superseded, not burying");
            return Ok(AttemptOutcome::Superseded);
        }

        get_metrics().record_dead();
        error!(
            post_id = %job.post_id,
            job_id = %job.job_id,
            attempts = job.attempts,
            code = %err.code,
            error = %err.message,
            "Job moved to dead letter queue"
        );
        inner.handler.on_exhausted(job, err).await;
        Ok(AttemptOutcome::Dead)
    }
}
