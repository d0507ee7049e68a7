//! Fixed-interval background tasks.
//!
//! Each task gets its own timer. Every run is spawned separately, so an
//! error or a panic in one run is logged and the timer keeps going. Ticks
//! missed while a run was still going are skipped rather than bursted.
//!
//! Tasks only communicate with the publish pipeline through the database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gbp_common::config::PeriodicConfig;
use gbp_common::get_metrics;
use gbp_core::services::{AutoReplier, ReviewPoller};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Error type returned by periodic tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A task that runs on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Run once. Returns the number of items processed.
    async fn run(&self) -> Result<u64, TaskError>;
}

/// Periodically pulls provider reviews into the review store.
pub struct ReviewPollTask {
    poller: Arc<ReviewPoller>,
    interval: Duration,
}

impl ReviewPollTask {
    #[must_use]
    pub const fn new(poller: Arc<ReviewPoller>, interval: Duration) -> Self {
        Self { poller, interval }
    }
}

#[async_trait]
impl PeriodicTask for ReviewPollTask {
    fn name(&self) -> &'static str {
        "review-poll"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<u64, TaskError> {
        Ok(self.poller.poll_all().await?)
    }
}

/// Periodically answers unreplied reviews.
pub struct AutoReplyTask {
    replier: Arc<AutoReplier>,
    interval: Duration,
}

impl AutoReplyTask {
    #[must_use]
    pub const fn new(replier: Arc<AutoReplier>, interval: Duration) -> Self {
        Self { replier, interval }
    }
}

#[async_trait]
impl PeriodicTask for AutoReplyTask {
    fn name(&self) -> &'static str {
        "auto-reply"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> Result<u64, TaskError> {
        Ok(self.replier.run_once().await?)
    }
}

/// Build the enabled review tasks from configuration.
#[must_use]
pub fn review_tasks(
    config: &PeriodicConfig,
    poller: Arc<ReviewPoller>,
    replier: Arc<AutoReplier>,
) -> Vec<Arc<dyn PeriodicTask>> {
    let mut tasks: Vec<Arc<dyn PeriodicTask>> = Vec::new();
    if config.review_poll_enabled {
        tasks.push(Arc::new(ReviewPollTask::new(
            poller,
            Duration::from_secs(config.review_poll_interval_secs.max(1)),
        )));
    }
    if config.auto_reply_enabled {
        tasks.push(Arc::new(AutoReplyTask::new(
            replier,
            Duration::from_secs(config.auto_reply_interval_secs.max(1)),
        )));
    }
    tasks
}

/// Run `tasks` on their intervals until `shutdown` turns `true`.
///
/// The first run of each task happens immediately. A run in progress when
/// shutdown is signalled is allowed to finish.
pub async fn run_periodic(tasks: Vec<Arc<dyn PeriodicTask>>, shutdown: watch::Receiver<bool>) {
    let mut timers = JoinSet::new();

    for task in tasks {
        let mut shutdown = shutdown.clone();
        timers.spawn(async move {
            let mut ticker = interval(task.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(task = task.name(), interval_secs = task.interval().as_secs(), "Periodic task scheduled");

            while !*shutdown.borrow() {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => run_isolated(&task).await,
                }
            }
            debug!(task = task.name(), "Periodic task stopped");
        });
    }

    while let Some(result) = timers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Periodic timer ended abnormally");
        }
    }
}

async fn run_isolated(task: &Arc<dyn PeriodicTask>) {
    let name = task.name();
    let run = {
        let task = Arc::clone(task);
        tokio::spawn(async move { task.run().await })
    };

    match run.await {
        Ok(Ok(count)) => {
            if count > 0 {
                info!(task = name, count, "Periodic task finished");
            } else {
                debug!(task = name, "Periodic task finished");
            }
        }
        Ok(Err(e)) => {
            get_metrics().record_periodic_failure();
            error!(task = name, error = %e, "Periodic task failed");
        }
        Err(e) => {
            get_metrics().record_periodic_failure();
            error!(task = name, error = %e, "Periodic task panicked");
        }
    }
}
