//! Metrics collection for the publication pipeline.
//!
//! Counters are process-local and cheap to bump from any worker slot. The
//! worker logs a snapshot on shutdown; nothing is exported over HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Pipeline metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    // === Queue ===
    /// Jobs enqueued (schedule or reschedule).
    pub jobs_enqueued: AtomicU64,
    /// Jobs cancelled before they ran.
    pub jobs_cancelled: AtomicU64,
    /// Handler attempts started.
    pub job_attempts: AtomicU64,
    /// Jobs that finished successfully.
    pub jobs_completed: AtomicU64,
    /// Attempts that were rescheduled with backoff.
    pub jobs_retried: AtomicU64,
    /// Jobs moved to the dead-letter set.
    pub jobs_dead: AtomicU64,
    /// Stalled leases returned to the queue.
    pub jobs_reaped: AtomicU64,

    // === Provider ===
    /// Posts accepted by the provider.
    pub publishes_succeeded: AtomicU64,
    /// Publish attempts that failed.
    pub publishes_failed: AtomicU64,
    /// OAuth refresh-token exchanges performed.
    pub token_refreshes: AtomicU64,
    /// Refresh tokens the provider rejected.
    pub token_revocations: AtomicU64,

    // === Periodic ===
    /// Periodic task runs that returned an error or panicked.
    pub periodic_failures: AtomicU64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_cancelled: u64,
    pub job_attempts: u64,
    pub jobs_completed: u64,
    pub jobs_retried: u64,
    pub jobs_dead: u64,
    pub jobs_reaped: u64,
    pub publishes_succeeded: u64,
    pub publishes_failed: u64,
    pub token_refreshes: u64,
    pub token_revocations: u64,
    pub periodic_failures: u64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs_enqueued: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            job_attempts: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_dead: AtomicU64::new(0),
            jobs_reaped: AtomicU64::new(0),
            publishes_succeeded: AtomicU64::new(0),
            publishes_failed: AtomicU64::new(0),
            token_refreshes: AtomicU64::new(0),
            token_revocations: AtomicU64::new(0),
            periodic_failures: AtomicU64::new(0),
        }
    }

    /// Record a job enqueue.
    pub fn record_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job cancellation.
    pub fn record_cancelled(&self) {
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handler attempt.
    pub fn record_attempt(&self) {
        self.job_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed job.
    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry.
    pub fn record_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dead job.
    pub fn record_dead(&self) {
        self.jobs_dead.fetch_add(1, Ordering::Relaxed);
    }

    /// Record reaped stalled leases.
    pub fn record_reaped(&self, count: u64) {
        self.jobs_reaped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a publish outcome.
    pub fn record_publish(&self, success: bool) {
        if success {
            self.publishes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publishes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a token refresh; `revoked` when the provider rejected the refresh token.
    pub fn record_token_refresh(&self, revoked: bool) {
        if revoked {
            self.token_revocations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.token_refreshes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed periodic task run.
    pub fn record_periodic_failure(&self) {
        self.periodic_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            job_attempts: self.job_attempts.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead: self.jobs_dead.load(Ordering::Relaxed),
            jobs_reaped: self.jobs_reaped.load(Ordering::Relaxed),
            publishes_succeeded: self.publishes_succeeded.load(Ordering::Relaxed),
            publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            token_revocations: self.token_revocations.load(Ordering::Relaxed),
            periodic_failures: self.periodic_failures.load(Ordering::Relaxed),
        }
    }
}
