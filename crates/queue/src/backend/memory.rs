//! In-process job queue.
//!
//! Same semantics as [`RedisJobQueue`](super::RedisJobQueue) without
//! durability. Used by tests and single-process local runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DeadJob, JobQueue, score};
use crate::error::QueueError;
use crate::job::{JobCounts, PublishJob};

#[derive(Default)]
struct State {
    jobs: HashMap<String, PublishJob>,
    /// post id -> run-at score
    scheduled: HashMap<String, i64>,
    /// post id -> lease deadline score
    active: HashMap<String, i64>,
    dead: HashMap<String, DeadJob>,
}

impl State {
    fn is_current(&self, job: &PublishJob) -> bool {
        self.jobs
            .get(&job.post_id)
            .is_some_and(|stored| stored.job_id == job.job_id)
    }

    fn remove(&mut self, post_id: &str) -> Option<PublishJob> {
        self.active.remove(post_id);
        self.discard(post_id)
    }

    /// Drop the job but keep any lease held by a running attempt.
    fn discard(&mut self, post_id: &str) -> Option<PublishJob> {
        self.scheduled.remove(post_id);
        self.jobs.remove(post_id)
    }

    /// A superseded attempt gives its lease back, unless the current job
    /// has already been leased in its place.
    fn release_superseded(&mut self, post_id: &str) {
        if !self.jobs.contains_key(post_id) || self.scheduled.contains_key(post_id) {
            self.active.remove(post_id);
        }
    }

    fn insert(&mut self, job: &PublishJob) {
        self.dead.remove(&job.post_id);
        self.scheduled.insert(job.post_id.clone(), score(job.run_at));
        self.jobs.insert(job.post_id.clone(), job.clone());
    }
}

/// In-memory [`JobQueue`].
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn schedule(&self, job: &PublishJob) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.jobs.contains_key(&job.post_id) {
            return Err(QueueError::AlreadyScheduled(job.post_id.clone()));
        }
        state.insert(job);
        Ok(())
    }

    async fn reschedule(&self, job: &PublishJob) -> Result<Option<String>, QueueError> {
        let mut state = self.state();
        let previous = state.discard(&job.post_id).map(|j| j.job_id);
        state.insert(job);
        Ok(previous)
    }

    async fn cancel(&self, post_id: &str) -> Result<bool, QueueError> {
        Ok(self.state().discard(post_id).is_some())
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<PublishJob>, QueueError> {
        let mut state = self.state();
        let now = score(now);

        let Some(post_id) = state
            .scheduled
            .iter()
            .filter(|(id, at)| **at <= now && !state.active.contains_key(*id))
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, _)| id.clone())
        else {
            return Ok(None);
        };

        state.scheduled.remove(&post_id);
        let Some(job) = state.jobs.get_mut(&post_id) else {
            return Ok(None);
        };
        job.attempts += 1;
        let job = job.clone();
        state.active.insert(post_id, score(lease_until));
        Ok(Some(job))
    }

    async fn complete(&self, job: &PublishJob) -> Result<bool, QueueError> {
        let mut state = self.state();
        if !state.is_current(job) {
            state.release_superseded(&job.post_id);
            return Ok(false);
        }
        state.remove(&job.post_id);
        Ok(true)
    }

    async fn retry(
        &self,
        job: &PublishJob,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, QueueError> {
        let mut state = self.state();
        if !state.is_current(job) {
            state.release_superseded(&job.post_id);
            return Ok(false);
        }
        let mut next = job.clone();
        next.run_at = run_at;
        next.last_error = Some(error.to_string());
        state.active.remove(&job.post_id);
        state.scheduled.insert(job.post_id.clone(), score(run_at));
        state.jobs.insert(job.post_id.clone(), next);
        Ok(true)
    }

    async fn bury(
        &self,
        job: &PublishJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut state = self.state();
        if !state.is_current(job) {
            state.release_superseded(&job.post_id);
            return Ok(false);
        }
        state.remove(&job.post_id);
        state.dead.insert(
            job.post_id.clone(),
            DeadJob::new(job.clone(), job.attempts, error.to_string(), now),
        );
        Ok(true)
    }

    async fn reap_stalled(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut state = self.state();
        let now = score(now);
        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|(_, deadline)| **deadline < now)
            .map(|(id, _)| id.clone())
            .collect();

        for post_id in &stalled {
            state.active.remove(post_id);
            if state.jobs.contains_key(post_id) {
                state.scheduled.entry(post_id.clone()).or_insert(now);
            }
        }
        Ok(stalled.len() as u64)
    }

    async fn pending(&self, post_id: &str) -> Result<Option<PublishJob>, QueueError> {
        Ok(self.state().jobs.get(post_id).cloned())
    }

    async fn dead_letter(&self, post_id: &str) -> Result<Option<DeadJob>, QueueError> {
        Ok(self.state().dead.get(post_id).cloned())
    }

    async fn counts(&self) -> Result<JobCounts, QueueError> {
        let state = self.state();
        Ok(JobCounts {
            scheduled: state.scheduled.len() as u64,
            active: state.active.len() as u64,
            dead: state.dead.len() as u64,
        })
    }
}
