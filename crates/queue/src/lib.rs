//! Job queue and background processing for gbp-publisher.
//!
//! - **Backends**: durable Redis queue and an in-memory equivalent, one job per post
//! - **Adapter**: schedule / cancel / reschedule publish jobs from the API layer
//! - **Worker**: concurrent job execution with bounded retries and a stalled-lease reaper
//! - **Retry**: exponential backoff and dead letter records
//! - **Scheduler**: fixed-interval review polling and auto-reply tasks

pub mod adapter;
pub mod backend;
pub mod error;
pub mod handler;
pub mod job;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use adapter::{JobQueueAdapter, SyncAction};
pub use backend::{DeadJob, JobQueue, MemoryJobQueue, RedisJobQueue};
pub use error::QueueError;
pub use handler::PublishHandler;
pub use job::{JobCounts, JobHandle, PublishJob};
pub use retry::{DeadLetterEntry, RetryConfig};
pub use scheduler::{
    AutoReplyTask, PeriodicTask, ReviewPollTask, TaskError, review_tasks, run_periodic,
};
pub use worker::{AttemptOutcome, HandlerError, JobHandler, Worker, WorkerOptions};
