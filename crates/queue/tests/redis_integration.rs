//! Redis integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Set `REDIS_URL` environment variable to point to your Redis instance.
//! Default: <redis://localhost:6379>

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use gbp_common::IdGenerator;
use gbp_queue::{JobCounts, JobQueue, PublishJob, QueueError, RedisJobQueue};

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
}

fn job(post_id: &str, run_at: DateTime<Utc>) -> PublishJob {
    PublishJob::new(IdGenerator::new().generate(), post_id, None, run_at, at(0))
}

/// Connect to a queue name no other test uses.
async fn fresh_queue() -> RedisJobQueue {
    let name = format!("test-{}", IdGenerator::new().generate());
    RedisJobQueue::connect(&get_redis_url(), "gbp-test", &name)
        .await
        .expect("Failed to connect to Redis")
}

async fn teardown(queue: RedisJobQueue) {
    queue.purge().await.expect("Failed to purge queue");
    queue.quit().await.expect("Failed to quit");
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let queue = fresh_queue().await;
    assert_eq!(queue.counts().await.unwrap(), JobCounts::default());
    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_schedule_rejects_duplicate_post() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(10))).await.unwrap();
    let err = queue.schedule(&job("p1", at(20))).await.unwrap_err();
    assert!(matches!(err, QueueError::AlreadyScheduled(id) if id == "p1"));

    let pending = queue.pending("p1").await.unwrap().unwrap();
    assert_eq!(pending.run_at, at(10));

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_reschedule_replaces_job() {
    let queue = fresh_queue().await;

    let first = job("p1", at(600));
    assert_eq!(queue.reschedule(&first).await.unwrap(), None);
    for secs in [60, 300, 120] {
        queue.reschedule(&job("p1", at(secs))).await.unwrap();
    }

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.scheduled, 1);
    assert_eq!(queue.pending("p1").await.unwrap().unwrap().run_at, at(120));

    assert!(queue.fetch_due(at(119), at(180)).await.unwrap().is_none());
    let leased = queue.fetch_due(at(120), at(180)).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 1);
    assert!(queue.complete(&leased).await.unwrap());
    assert_eq!(queue.counts().await.unwrap(), JobCounts::default());

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_cancel_removes_job() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(5))).await.unwrap();
    assert!(queue.cancel("p1").await.unwrap());
    assert!(!queue.cancel("p1").await.unwrap());
    assert!(queue.fetch_due(at(60), at(120)).await.unwrap().is_none());

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_superseded_attempt_cannot_touch_new_job() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(0))).await.unwrap();
    let leased = queue.fetch_due(at(0), at(60)).await.unwrap().unwrap();

    let replacement = job("p1", at(300));
    assert_eq!(
        queue.reschedule(&replacement).await.unwrap(),
        Some(leased.job_id.clone())
    );

    assert!(!queue.complete(&leased).await.unwrap());
    assert!(!queue.retry(&leased, at(30), "late").await.unwrap());
    assert!(!queue.bury(&leased, "late", at(30)).await.unwrap());

    let pending = queue.pending("p1").await.unwrap().unwrap();
    assert_eq!(pending.job_id, replacement.job_id);
    assert_eq!(pending.run_at, at(300));
    assert!(queue.dead_letter("p1").await.unwrap().is_none());
    assert_eq!(queue.counts().await.unwrap().active, 0);

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_replacement_waits_for_running_attempt() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(0))).await.unwrap();
    queue.schedule(&job("p2", at(5))).await.unwrap();
    let running = queue.fetch_due(at(0), at(60)).await.unwrap().unwrap();
    let replacement = job("p1", at(0));
    queue.reschedule(&replacement).await.unwrap();

    // p1 is still leased, so the next due post is p2.
    let other = queue.fetch_due(at(10), at(60)).await.unwrap().unwrap();
    assert_eq!(other.post_id, "p2");
    assert!(queue.fetch_due(at(10), at(60)).await.unwrap().is_none());

    assert!(!queue.complete(&running).await.unwrap());
    let next = queue.fetch_due(at(10), at(60)).await.unwrap().unwrap();
    assert_eq!(next.job_id, replacement.job_id);
    assert_eq!(next.attempts, 1);

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_reaper_keeps_waiting_replacement_time() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(0))).await.unwrap();
    let stalled = queue.fetch_due(at(0), at(10)).await.unwrap().unwrap();
    let replacement = job("p1", at(300));
    queue.reschedule(&replacement).await.unwrap();

    assert_eq!(queue.reap_stalled(at(11)).await.unwrap(), 1);
    assert!(queue.fetch_due(at(11), at(60)).await.unwrap().is_none());
    assert!(!queue.retry(&stalled, at(20), "late").await.unwrap());

    let next = queue.fetch_due(at(300), at(360)).await.unwrap().unwrap();
    assert_eq!(next.job_id, replacement.job_id);

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_retry_then_bury() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(0))).await.unwrap();
    let leased = queue.fetch_due(at(0), at(60)).await.unwrap().unwrap();
    assert!(queue.retry(&leased, at(30), "PROVIDER_SERVER_ERROR: 500").await.unwrap());

    let pending = queue.pending("p1").await.unwrap().unwrap();
    assert_eq!(pending.run_at, at(30));
    assert_eq!(pending.last_error.as_deref(), Some("PROVIDER_SERVER_ERROR: 500"));

    let leased = queue.fetch_due(at(30), at(90)).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 2);
    assert!(queue.bury(&leased, "PROVIDER_SERVER_ERROR: 500", at(31)).await.unwrap());

    let dead = queue.dead_letter("p1").await.unwrap().unwrap();
    assert_eq!(dead.attempts, 2);
    assert_eq!(dead.failed_at, at(31));
    assert_eq!(
        queue.counts().await.unwrap(),
        JobCounts {
            scheduled: 0,
            active: 0,
            dead: 1,
        }
    );

    // Scheduling again clears the dead-letter entry.
    queue.schedule(&job("p1", at(600))).await.unwrap();
    assert!(queue.dead_letter("p1").await.unwrap().is_none());

    teardown(queue).await;
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_reap_stalled_returns_expired_leases() {
    let queue = fresh_queue().await;

    queue.schedule(&job("p1", at(0))).await.unwrap();
    queue.schedule(&job("p2", at(0))).await.unwrap();
    let first = queue.fetch_due(at(0), at(60)).await.unwrap().unwrap();
    let _second = queue.fetch_due(at(0), at(600)).await.unwrap().unwrap();

    assert_eq!(queue.reap_stalled(at(61)).await.unwrap(), 1);

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.scheduled, 1);
    assert_eq!(counts.active, 1);

    let again = queue.fetch_due(at(61), at(120)).await.unwrap().unwrap();
    assert_eq!(again.post_id, first.post_id);
    assert_eq!(again.attempts, 2);

    teardown(queue).await;
}
