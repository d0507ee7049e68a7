//! End-to-end tests for the publish pipeline.
//!
//! Queue adapter, worker, publish handler, executor and credential refresher
//! run against the in-memory queue and stores, a scripted provider and a
//! manual clock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use gbp_core::provider::{PublishResult, RefreshOutcome};
use gbp_core::services::{CredentialRefresher, PublishExecutor, PublishOutcome, SkipReason};
use gbp_core::testing::{FakeProvider, MemoryStore, fixtures};
use gbp_core::{Clock, ManualClock};
use gbp_db::entities::post::{PostStatus, PostType};
use gbp_queue::{
    AttemptOutcome, JobQueue, JobQueueAdapter, MemoryJobQueue, PublishHandler, RetryConfig,
    Worker, WorkerOptions,
};

struct Pipeline {
    store: Arc<MemoryStore>,
    provider: Arc<FakeProvider>,
    clock: Arc<ManualClock>,
    queue: Arc<MemoryJobQueue>,
    adapter: JobQueueAdapter,
    executor: Arc<PublishExecutor>,
    worker: Worker<PublishHandler>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn pipeline_with(provider: FakeProvider) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(provider);
    let clock = Arc::new(ManualClock::new(start()));
    let queue = Arc::new(MemoryJobQueue::new());

    let credentials = Arc::new(CredentialRefresher::new(
        store.clone(),
        provider.clone(),
        clock.clone(),
    ));
    let executor = Arc::new(PublishExecutor::new(
        store.clone(),
        credentials,
        provider.clone(),
        clock.clone(),
        "en-US",
    ));
    let worker = Worker::with_options(
        queue.clone(),
        Arc::new(PublishHandler::new(executor.clone())),
        clock.clone(),
        RetryConfig::default(),
        WorkerOptions {
            concurrency: 2,
            poll_interval: StdDuration::from_millis(10),
            lease: StdDuration::from_secs(60),
            reap_interval: StdDuration::from_secs(1),
            handler_timeout: StdDuration::from_secs(5),
        },
    );

    store.insert_location(fixtures::location("loc1"));

    Pipeline {
        adapter: JobQueueAdapter::new(queue.clone(), clock.clone()),
        store,
        provider,
        clock,
        queue,
        executor,
        worker,
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(FakeProvider::new())
}

fn server_error() -> PublishResult {
    PublishResult::ServerError {
        status: 500,
        message: "backend error".to_string(),
    }
}

impl Pipeline {
    /// Insert a scheduled post and enqueue it the way the API layer does.
    async fn schedule_post(&self, id: &str, after: Duration) {
        let post = fixtures::scheduled_post(id, "loc1", self.clock.now() + after);
        self.store.insert_post(post.clone());
        self.adapter
            .sync_post(&post, Some("owner@example.com"))
            .await
            .unwrap();
    }

    /// Advance to the retry time of a single retrying outcome.
    fn follow_retry(&self, outcomes: &[AttemptOutcome]) {
        let [AttemptOutcome::Retrying { run_at }] = outcomes else {
            panic!("expected one retry, got {outcomes:?}");
        };
        self.clock.set(*run_at);
    }

    fn status(&self, id: &str) -> PostStatus {
        self.store.post(id).unwrap().status
    }
}

#[tokio::test]
async fn test_scheduled_post_publishes_when_due() {
    let p = pipeline();
    p.schedule_post("p1", Duration::seconds(5)).await;

    assert!(p.worker.drain().await.unwrap().is_empty());
    assert_eq!(p.provider.publish_calls(), 0);

    p.clock.advance(Duration::seconds(5));
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    let post = p.store.post("p1").unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert_eq!(post.published_at.unwrap(), start() + Duration::seconds(5));
    assert_eq!(p.provider.publish_calls(), 1);
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Published]);
    assert!(p.queue.pending("p1").await.unwrap().is_none());

    let (listing, token, _) = &p.provider.published()[0];
    assert_eq!(listing.resource(), "accounts/123/locations/456");
    assert_eq!(token, "fresh-token");
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let p = pipeline();
    p.provider.push_publish(server_error());
    p.provider.push_publish(server_error());
    p.schedule_post("p1", Duration::zero()).await;

    let outcomes = p.worker.drain().await.unwrap();
    assert_eq!(p.status("p1"), PostStatus::Scheduled);
    p.follow_retry(&outcomes);

    let outcomes = p.worker.drain().await.unwrap();
    assert_eq!(p.status("p1"), PostStatus::Scheduled);
    p.follow_retry(&outcomes);

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);
    assert_eq!(p.status("p1"), PostStatus::Published);
    assert_eq!(p.provider.publish_calls(), 3);
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Published]);
    // The cached token is reused across attempts.
    assert_eq!(p.provider.refresh_calls(), 1);
}

#[tokio::test]
async fn test_offer_payload_carries_coupon() {
    let p = pipeline();
    let mut post = fixtures::scheduled_post("p1", "loc1", p.clock.now());
    post.post_type = PostType::Offer;
    post.coupon_code = Some("SAVE10".to_string());
    post.offer_start = Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().into());
    post.offer_end = Some(Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 0).unwrap().into());
    p.store.insert_post(post.clone());
    p.adapter.sync_post(&post, None).await.unwrap();

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    let published = p.provider.published();
    assert_eq!(published.len(), 1);
    let body = serde_json::to_value(&published[0].2).unwrap();
    assert_eq!(body["topicType"], "OFFER");
    assert_eq!(body["offerDetails"]["couponCode"], "SAVE10");
    assert_eq!(body["event"]["schedule"]["startDate"]["day"], 1);
    assert_eq!(body["event"]["schedule"]["endDate"]["day"], 30);
}

#[tokio::test]
async fn test_missing_refresh_token_fails_fast() {
    let p = pipeline();
    let mut location = fixtures::location("loc1");
    location.refresh_token = None;
    p.store.insert_location(location);
    p.schedule_post("p1", Duration::zero()).await;

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);

    let post = p.store.post("p1").unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert!(post.failure_reason.unwrap().starts_with("AUTH_ERROR"));
    assert_eq!(p.provider.total_calls(), 0);
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Failed]);
}

#[tokio::test]
async fn test_repeated_reschedule_leaves_one_job_at_last_time() {
    let p = pipeline();
    p.schedule_post("p1", Duration::minutes(10)).await;
    let base = p.clock.now();
    for minutes in [1, 5, 2] {
        p.adapter
            .reschedule("p1", base + Duration::minutes(minutes), None)
            .await
            .unwrap();
    }

    let counts = p.queue.counts().await.unwrap();
    assert_eq!(counts.scheduled, 1);

    p.clock.advance(Duration::minutes(1));
    assert!(p.worker.drain().await.unwrap().is_empty());

    p.clock.advance(Duration::minutes(1));
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    p.clock.advance(Duration::minutes(30));
    assert!(p.worker.drain().await.unwrap().is_empty());
    assert_eq!(p.provider.publish_calls(), 1);
}

#[tokio::test]
async fn test_cancelled_job_never_runs() {
    let p = pipeline();
    p.schedule_post("p1", Duration::seconds(5)).await;

    p.store.set_post_status("p1", PostStatus::Deleted);
    let post = p.store.post("p1").unwrap();
    p.adapter.sync_post(&post, None).await.unwrap();

    p.clock.advance(Duration::minutes(1));
    assert!(p.worker.drain().await.unwrap().is_empty());
    assert_eq!(p.provider.publish_calls(), 0);
    assert_eq!(p.status("p1"), PostStatus::Deleted);
}

#[tokio::test]
async fn test_always_failing_provider_exhausts_budget() {
    let p = pipeline();
    p.provider.set_publish_default(server_error());
    p.schedule_post("p1", Duration::zero()).await;

    for _ in 0..2 {
        let outcomes = p.worker.drain().await.unwrap();
        // Not failed until the last attempt.
        assert_eq!(p.status("p1"), PostStatus::Scheduled);
        p.follow_retry(&outcomes);
    }
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);

    let post = p.store.post("p1").unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert!(post.failure_reason.unwrap().starts_with("PROVIDER_SERVER_ERROR"));
    assert_eq!(p.provider.publish_calls(), 3);
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Failed]);
    assert_eq!(p.queue.dead_letter("p1").await.unwrap().unwrap().attempts, 3);

    p.clock.advance(Duration::days(1));
    assert!(p.worker.drain().await.unwrap().is_empty());
    assert_eq!(p.provider.publish_calls(), 3);
}

#[tokio::test]
async fn test_invalid_request_is_not_retried() {
    let p = pipeline();
    p.provider.push_publish(PublishResult::InvalidRequest {
        status: 400,
        message: "Invalid summary".to_string(),
    });
    p.schedule_post("p1", Duration::zero()).await;

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);
    assert_eq!(p.provider.publish_calls(), 1);
    let post = p.store.post("p1").unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(
        post.failure_reason.as_deref(),
        Some("INVALID_REQUEST: provider returned 400: Invalid summary")
    );
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Failed]);
}

#[tokio::test]
async fn test_auth_failure_refreshes_and_retries_once() {
    let p = pipeline();
    p.provider.push_publish(PublishResult::AuthFailure {
        status: 401,
        message: "Request had invalid authentication credentials.".to_string(),
    });
    p.schedule_post("p1", Duration::zero()).await;

    let outcomes = p.worker.drain().await.unwrap();
    p.follow_retry(&outcomes);
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    assert_eq!(p.status("p1"), PostStatus::Published);
    assert_eq!(p.provider.publish_calls(), 2);
    // The rejected token was dropped, so the retry fetched a new one.
    assert_eq!(p.provider.refresh_calls(), 2);
}

#[tokio::test]
async fn test_revoked_refresh_token_fails_post_and_clears_credentials() {
    let p = pipeline();
    p.provider.push_refresh(RefreshOutcome::Rejected {
        message: "Token has been expired or revoked.".to_string(),
    });
    p.schedule_post("p1", Duration::zero()).await;

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);
    assert_eq!(p.status("p1"), PostStatus::Failed);
    assert_eq!(p.provider.publish_calls(), 0);

    let location = p.store.location("loc1").unwrap();
    assert!(location.access_token.is_none());
    assert!(location.refresh_token.is_none());
    assert!(location.token_expires_at.is_none());

    // A second post at the same location fails without touching the provider.
    p.schedule_post("p2", Duration::zero()).await;
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);
    assert_eq!(p.status("p2"), PostStatus::Failed);
    assert_eq!(p.provider.refresh_calls(), 1);
}

#[tokio::test]
async fn test_overlapping_publishes_reach_provider_once() {
    let p = pipeline_with(FakeProvider::new().with_publish_delay(StdDuration::from_millis(100)));
    p.schedule_post("p1", Duration::zero()).await;

    let (first, second) = tokio::join!(p.executor.publish("p1"), async {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        p.executor.publish("p1").await
    });

    assert!(matches!(first.unwrap(), PublishOutcome::Published { .. }));
    assert_eq!(
        second.unwrap(),
        PublishOutcome::Skipped(SkipReason::InFlight)
    );
    assert_eq!(p.provider.publish_calls(), 1);

    // The queued job now finds the post published and does nothing.
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);
    assert_eq!(p.provider.publish_calls(), 1);
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Published]);
}

#[tokio::test]
async fn test_published_post_is_never_failed_by_late_job() {
    let p = pipeline();
    p.schedule_post("p1", Duration::zero()).await;
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    // A duplicate enqueue (e.g. a stale API retry) must not republish.
    p.adapter
        .reschedule("p1", p.clock.now(), None)
        .await
        .unwrap();
    p.provider.set_publish_default(server_error());
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);

    assert_eq!(p.provider.publish_calls(), 1);
    assert_eq!(p.status("p1"), PostStatus::Published);
    assert!(p.executor.mark_failed("p1", "late").await.is_ok_and(|applied| !applied));
    assert_eq!(p.store.transitions("p1"), vec![PostStatus::Published]);
}

#[tokio::test]
async fn test_stalled_job_is_recovered_by_reaper() {
    let p = pipeline();
    p.schedule_post("p1", Duration::zero()).await;

    // A worker leases the job and dies.
    let now = p.clock.now();
    let leased = p
        .queue
        .fetch_due(now, now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.attempts, 1);

    p.clock.advance(Duration::seconds(61));
    assert_eq!(p.queue.reap_stalled(p.clock.now()).await.unwrap(), 1);

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);
    assert_eq!(p.status("p1"), PostStatus::Published);
    assert_eq!(p.provider.publish_calls(), 1);
}

#[tokio::test]
async fn test_reschedule_during_attempt_does_not_start_second_attempt() {
    let p = pipeline();
    p.schedule_post("p1", Duration::zero()).await;

    // Another worker process holds the job while it is rescheduled to now.
    let now = p.clock.now();
    let running = p
        .queue
        .fetch_due(now, now + Duration::seconds(60))
        .await
        .unwrap()
        .unwrap();
    p.adapter.reschedule("p1", now, None).await.unwrap();

    assert!(p.worker.drain().await.unwrap().is_empty());
    assert_eq!(p.provider.publish_calls(), 0);

    // Once the old attempt settles, the replacement runs exactly once.
    assert!(!p.queue.complete(&running).await.unwrap());
    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Completed]);
    assert_eq!(p.provider.publish_calls(), 1);
    assert_eq!(p.status("p1"), PostStatus::Published);
}

#[tokio::test]
async fn test_failed_status_write_after_acceptance_is_not_republished() {
    let p = pipeline();
    p.schedule_post("p1", Duration::zero()).await;
    p.store.fail_status_writes(1);

    assert_eq!(p.worker.drain().await.unwrap(), vec![AttemptOutcome::Dead]);
    p.clock.advance(Duration::hours(1));
    assert!(p.worker.drain().await.unwrap().is_empty());

    assert_eq!(p.provider.publish_calls(), 1);
    // Not marked failed: the provider has the post.
    assert_eq!(p.status("p1"), PostStatus::Scheduled);
    assert!(p.store.transitions("p1").is_empty());
    let dead = p.queue.dead_letter("p1").await.unwrap().unwrap();
    assert!(dead.last_error.starts_with("STATUS_WRITE_FAILED: "));
}

#[tokio::test]
async fn test_job_overlapping_direct_publish_finishes_without_retry() {
    let p = pipeline_with(FakeProvider::new().with_publish_delay(StdDuration::from_millis(100)));
    p.schedule_post("p1", Duration::zero()).await;

    let (direct, drained) = tokio::join!(p.executor.publish("p1"), async {
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        p.worker.drain().await
    });

    assert!(matches!(direct.unwrap(), PublishOutcome::Published { .. }));
    assert_eq!(drained.unwrap(), vec![AttemptOutcome::Completed]);
    assert!(p.queue.pending("p1").await.unwrap().is_none());
    assert!(p.queue.dead_letter("p1").await.unwrap().is_none());
    assert_eq!(p.provider.publish_calls(), 1);
}
