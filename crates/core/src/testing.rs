//! In-memory test doubles.
//!
//! [`MemoryStore`] implements every store trait with the same conditional
//! write rules as the sea-orm repositories. [`FakeProvider`] replays scripted
//! responses and records every call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gbp_common::{AppError, AppResult, IdGenerator};
use gbp_db::entities::post::{PostStatus, PostType};
use gbp_db::entities::{location, post, review};
use gbp_db::repositories::{ReviewUpsert, StatusTransition, TokenUpdate};

use crate::provider::{
    AccessGrant, ListingPath, LocalPost, ProviderClient, ProviderError, PublishResult,
    RefreshOutcome, ReviewPage,
};
use crate::store::{LocationStore, PostStore, ReviewStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Model builders with sensible defaults.
pub mod fixtures {
    use super::*;
    use serde_json::json;

    /// A connected location with a refresh token and no cached access token.
    #[must_use]
    pub fn location(id: &str) -> location::Model {
        location::Model {
            id: id.to_string(),
            name: format!("Location {id}"),
            gmb_account_id: Some("accounts/123".to_string()),
            gmb_location_id: Some("locations/456".to_string()),
            access_token: None,
            refresh_token: Some("refresh-token".to_string()),
            token_expires_at: None,
            auto_reply_enabled: false,
            auto_reply_template: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    /// A `SCHEDULED` what's-new post.
    #[must_use]
    pub fn scheduled_post(id: &str, location_id: &str, at: DateTime<Utc>) -> post::Model {
        post::Model {
            id: id.to_string(),
            location_id: location_id.to_string(),
            post_type: PostType::WhatsNew,
            content: format!("Post {id}"),
            title: None,
            media_urls: json!([]),
            call_to_action: None,
            call_to_action_url: None,
            event_start: None,
            event_end: None,
            offer_start: None,
            offer_end: None,
            coupon_code: None,
            scheduled_at: Some(at.into()),
            published_at: None,
            status: PostStatus::Scheduled,
            failure_reason: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    /// An unreplied review.
    #[must_use]
    pub fn review(id: &str, location_id: &str, rating: i32) -> review::Model {
        review::Model {
            id: id.to_string(),
            location_id: location_id.to_string(),
            external_review_id: format!("ext-{id}"),
            reviewer_name: None,
            star_rating: rating,
            comment: None,
            review_created_at: None,
            reply_comment: None,
            replied_at: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }
}

#[derive(Default)]
struct StoreState {
    locations: HashMap<String, location::Model>,
    posts: HashMap<String, post::Model>,
    reviews: HashMap<String, review::Model>,
    transitions: Vec<(String, PostStatus)>,
    failing_status_writes: u32,
}

/// In-memory post, location and review store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    id_gen: IdGenerator,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_location(&self, location: location::Model) {
        lock(&self.state)
            .locations
            .insert(location.id.clone(), location);
    }

    pub fn insert_post(&self, post: post::Model) {
        lock(&self.state).posts.insert(post.id.clone(), post);
    }

    pub fn insert_review(&self, review: review::Model) {
        lock(&self.state).reviews.insert(review.id.clone(), review);
    }

    #[must_use]
    pub fn location(&self, id: &str) -> Option<location::Model> {
        lock(&self.state).locations.get(id).cloned()
    }

    #[must_use]
    pub fn post(&self, id: &str) -> Option<post::Model> {
        lock(&self.state).posts.get(id).cloned()
    }

    /// All reviews, oldest first.
    #[must_use]
    pub fn reviews(&self) -> Vec<review::Model> {
        let mut reviews: Vec<_> = lock(&self.state).reviews.values().cloned().collect();
        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        reviews
    }

    /// Overwrite a post's status out-of-band, as the API layer would.
    pub fn set_post_status(&self, id: &str, status: PostStatus) {
        if let Some(post) = lock(&self.state).posts.get_mut(id) {
            post.status = status;
        }
    }

    /// Edit a post in place.
    pub fn update_post(&self, id: &str, f: impl FnOnce(&mut post::Model)) {
        if let Some(post) = lock(&self.state).posts.get_mut(id) {
            f(post);
        }
    }

    /// Make the next `count` status writes fail with a database error.
    pub fn fail_status_writes(&self, count: u32) {
        lock(&self.state).failing_status_writes = count;
    }

    /// Terminal transitions applied to `post_id`, in order.
    #[must_use]
    pub fn transitions(&self, post_id: &str) -> Vec<PostStatus> {
        lock(&self.state)
            .transitions
            .iter()
            .filter(|(id, _)| id == post_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn find_with_location(
        &self,
        id: &str,
    ) -> AppResult<Option<(post::Model, Option<location::Model>)>> {
        let state = lock(&self.state);
        Ok(state.posts.get(id).map(|post| {
            let location = state.locations.get(&post.location_id).cloned();
            (post.clone(), location)
        }))
    }

    async fn update_status(&self, id: &str, transition: StatusTransition) -> AppResult<bool> {
        let mut state = lock(&self.state);
        if state.failing_status_writes > 0 {
            state.failing_status_writes -= 1;
            return Err(AppError::Database("connection reset".to_string()));
        }
        let Some(post) = state.posts.get_mut(id) else {
            return Ok(false);
        };
        if !post.status.is_transitionable() {
            return Ok(false);
        }

        let status = match transition {
            StatusTransition::Published { published_at } => {
                post.status = PostStatus::Published;
                post.published_at = Some(published_at.into());
                post.failure_reason = None;
                PostStatus::Published
            }
            StatusTransition::Failed { reason } => {
                post.status = PostStatus::Failed;
                post.failure_reason = Some(reason);
                PostStatus::Failed
            }
        };
        post.updated_at = Some(Utc::now().into());
        state.transitions.push((id.to_string(), status));
        Ok(true)
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<location::Model>> {
        Ok(self.location(id))
    }

    async fn update_tokens(&self, id: &str, update: TokenUpdate) -> AppResult<()> {
        let mut state = lock(&self.state);
        let location = state
            .locations
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Location {id} not found")))?;

        match update {
            TokenUpdate::Refreshed {
                access_token,
                expires_at,
                refresh_token,
            } => {
                location.access_token = Some(access_token);
                location.token_expires_at = Some(expires_at.into());
                if let Some(refresh_token) = refresh_token {
                    location.refresh_token = Some(refresh_token);
                }
            }
            TokenUpdate::AccessTokenExpired => {
                location.access_token = None;
                location.token_expires_at = None;
            }
            TokenUpdate::Cleared => {
                location.access_token = None;
                location.refresh_token = None;
                location.token_expires_at = None;
            }
        }
        location.updated_at = Some(Utc::now().into());
        Ok(())
    }

    async fn list_connected(&self) -> AppResult<Vec<location::Model>> {
        let mut locations: Vec<_> = lock(&self.state)
            .locations
            .values()
            .filter(|l| l.refresh_token.is_some() && l.has_provider_ids())
            .cloned()
            .collect();
        locations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(locations)
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn upsert(&self, data: ReviewUpsert) -> AppResult<()> {
        let mut state = lock(&self.state);
        let now = Utc::now();
        let existing = state.reviews.values_mut().find(|r| {
            r.location_id == data.location_id && r.external_review_id == data.external_review_id
        });

        match existing {
            Some(r) => {
                r.reviewer_name = data.reviewer_name;
                r.star_rating = data.star_rating;
                r.comment = data.comment;
                r.review_created_at = data.review_created_at.map(Into::into);
                r.reply_comment = data.reply_comment;
                r.replied_at = data.replied_at.map(Into::into);
                r.updated_at = Some(now.into());
            }
            None => {
                let id = self.id_gen.generate();
                state.reviews.insert(
                    id.clone(),
                    review::Model {
                        id,
                        location_id: data.location_id,
                        external_review_id: data.external_review_id,
                        reviewer_name: data.reviewer_name,
                        star_rating: data.star_rating,
                        comment: data.comment,
                        review_created_at: data.review_created_at.map(Into::into),
                        reply_comment: data.reply_comment,
                        replied_at: data.replied_at.map(Into::into),
                        created_at: now.into(),
                        updated_at: Some(now.into()),
                    },
                );
            }
        }
        Ok(())
    }

    async fn find_unreplied_for_auto_reply(
        &self,
        limit: u64,
    ) -> AppResult<Vec<(review::Model, location::Model)>> {
        let state = lock(&self.state);
        let mut rows: Vec<_> = state
            .reviews
            .values()
            .filter(|r| r.replied_at.is_none() && r.reply_comment.is_none())
            .filter_map(|r| {
                state
                    .locations
                    .get(&r.location_id)
                    .filter(|l| l.auto_reply_enabled)
                    .map(|l| (r.clone(), l.clone()))
            })
            .collect();
        rows.sort_by(|a, b| a.0.created_at.cmp(&b.0.created_at).then(a.0.id.cmp(&b.0.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn mark_replied(
        &self,
        id: &str,
        comment: &str,
        replied_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = lock(&self.state);
        match state.reviews.get_mut(id) {
            Some(r) if r.replied_at.is_none() => {
                r.reply_comment = Some(comment.to_string());
                r.replied_at = Some(replied_at.into());
                r.updated_at = Some(Utc::now().into());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Recorded publish call: listing, bearer token, payload.
pub type PublishCall = (ListingPath, String, LocalPost);

/// Recorded reply call: listing, provider review id, comment.
pub type ReplyCall = (ListingPath, String, String);

/// Scripted provider.
///
/// Queued responses are consumed in order; once a queue is empty the
/// default response is used (publish succeeds, refresh grants
/// `fresh-token` for an hour, review listings are empty).
pub struct FakeProvider {
    publish_script: Mutex<VecDeque<PublishResult>>,
    publish_default: Mutex<PublishResult>,
    refresh_script: Mutex<VecDeque<RefreshOutcome>>,
    review_script: Mutex<VecDeque<Result<ReviewPage, ProviderError>>>,
    publish_delay: Option<Duration>,
    refresh_delay: Option<Duration>,
    publish_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    review_calls: AtomicUsize,
    reply_calls: AtomicUsize,
    published: Mutex<Vec<PublishCall>>,
    replies: Mutex<Vec<ReplyCall>>,
    review_page_tokens: Mutex<Vec<Option<String>>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            publish_script: Mutex::new(VecDeque::new()),
            publish_default: Mutex::new(PublishResult::Success { name: None }),
            refresh_script: Mutex::new(VecDeque::new()),
            review_script: Mutex::new(VecDeque::new()),
            publish_delay: None,
            refresh_delay: None,
            publish_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
            reply_calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            review_page_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Hold every publish call for `delay` before answering.
    #[must_use]
    pub const fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    /// Hold every refresh call for `delay` before answering.
    #[must_use]
    pub const fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    pub fn push_publish(&self, result: PublishResult) {
        lock(&self.publish_script).push_back(result);
    }

    /// Response used once the publish script is exhausted.
    pub fn set_publish_default(&self, result: PublishResult) {
        *lock(&self.publish_default) = result;
    }

    pub fn push_refresh(&self, outcome: RefreshOutcome) {
        lock(&self.refresh_script).push_back(outcome);
    }

    pub fn push_review_page(&self, page: Result<ReviewPage, ProviderError>) {
        lock(&self.review_script).push_back(page);
    }

    #[must_use]
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Every HTTP call of any kind.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.publish_calls()
            + self.refresh_calls()
            + self.review_calls.load(Ordering::SeqCst)
            + self.reply_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn published(&self) -> Vec<PublishCall> {
        lock(&self.published).clone()
    }

    #[must_use]
    pub fn replies(&self) -> Vec<ReplyCall> {
        lock(&self.replies).clone()
    }

    /// Page tokens passed to `list_reviews`, in call order.
    #[must_use]
    pub fn review_page_tokens(&self) -> Vec<Option<String>> {
        lock(&self.review_page_tokens).clone()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn refresh_access_token(&self, _refresh_token: &str) -> RefreshOutcome {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.refresh_script).pop_front().unwrap_or_else(|| {
            RefreshOutcome::Granted(AccessGrant {
                access_token: "fresh-token".to_string(),
                expires_in: Some(3600),
                refresh_token: None,
            })
        })
    }

    async fn create_local_post(
        &self,
        listing: &ListingPath,
        access_token: &str,
        post: &LocalPost,
    ) -> PublishResult {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.published).push((listing.clone(), access_token.to_string(), post.clone()));
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.publish_script).pop_front();
        scripted.unwrap_or_else(|| lock(&self.publish_default).clone())
    }

    async fn list_reviews(
        &self,
        _listing: &ListingPath,
        _access_token: &str,
        page_token: Option<&str>,
    ) -> Result<ReviewPage, ProviderError> {
        self.review_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.review_page_tokens).push(page_token.map(str::to_string));
        lock(&self.review_script)
            .pop_front()
            .unwrap_or_else(|| Ok(ReviewPage::default()))
    }

    async fn reply_to_review(
        &self,
        listing: &ListingPath,
        _access_token: &str,
        review_id: &str,
        comment: &str,
    ) -> Result<(), ProviderError> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.replies).push((listing.clone(), review_id.to_string(), comment.to_string()));
        Ok(())
    }
}
