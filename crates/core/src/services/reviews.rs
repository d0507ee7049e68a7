//! Review polling and auto-reply.
//!
//! Both services run from the periodic task runner and only touch the
//! review and location stores; they share nothing with the publish path.

use std::sync::Arc;

use async_trait::async_trait;
use gbp_common::AppError;
use gbp_db::entities::{location, review};
use gbp_db::repositories::ReviewUpsert;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::credentials::{CredentialError, CredentialRefresher};
use crate::clock::Clock;
use crate::provider::{ListingPath, ProviderClient, ProviderError};
use crate::store::{LocationStore, ReviewStore};

/// Pages fetched per location on each poll.
pub const MAX_REVIEW_PAGES: usize = 5;

/// Failure while syncing or replying for a single location.
#[derive(Debug, Error)]
pub enum ReviewTaskError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] AppError),
}

fn listing_for(location: &location::Model) -> Option<ListingPath> {
    location.has_provider_ids().then(|| {
        ListingPath::new(
            location.gmb_account_id.as_deref().unwrap_or_default(),
            location.gmb_location_id.as_deref().unwrap_or_default(),
        )
    })
}

/// Pulls reviews for every connected location into the review store.
pub struct ReviewPoller {
    locations: Arc<dyn LocationStore>,
    reviews: Arc<dyn ReviewStore>,
    credentials: Arc<CredentialRefresher>,
    provider: Arc<dyn ProviderClient>,
}

impl ReviewPoller {
    /// Create a new review poller.
    #[must_use]
    pub fn new(
        locations: Arc<dyn LocationStore>,
        reviews: Arc<dyn ReviewStore>,
        credentials: Arc<CredentialRefresher>,
        provider: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            locations,
            reviews,
            credentials,
            provider,
        }
    }

    /// Poll every connected location. Returns the number of reviews stored.
    ///
    /// A failure for one location is logged and the rest continue.
    pub async fn poll_all(&self) -> Result<u64, AppError> {
        let locations = self.locations.list_connected().await?;
        let mut total = 0;

        for location in &locations {
            match self.poll_location(location).await {
                Ok(count) => total += count,
                Err(e) => {
                    warn!(location_id = %location.id, error = %e, "Review poll failed for location");
                }
            }
        }

        info!(locations = locations.len(), reviews = total, "Review poll finished");
        Ok(total)
    }

    /// Fetch up to [`MAX_REVIEW_PAGES`] pages for one location.
    pub async fn poll_location(&self, location: &location::Model) -> Result<u64, ReviewTaskError> {
        let Some(listing) = listing_for(location) else {
            return Ok(0);
        };
        let token = self.credentials.get_valid_token(&location.id).await?;

        let mut page_token: Option<String> = None;
        let mut stored = 0;

        for _ in 0..MAX_REVIEW_PAGES {
            let page = match self
                .provider
                .list_reviews(&listing, &token, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e @ ProviderError::Auth { .. }) => {
                    self.credentials.expire_access_token(&location.id).await?;
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            for r in page.reviews {
                let rating = r.rating();
                let (reply_comment, replied_at) = match r.review_reply {
                    Some(reply) => (Some(reply.comment), reply.update_time),
                    None => (None, None),
                };
                self.reviews
                    .upsert(ReviewUpsert {
                        location_id: location.id.clone(),
                        external_review_id: r.review_id,
                        reviewer_name: r.reviewer.and_then(|rv| rv.display_name),
                        star_rating: rating,
                        comment: r.comment,
                        review_created_at: r.create_time,
                        reply_comment,
                        replied_at,
                    })
                    .await?;
                stored += 1;
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(location_id = %location.id, stored, "Polled reviews");
        Ok(stored)
    }
}

/// Produces the text of an automatic reply.
#[async_trait]
pub trait ReplyComposer: Send + Sync {
    /// `None` leaves the review unanswered.
    async fn compose(&self, review: &review::Model, location: &location::Model) -> Option<String>;
}

/// Fills the location's template, or a rating-based default.
///
/// Supported placeholders: `{name}` (reviewer's first name) and `{rating}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateReplyComposer;

impl TemplateReplyComposer {
    fn default_template(rating: i32) -> &'static str {
        match rating {
            4..=5 => "Thank you for the wonderful review, {name}! We're glad you enjoyed your visit.",
            3 => "Thank you for your feedback, {name}. We'd love to hear how we can make your next visit even better.",
            1..=2 => "We're sorry to hear about your experience, {name}. Please reach out to us directly so we can make it right.",
            _ => "Thank you for your review, {name}!",
        }
    }

    /// Render a reply for `review`.
    #[must_use]
    pub fn render(review: &review::Model, template: Option<&str>) -> Option<String> {
        let template = template
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Self::default_template(review.star_rating));

        let name = review
            .reviewer_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or("there");

        let reply = template
            .replace("{name}", name)
            .replace("{rating}", &review.star_rating.to_string());
        let reply = reply.trim();
        (!reply.is_empty()).then(|| reply.to_string())
    }
}

#[async_trait]
impl ReplyComposer for TemplateReplyComposer {
    async fn compose(&self, review: &review::Model, location: &location::Model) -> Option<String> {
        Self::render(review, location.auto_reply_template.as_deref())
    }
}

/// Answers unreplied reviews at locations that enabled auto-reply.
pub struct AutoReplier {
    reviews: Arc<dyn ReviewStore>,
    credentials: Arc<CredentialRefresher>,
    provider: Arc<dyn ProviderClient>,
    composer: Arc<dyn ReplyComposer>,
    clock: Arc<dyn Clock>,
    batch_size: u64,
}

impl AutoReplier {
    /// Create a new auto-replier.
    #[must_use]
    pub fn new(
        reviews: Arc<dyn ReviewStore>,
        credentials: Arc<CredentialRefresher>,
        provider: Arc<dyn ProviderClient>,
        composer: Arc<dyn ReplyComposer>,
        clock: Arc<dyn Clock>,
        batch_size: u64,
    ) -> Self {
        Self {
            reviews,
            credentials,
            provider,
            composer,
            clock,
            batch_size,
        }
    }

    /// Reply to one batch of pending reviews. Returns how many were answered.
    pub async fn run_once(&self) -> Result<u64, AppError> {
        let pending = self
            .reviews
            .find_unreplied_for_auto_reply(self.batch_size)
            .await?;
        let mut replied = 0;

        for (review, location) in &pending {
            match self.reply(review, location).await {
                Ok(true) => replied += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        review_id = %review.id,
                        location_id = %location.id,
                        error = %e,
                        "Auto-reply failed"
                    );
                }
            }
        }

        if !pending.is_empty() {
            info!(pending = pending.len(), replied, "Auto-reply batch finished");
        }
        Ok(replied)
    }

    async fn reply(
        &self,
        review: &review::Model,
        location: &location::Model,
    ) -> Result<bool, ReviewTaskError> {
        let Some(listing) = listing_for(location) else {
            return Ok(false);
        };
        let Some(comment) = self.composer.compose(review, location).await else {
            return Ok(false);
        };

        let token = self.credentials.get_valid_token(&location.id).await?;
        self.provider
            .reply_to_review(&listing, &token, &review.external_review_id, &comment)
            .await?;

        let recorded = self
            .reviews
            .mark_replied(&review.id, &comment, self.clock.now())
            .await?;
        Ok(recorded)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::{ProviderReview, ReviewPage, ReviewReply, Reviewer};
    use crate::testing::{FakeProvider, MemoryStore, fixtures};
    use chrono::Utc;

    fn provider_review(id: &str, rating: &str, reply: Option<&str>) -> ProviderReview {
        ProviderReview {
            review_id: id.to_string(),
            reviewer: Some(Reviewer {
                display_name: Some("Ana Souza".to_string()),
            }),
            star_rating: Some(rating.to_string()),
            comment: Some("Lovely".to_string()),
            create_time: Some(Utc::now()),
            review_reply: reply.map(|c| ReviewReply {
                comment: c.to_string(),
                update_time: Some(Utc::now()),
            }),
        }
    }

    fn credentials(
        store: &Arc<MemoryStore>,
        provider: &Arc<FakeProvider>,
        clock: &Arc<ManualClock>,
    ) -> Arc<CredentialRefresher> {
        Arc::new(CredentialRefresher::new(
            store.clone(),
            provider.clone(),
            clock.clone(),
        ))
    }

    #[tokio::test]
    async fn test_poll_follows_pages() {
        let store = Arc::new(MemoryStore::new());
        store.insert_location(fixtures::location("loc1"));
        let provider = Arc::new(FakeProvider::new());
        provider.push_review_page(Ok(ReviewPage {
            reviews: vec![provider_review("r1", "FIVE", None)],
            next_page_token: Some("p2".to_string()),
        }));
        provider.push_review_page(Ok(ReviewPage {
            reviews: vec![provider_review("r2", "TWO", Some("Sorry!"))],
            next_page_token: None,
        }));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let poller = ReviewPoller::new(
            store.clone(),
            store.clone(),
            credentials(&store, &provider, &clock),
            provider.clone(),
        );

        let stored = poller.poll_all().await.unwrap();

        assert_eq!(stored, 2);
        let reviews = store.reviews();
        assert_eq!(reviews.len(), 2);
        let r2 = reviews.iter().find(|r| r.external_review_id == "r2").unwrap();
        assert_eq!(r2.star_rating, 2);
        assert_eq!(r2.reply_comment.as_deref(), Some("Sorry!"));
        assert_eq!(provider.review_page_tokens(), vec![None, Some("p2".to_string())]);
    }

    #[tokio::test]
    async fn test_poll_stops_after_page_limit() {
        let store = Arc::new(MemoryStore::new());
        store.insert_location(fixtures::location("loc1"));
        let provider = Arc::new(FakeProvider::new());
        for i in 0..(MAX_REVIEW_PAGES + 2) {
            provider.push_review_page(Ok(ReviewPage {
                reviews: vec![provider_review(&format!("r{i}"), "FOUR", None)],
                next_page_token: Some(format!("p{}", i + 1)),
            }));
        }
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let poller = ReviewPoller::new(
            store.clone(),
            store.clone(),
            credentials(&store, &provider, &clock),
            provider.clone(),
        );

        let stored = poller.poll_all().await.unwrap();
        assert_eq!(stored, MAX_REVIEW_PAGES as u64);
    }

    #[tokio::test]
    async fn test_poll_continues_past_broken_location() {
        let store = Arc::new(MemoryStore::new());
        store.insert_location(fixtures::location("loc1"));
        store.insert_location(fixtures::location("loc2"));
        let provider = Arc::new(FakeProvider::new());
        provider.push_review_page(Err(ProviderError::Server {
            status: 500,
            message: "boom".to_string(),
        }));
        provider.push_review_page(Ok(ReviewPage {
            reviews: vec![provider_review("r1", "FIVE", None)],
            next_page_token: None,
        }));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let poller = ReviewPoller::new(
            store.clone(),
            store.clone(),
            credentials(&store, &provider, &clock),
            provider.clone(),
        );

        assert_eq!(poller.poll_all().await.unwrap(), 1);
    }

    #[test]
    fn test_template_rendering() {
        let mut review = fixtures::review("rev1", "loc1", 5);
        review.reviewer_name = Some("Ana Souza".to_string());

        assert_eq!(
            TemplateReplyComposer::render(&review, Some("Thanks {name}, {rating} stars!")),
            Some("Thanks Ana, 5 stars!".to_string())
        );
        assert!(
            TemplateReplyComposer::render(&review, None)
                .unwrap()
                .starts_with("Thank you for the wonderful review, Ana!")
        );

        review.star_rating = 1;
        review.reviewer_name = None;
        assert!(
            TemplateReplyComposer::render(&review, Some("  "))
                .unwrap()
                .starts_with("We're sorry to hear about your experience, there.")
        );
    }

    #[tokio::test]
    async fn test_auto_reply_sends_and_records() {
        let store = Arc::new(MemoryStore::new());
        let mut location = fixtures::location("loc1");
        location.auto_reply_enabled = true;
        location.auto_reply_template = Some("Thanks {name}!".to_string());
        store.insert_location(location);
        let mut review = fixtures::review("rev1", "loc1", 5);
        review.reviewer_name = Some("Ana".to_string());
        store.insert_review(review);
        let provider = Arc::new(FakeProvider::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let replier = AutoReplier::new(
            store.clone(),
            credentials(&store, &provider, &clock),
            provider.clone(),
            Arc::new(TemplateReplyComposer),
            clock.clone(),
            10,
        );

        assert_eq!(replier.run_once().await.unwrap(), 1);
        assert_eq!(replier.run_once().await.unwrap(), 0);

        let replies = provider.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "ext-rev1");
        assert_eq!(replies[0].2, "Thanks Ana!");
        let stored = store.reviews().pop().unwrap();
        assert_eq!(stored.reply_comment.as_deref(), Some("Thanks Ana!"));
        assert_eq!(stored.replied_at.unwrap(), clock.now());
    }

    #[tokio::test]
    async fn test_auto_reply_skips_disabled_locations() {
        let store = Arc::new(MemoryStore::new());
        store.insert_location(fixtures::location("loc1"));
        store.insert_review(fixtures::review("rev1", "loc1", 4));
        let provider = Arc::new(FakeProvider::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let replier = AutoReplier::new(
            store.clone(),
            credentials(&store, &provider, &clock),
            provider.clone(),
            Arc::new(TemplateReplyComposer),
            clock,
            10,
        );

        assert_eq!(replier.run_once().await.unwrap(), 0);
        assert!(provider.replies().is_empty());
    }
}
