//! External business-listing provider.
//!
//! Every endpoint returns an explicit outcome type instead of raw JSON, so
//! callers match exhaustively on what the provider said.

mod google;
pub mod payload;

pub use google::{GoogleBusinessClient, classify_publish_response, classify_refresh_response};
pub use payload::{LocalPost, build_local_post};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Access token granted by the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_token: String,
    /// Lifetime in seconds, if the provider reported one.
    pub expires_in: Option<i64>,
    /// Present only when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Granted(AccessGrant),
    /// The refresh token is no longer valid (`invalid_grant`); the user must
    /// reconnect.
    Rejected { message: String },
    /// The token endpoint refused the request for another reason, such as a
    /// wrong client id or secret. The stored refresh token may still be good.
    Refused { message: String },
    /// The exchange could not be completed (network, provider 5xx, 429).
    Unavailable { message: String },
}

/// Result of a publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// Accepted. `name` is the provider resource name when returned.
    Success { name: Option<String> },
    /// 401/403.
    AuthFailure { status: u16, message: String },
    /// 400 and other non-retryable 4xx.
    InvalidRequest { status: u16, message: String },
    /// 404.
    NotFound { message: String },
    /// 5xx and 429.
    ServerError { status: u16, message: String },
    /// No response received.
    NetworkFailure { message: String },
}

/// Failure of a non-publish provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected credentials ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("provider rejected request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("provider resource not found: {0}")]
    NotFound(String),

    #[error("provider server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

/// Account and location ids, normalized to bare ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingPath {
    pub account_id: String,
    pub location_id: String,
}

impl ListingPath {
    /// Build from stored ids that may or may not carry the
    /// `accounts/` and `locations/` prefixes.
    #[must_use]
    pub fn new(account_id: &str, location_id: &str) -> Self {
        Self {
            account_id: strip_prefix(account_id, "accounts/"),
            location_id: strip_prefix(location_id, "locations/"),
        }
    }

    /// `accounts/{a}/locations/{l}`
    #[must_use]
    pub fn resource(&self) -> String {
        format!("accounts/{}/locations/{}", self.account_id, self.location_id)
    }
}

fn strip_prefix(id: &str, prefix: &str) -> String {
    let id = id.trim();
    id.strip_prefix(prefix).unwrap_or(id).to_string()
}

/// A review as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReview {
    pub review_id: String,
    #[serde(default)]
    pub reviewer: Option<Reviewer>,
    /// `ONE`..`FIVE`, or `STAR_RATING_UNSPECIFIED`.
    #[serde(default)]
    pub star_rating: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_reply: Option<ReviewReply>,
}

impl ProviderReview {
    /// Numeric rating, 0 when unspecified.
    #[must_use]
    pub fn rating(&self) -> i32 {
        match self.star_rating.as_deref() {
            Some("ONE") => 1,
            Some("TWO") => 2,
            Some("THREE") => 3,
            Some("FOUR") => 4,
            Some("FIVE") => 5,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReply {
    pub comment: String,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

/// One page of a review listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPage {
    #[serde(default)]
    pub reviews: Vec<ProviderReview>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// The provider's REST surface used by the pipeline.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh_access_token(&self, refresh_token: &str) -> RefreshOutcome;

    /// Create a local post under `listing`.
    async fn create_local_post(
        &self,
        listing: &ListingPath,
        access_token: &str,
        post: &LocalPost,
    ) -> PublishResult;

    /// List one page of reviews.
    async fn list_reviews(
        &self,
        listing: &ListingPath,
        access_token: &str,
        page_token: Option<&str>,
    ) -> Result<ReviewPage, ProviderError>;

    /// Create or replace the owner reply on a review.
    async fn reply_to_review(
        &self,
        listing: &ListingPath,
        access_token: &str,
        review_id: &str,
        comment: &str,
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_path_strips_prefixes() {
        let path = ListingPath::new("accounts/123", "locations/456");
        assert_eq!(path.resource(), "accounts/123/locations/456");

        let bare = ListingPath::new("123", "456");
        assert_eq!(bare, path);
    }

    #[test]
    fn test_review_rating() {
        let page: ReviewPage = serde_json::from_str(
            r#"{"reviews":[{"reviewId":"r1","starRating":"FOUR","reviewer":{"displayName":"Ana"}}],"nextPageToken":"p2"}"#,
        )
        .unwrap_or_default();
        assert_eq!(page.reviews.len(), 1);
        assert_eq!(page.reviews[0].rating(), 4);
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
    }
}
