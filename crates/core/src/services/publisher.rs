//! Publish executor.
//!
//! Loads a post and its location, obtains a token, sends the post to the
//! provider and records the outcome on the post row.
//!
//! Status writes follow a deferred policy: failures that retrying cannot fix
//! mark the post `FAILED` immediately; retryable failures leave it
//! `SCHEDULED` and the worker calls [`PublishExecutor::mark_failed`] once the
//! retry budget is spent. Every write is conditional on the post still being
//! `DRAFT` or `SCHEDULED`, so a `PUBLISHED` or `DELETED` post is never
//! overwritten.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use gbp_common::{AppError, RetryClass, get_metrics};
use gbp_db::entities::post::PostStatus;
use gbp_db::repositories::StatusTransition;
use thiserror::Error;
use tracing::{error, info, warn};

use super::credentials::{CredentialError, CredentialRefresher};
use crate::clock::Clock;
use crate::provider::{ListingPath, ProviderClient, PublishResult, build_local_post};
use crate::store::PostStore;

/// Why a publish attempt failed.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The post, its location, or the provider resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The location is missing provider identifiers.
    #[error("{0}")]
    Configuration(String),

    /// Credentials are missing or were refused. `retryable` is set for a
    /// provider 401/403, which may be a race with a concurrent refresh.
    #[error("{message}")]
    Auth { message: String, retryable: bool },

    /// The provider rejected the payload.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("provider returned {status}: {message}")]
    ProviderServer { status: u16, message: String },

    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Store(#[from] AppError),

    /// The provider accepted the post but recording `PUBLISHED` failed.
    /// Another attempt would post it twice.
    #[error("provider accepted the post but the status write failed: {0}")]
    StatusWrite(AppError),
}

impl PublishError {
    /// Failure code of [`PublishError::StatusWrite`]. The post must not be
    /// marked failed when a job ends with it.
    pub const STATUS_WRITE_FAILED: &'static str = "STATUS_WRITE_FAILED";

    /// How the worker may retry this failure.
    #[must_use]
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::NotFound(_)
            | Self::Configuration(_)
            | Self::InvalidRequest(_)
            | Self::StatusWrite(_) => RetryClass::Never,
            Self::Auth { retryable: true, .. } => RetryClass::Once,
            Self::Auth {
                retryable: false, ..
            } => RetryClass::Never,
            Self::ProviderServer { .. } | Self::Network(_) | Self::Store(_) => RetryClass::Backoff,
        }
    }

    /// Stable tag for logs and the stored failure reason.
    #[must_use]
    pub const fn failure_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Auth { .. } => "AUTH_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::ProviderServer { .. } => "PROVIDER_SERVER_ERROR",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::StatusWrite(_) => Self::STATUS_WRITE_FAILED,
        }
    }

    /// `CODE: message`, as stored on the post.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        format!("{}: {self}", self.failure_code())
    }
}

impl From<CredentialError> for PublishError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound(id) => Self::NotFound(format!("location {id} not found")),
            e @ (CredentialError::NoRefreshToken(_) | CredentialError::Revoked { .. }) => {
                Self::Auth {
                    message: e.to_string(),
                    retryable: false,
                }
            }
            e @ CredentialError::ClientRejected(_) => Self::Configuration(e.to_string()),
            e @ CredentialError::Unavailable(_) => Self::Network(e.to_string()),
            CredentialError::Store(e) => Self::Store(e),
        }
    }
}

/// Why a publish call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The post is not `SCHEDULED` (already published, deleted, failed or
    /// moved back to draft).
    NotScheduled(PostStatus),
    /// Another publish for the same post is running in this process.
    InFlight,
    /// The provider accepted the post but its status changed meanwhile.
    StatusChanged,
}

/// Result of a successful `publish` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        published_at: DateTime<Utc>,
        /// Provider resource name, if returned.
        name: Option<String>,
    },
    Skipped(SkipReason),
}

/// Marks a post id as in flight until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    post_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, post_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(post_id.to_string());
        inserted.then(|| Self {
            set,
            post_id: post_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.post_id);
    }
}

/// Publishes posts to the provider.
pub struct PublishExecutor {
    posts: Arc<dyn PostStore>,
    credentials: Arc<CredentialRefresher>,
    provider: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    language_code: String,
    in_flight: Mutex<HashSet<String>>,
}

impl PublishExecutor {
    /// Create a new publish executor.
    #[must_use]
    pub fn new(
        posts: Arc<dyn PostStore>,
        credentials: Arc<CredentialRefresher>,
        provider: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            posts,
            credentials,
            provider,
            clock,
            language_code: language_code.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Publish a post.
    pub async fn publish(&self, post_id: &str) -> Result<PublishOutcome, PublishError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, post_id) else {
            info!(post_id, "Publish already in flight, skipping");
            return Ok(PublishOutcome::Skipped(SkipReason::InFlight));
        };

        let (post, location) = self
            .posts
            .find_with_location(post_id)
            .await?
            .ok_or_else(|| PublishError::NotFound(format!("post {post_id} not found")))?;

        if post.status != PostStatus::Scheduled {
            info!(post_id, status = ?post.status, "Post not scheduled, skipping");
            return Ok(PublishOutcome::Skipped(SkipReason::NotScheduled(post.status)));
        }

        let Some(location) = location else {
            return self
                .settle(
                    post_id,
                    PublishError::NotFound(format!("location {} not found", post.location_id)),
                )
                .await;
        };

        if !location.has_provider_ids() {
            return self
                .settle(
                    post_id,
                    PublishError::Configuration(format!(
                        "location {} is missing provider account or location id",
                        location.id
                    )),
                )
                .await;
        }
        let listing = ListingPath::new(
            location.gmb_account_id.as_deref().unwrap_or_default(),
            location.gmb_location_id.as_deref().unwrap_or_default(),
        );

        if location
            .refresh_token
            .as_deref()
            .is_none_or(|t| t.trim().is_empty())
        {
            return self
                .settle(
                    post_id,
                    CredentialError::NoRefreshToken(location.id.clone()).into(),
                )
                .await;
        }

        let token = match self.credentials.get_valid_token(&location.id).await {
            Ok(token) => token,
            Err(e) => return self.settle(post_id, e.into()).await,
        };

        let payload = match build_local_post(&post, &self.language_code) {
            Ok(payload) => payload,
            Err(e) => return self.settle(post_id, PublishError::InvalidRequest(e.to_string())).await,
        };

        let result = self
            .provider
            .create_local_post(&listing, &token, &payload)
            .await;

        let err = match result {
            PublishResult::Success { name } => {
                get_metrics().record_publish(true);
                let published_at = self.clock.now();
                let applied = match self
                    .posts
                    .update_status(post_id, StatusTransition::Published { published_at })
                    .await
                {
                    Ok(applied) => applied,
                    Err(e) => {
                        error!(
                            post_id,
                            provider_name = ?name,
                            error = %e,
                            "Provider accepted post but PUBLISHED could not be recorded"
                        );
                        return Err(PublishError::StatusWrite(e));
                    }
                };

                if !applied {
                    warn!(post_id, "Provider accepted post but its status changed meanwhile");
                    return Ok(PublishOutcome::Skipped(SkipReason::StatusChanged));
                }

                info!(post_id, provider_name = ?name, "Post published");
                return Ok(PublishOutcome::Published { published_at, name });
            }
            PublishResult::AuthFailure { status, message } => {
                // Force the retry to fetch a fresh token.
                if let Err(e) = self.credentials.expire_access_token(&location.id).await {
                    warn!(location_id = %location.id, error = %e, "Failed to expire access token");
                }
                PublishError::Auth {
                    message: format!("provider returned {status}: {message}"),
                    retryable: true,
                }
            }
            PublishResult::InvalidRequest { status, message } => {
                PublishError::InvalidRequest(format!("provider returned {status}: {message}"))
            }
            PublishResult::NotFound { message } => PublishError::NotFound(format!(
                "provider location {} not found: {message}",
                listing.resource()
            )),
            PublishResult::ServerError { status, message } => {
                PublishError::ProviderServer { status, message }
            }
            PublishResult::NetworkFailure { message } => PublishError::Network(message),
        };

        get_metrics().record_publish(false);
        self.settle(post_id, err).await
    }

    /// Mark a post `FAILED` once the worker has given up on it.
    ///
    /// Returns `false` if the post had already left `DRAFT`/`SCHEDULED`.
    pub async fn mark_failed(&self, post_id: &str, reason: &str) -> Result<bool, PublishError> {
        let applied = self
            .posts
            .update_status(
                post_id,
                StatusTransition::Failed {
                    reason: reason.to_string(),
                },
            )
            .await?;
        if applied {
            warn!(post_id, reason, "Post marked failed");
        }
        Ok(applied)
    }

    /// Record a failure. Non-retryable ones are written to the post now.
    async fn settle(
        &self,
        post_id: &str,
        err: PublishError,
    ) -> Result<PublishOutcome, PublishError> {
        if err.retry_class() == RetryClass::Never {
            if let Err(write_err) = self.mark_failed(post_id, &err.failure_reason()).await {
                error!(post_id, error = %write_err, "Failed to record post failure");
            }
        } else {
            warn!(post_id, code = err.failure_code(), error = %err, "Publish attempt failed");
        }
        Err(err)
    }
}
