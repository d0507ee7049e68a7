//! Credential refresher.
//!
//! Hands out a currently-valid bearer token for a location, refreshing the
//! stored OAuth access token when it is missing or about to expire.
//!
//! Refreshes for the same location are serialized inside the process: the
//! second caller waits, re-reads the row and reuses the token the first one
//! stored. Across processes the token columns are written in a single
//! statement, so concurrent refreshes resolve last-write-wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use gbp_common::{AppError, get_metrics};
use gbp_db::entities::location;
use gbp_db::repositories::TokenUpdate;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::provider::{ProviderClient, RefreshOutcome};
use crate::store::LocationStore;

/// A cached token is reused only if it is valid for at least this long.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 300;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Why no token could be produced.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("location {0} not found")]
    NotFound(String),

    #[error("location {0} has no refresh token; reconnect the location")]
    NoRefreshToken(String),

    #[error("refresh token for location {location_id} was rejected: {message}")]
    Revoked { location_id: String, message: String },

    /// The token endpoint refused the request itself, e.g. a wrong client
    /// id or secret. Stored credentials are left untouched.
    #[error("token endpoint refused the refresh request: {0}")]
    ClientRejected(String),

    /// The token endpoint could not be reached or failed server-side.
    /// Stored credentials are left untouched.
    #[error("token refresh unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A location's refresh lock. The last holder removes it from the map.
struct LocationLock<'a> {
    locks: &'a LockMap,
    location_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LocationLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only handed out under the map lock: one for the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.location_id);
        }
    }
}

/// Produces valid access tokens for locations.
pub struct CredentialRefresher {
    locations: Arc<dyn LocationStore>,
    provider: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    locks: LockMap,
}

impl CredentialRefresher {
    /// Create a new credential refresher.
    #[must_use]
    pub fn new(
        locations: Arc<dyn LocationStore>,
        provider: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            locations,
            provider,
            clock,
            safety_margin: Duration::seconds(TOKEN_SAFETY_MARGIN_SECS),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return a valid access token for `location_id`.
    ///
    /// Never calls the provider when the location has no refresh token or
    /// when the cached token is still good past the safety margin.
    pub async fn get_valid_token(&self, location_id: &str) -> Result<String, CredentialError> {
        let location = self.load(location_id).await?;
        if let Some(token) = self.cached_token(&location) {
            return Ok(token);
        }

        let entry = self.lock_for(location_id);
        let _guard = entry.lock.lock().await;

        // A peer may have refreshed while we waited.
        let location = self.load(location_id).await?;
        if let Some(token) = self.cached_token(&location) {
            debug!(location_id, "Reusing token refreshed by a concurrent caller");
            return Ok(token);
        }

        let Some(refresh_token) = location.refresh_token.as_deref() else {
            return Err(CredentialError::NoRefreshToken(location_id.to_string()));
        };

        match self.provider.refresh_access_token(refresh_token).await {
            RefreshOutcome::Granted(grant) => {
                let lifetime = grant
                    .expires_in
                    .filter(|s| *s > 0)
                    .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
                let expires_at = self.clock.now() + Duration::seconds(lifetime);

                self.locations
                    .update_tokens(
                        location_id,
                        TokenUpdate::Refreshed {
                            access_token: grant.access_token.clone(),
                            expires_at,
                            refresh_token: grant.refresh_token,
                        },
                    )
                    .await?;

                get_metrics().record_token_refresh(false);
                info!(location_id, %expires_at, "Refreshed access token");
                Ok(grant.access_token)
            }
            RefreshOutcome::Rejected { message } => {
                warn!(location_id, reason = %message, "Refresh token rejected, clearing credentials");
                self.locations
                    .update_tokens(location_id, TokenUpdate::Cleared)
                    .await?;
                get_metrics().record_token_refresh(true);
                Err(CredentialError::Revoked {
                    location_id: location_id.to_string(),
                    message,
                })
            }
            RefreshOutcome::Refused { message } => {
                warn!(
                    location_id,
                    reason = %message,
                    "Token endpoint refused refresh, keeping credentials"
                );
                Err(CredentialError::ClientRejected(message))
            }
            RefreshOutcome::Unavailable { message } => {
                warn!(location_id, reason = %message, "Token refresh unavailable");
                Err(CredentialError::Unavailable(message))
            }
        }
    }

    /// Drop the cached access token so the next call refreshes.
    pub async fn expire_access_token(&self, location_id: &str) -> Result<(), CredentialError> {
        self.locations
            .update_tokens(location_id, TokenUpdate::AccessTokenExpired)
            .await?;
        Ok(())
    }

    /// Clear all stored credentials for a location.
    pub async fn invalidate(&self, location_id: &str) -> Result<(), CredentialError> {
        self.locations
            .update_tokens(location_id, TokenUpdate::Cleared)
            .await?;
        info!(location_id, "Invalidated location credentials");
        Ok(())
    }

    async fn load(&self, location_id: &str) -> Result<location::Model, CredentialError> {
        let location = self
            .locations
            .find_by_id(location_id)
            .await?
            .ok_or_else(|| CredentialError::NotFound(location_id.to_string()))?;

        if location
            .refresh_token
            .as_deref()
            .is_none_or(|t| t.trim().is_empty())
        {
            return Err(CredentialError::NoRefreshToken(location_id.to_string()));
        }
        Ok(location)
    }

    fn cached_token(&self, location: &location::Model) -> Option<String> {
        let token = location.access_token.as_deref().filter(|t| !t.is_empty())?;
        let expires_at = location.token_expires_at?;
        (expires_at > self.clock.now() + self.safety_margin).then(|| token.to_string())
    }

    fn lock_for(&self, location_id: &str) -> LocationLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(location_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        LocationLock {
            locks: &self.locks,
            location_id: location_id.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
