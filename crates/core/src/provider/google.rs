//! Google Business Profile client.

use std::time::Duration;

use async_trait::async_trait;
use gbp_common::config::ProviderConfig;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AccessGrant, ListingPath, LocalPost, ProviderClient, ProviderError, PublishResult,
    RefreshOutcome, ReviewPage,
};

/// Longest provider error body kept in a message.
const MAX_MESSAGE_LEN: usize = 300;

/// Reviews requested per page.
const REVIEW_PAGE_SIZE: &str = "50";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// The API uses `{error: {message}}`, the token endpoint uses
/// `{error, error_description}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Api { message: String },
    OAuth(String),
}

#[derive(Debug, Deserialize)]
struct OAuthErrorEnvelope {
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth error code of a token endpoint response.
#[derive(Debug, Deserialize)]
struct OAuthErrorCode {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    #[serde(default)]
    name: Option<String>,
}

/// Pull a human-readable message out of a provider error body.
fn error_message(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<OAuthErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error_description)
        .or_else(|| {
            serde_json::from_str::<ErrorEnvelope>(body)
                .ok()
                .map(|e| match e.error {
                    ErrorBody::Api { message } | ErrorBody::OAuth(message) => message,
                })
        });

    match parsed {
        Some(message) if !message.is_empty() => message,
        _ if body.trim().is_empty() => format!("HTTP {status}"),
        _ => body.chars().take(MAX_MESSAGE_LEN).collect(),
    }
}

/// Classify a publish response by HTTP status.
#[must_use]
pub fn classify_publish_response(status: u16, body: &str) -> PublishResult {
    match status {
        200..=299 => PublishResult::Success {
            name: serde_json::from_str::<CreatedPost>(body)
                .ok()
                .and_then(|p| p.name),
        },
        401 | 403 => PublishResult::AuthFailure {
            status,
            message: error_message(status, body),
        },
        404 => PublishResult::NotFound {
            message: error_message(status, body),
        },
        // Rate limited: transient like a server error.
        429 | 500..=599 => PublishResult::ServerError {
            status,
            message: error_message(status, body),
        },
        _ => PublishResult::InvalidRequest {
            status,
            message: error_message(status, body),
        },
    }
}

/// Classify a non-2xx token endpoint response.
///
/// Only `invalid_grant` means the refresh token itself is dead. Client
/// errors such as `invalid_client` leave the stored token alone.
#[must_use]
pub fn classify_refresh_response(status: u16, body: &str) -> RefreshOutcome {
    let message = error_message(status, body);
    if matches!(status, 408 | 429 | 500..=599) {
        return RefreshOutcome::Unavailable { message };
    }

    match serde_json::from_str::<OAuthErrorCode>(body) {
        Ok(e) if e.error == "invalid_grant" => RefreshOutcome::Rejected { message },
        Ok(e) => RefreshOutcome::Refused {
            message: format!("{}: {message}", e.error),
        },
        Err(_) => RefreshOutcome::Refused { message },
    }
}

fn classify_api_error(status: u16, body: &str) -> ProviderError {
    let message = error_message(status, body);
    match status {
        401 | 403 => ProviderError::Auth { status, message },
        404 => ProviderError::NotFound(message),
        429 | 500..=599 => ProviderError::Server { status, message },
        _ => ProviderError::InvalidRequest { status, message },
    }
}

/// HTTP client for the Business Profile v4 API and Google's OAuth endpoint.
#[derive(Clone)]
pub struct GoogleBusinessClient {
    http_client: Client,
    api_base_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GoogleBusinessClient {
    /// Create a new client.
    ///
    /// # Panics
    /// Panics if the HTTP client fails to build.
    #[must_use]
    pub fn new(config: &ProviderConfig) -> Self {
        Self::with_timeout(config, config.request_timeout())
    }

    /// Create a client with an explicit request timeout.
    ///
    /// # Panics
    /// Panics if the HTTP client fails to build.
    #[must_use]
    #[allow(clippy::expect_used)] // Client build only fails with incompatible TLS settings
    pub fn with_timeout(config: &ProviderConfig, timeout: Duration) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout.min(Duration::from_secs(10)))
                .build()
                .expect("Failed to create HTTP client"),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base_url)
    }
}

#[async_trait]
impl ProviderClient for GoogleBusinessClient {
    async fn refresh_access_token(&self, refresh_token: &str) -> RefreshOutcome {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = match self.http_client.post(&self.token_url).form(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Token endpoint unreachable");
                return RefreshOutcome::Unavailable {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            return match serde_json::from_str::<TokenResponse>(&body) {
                Ok(token) => RefreshOutcome::Granted(AccessGrant {
                    access_token: token.access_token,
                    expires_in: token.expires_in,
                    refresh_token: token.refresh_token,
                }),
                Err(e) => RefreshOutcome::Unavailable {
                    message: format!("malformed token response: {e}"),
                },
            };
        }

        let outcome = classify_refresh_response(status.as_u16(), &body);
        if !matches!(outcome, RefreshOutcome::Unavailable { .. }) {
            warn!(status = status.as_u16(), ?outcome, "Token endpoint refused refresh");
        }
        outcome
    }

    async fn create_local_post(
        &self,
        listing: &ListingPath,
        access_token: &str,
        post: &LocalPost,
    ) -> PublishResult {
        let url = self.url(&format!("{}/localPosts", listing.resource()));
        debug!(url = %url, topic_type = ?post.topic_type, "Creating local post");

        let response = match self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(post)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return PublishResult::NetworkFailure {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_publish_response(status, &body),
            // Status arrived but the body did not; the outcome is known only for 2xx.
            Err(e) if (200..300).contains(&status) => {
                debug!(error = %e, "Publish succeeded but body could not be read");
                PublishResult::Success { name: None }
            }
            Err(_) => classify_publish_response(status, ""),
        }
    }

    async fn list_reviews(
        &self,
        listing: &ListingPath,
        access_token: &str,
        page_token: Option<&str>,
    ) -> Result<ReviewPage, ProviderError> {
        let url = self.url(&format!("{}/reviews", listing.resource()));
        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("pageSize", REVIEW_PAGE_SIZE)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn reply_to_review(
        &self,
        listing: &ListingPath,
        access_token: &str,
        review_id: &str,
        comment: &str,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("{}/reviews/{review_id}/reply", listing.resource()));

        let response = self
            .http_client
            .put(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "comment": comment }))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_api_error(status.as_u16(), &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_publish_success() {
        assert_eq!(
            classify_publish_response(200, r#"{"name":"accounts/1/locations/2/localPosts/3"}"#),
            PublishResult::Success {
                name: Some("accounts/1/locations/2/localPosts/3".to_string())
            }
        );
        assert_eq!(
            classify_publish_response(201, ""),
            PublishResult::Success { name: None }
        );
    }

    #[test]
    fn test_classify_publish_errors() {
        let body = r#"{"error":{"code":400,"message":"Invalid summary","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(
            classify_publish_response(400, body),
            PublishResult::InvalidRequest {
                status: 400,
                message: "Invalid summary".to_string()
            }
        );
        assert!(matches!(
            classify_publish_response(401, ""),
            PublishResult::AuthFailure { status: 401, .. }
        ));
        assert!(matches!(
            classify_publish_response(403, ""),
            PublishResult::AuthFailure { status: 403, .. }
        ));
        assert!(matches!(
            classify_publish_response(404, ""),
            PublishResult::NotFound { .. }
        ));
        assert!(matches!(
            classify_publish_response(503, "upstream"),
            PublishResult::ServerError { status: 503, .. }
        ));
        assert!(matches!(
            classify_publish_response(429, ""),
            PublishResult::ServerError { status: 429, .. }
        ));
        assert!(matches!(
            classify_publish_response(409, ""),
            PublishResult::InvalidRequest { status: 409, .. }
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(400, r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#),
            "Token has been expired or revoked."
        );
        assert_eq!(error_message(502, ""), "HTTP 502");
        assert_eq!(error_message(500, "oops"), "oops");
    }

    #[test]
    fn test_only_invalid_grant_rejects_refresh_token() {
        let revoked = r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#;
        assert_eq!(
            classify_refresh_response(400, revoked),
            RefreshOutcome::Rejected {
                message: "Token has been expired or revoked.".to_string()
            }
        );

        let bad_client = r#"{"error":"invalid_client","error_description":"The OAuth client was not found."}"#;
        assert_eq!(
            classify_refresh_response(401, bad_client),
            RefreshOutcome::Refused {
                message: "invalid_client: The OAuth client was not found.".to_string()
            }
        );
        assert!(matches!(
            classify_refresh_response(400, r#"{"error":"unauthorized_client"}"#),
            RefreshOutcome::Refused { .. }
        ));
        assert!(matches!(
            classify_refresh_response(403, "<html>forbidden</html>"),
            RefreshOutcome::Refused { .. }
        ));
    }

    #[test]
    fn test_transient_refresh_statuses_are_unavailable() {
        for status in [408, 429, 500, 503] {
            assert!(matches!(
                classify_refresh_response(status, r#"{"error":"invalid_grant"}"#),
                RefreshOutcome::Unavailable { .. }
            ));
        }
    }
}
