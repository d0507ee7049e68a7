//! Collaborator store interfaces.
//!
//! The pipeline reads and writes posts, location credentials and reviews
//! through these traits. The sea-orm repositories implement them for
//! production; the `testing` module has in-memory versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gbp_common::AppResult;
use gbp_db::entities::{location, post, review};
use gbp_db::repositories::{
    LocationRepository, PostRepository, ReviewRepository, ReviewUpsert, StatusTransition,
    TokenUpdate,
};

/// Post record store.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Load a post together with its location.
    async fn find_with_location(
        &self,
        id: &str,
    ) -> AppResult<Option<(post::Model, Option<location::Model>)>>;

    /// Apply a terminal transition. Returns `false` unless the post was
    /// `DRAFT` or `SCHEDULED` at write time.
    async fn update_status(&self, id: &str, transition: StatusTransition) -> AppResult<bool>;
}

/// Location credential store.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<location::Model>>;

    /// Write the token fields in one step (last write wins).
    async fn update_tokens(&self, id: &str, update: TokenUpdate) -> AppResult<()>;

    /// Locations holding a refresh token and both provider ids.
    async fn list_connected(&self) -> AppResult<Vec<location::Model>>;
}

/// Review store used by the periodic tasks.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn upsert(&self, data: ReviewUpsert) -> AppResult<()>;

    async fn find_unreplied_for_auto_reply(
        &self,
        limit: u64,
    ) -> AppResult<Vec<(review::Model, location::Model)>>;

    async fn mark_replied(
        &self,
        id: &str,
        comment: &str,
        replied_at: DateTime<Utc>,
    ) -> AppResult<bool>;
}

#[async_trait]
impl PostStore for PostRepository {
    async fn find_with_location(
        &self,
        id: &str,
    ) -> AppResult<Option<(post::Model, Option<location::Model>)>> {
        Self::find_with_location(self, id).await
    }

    async fn update_status(&self, id: &str, transition: StatusTransition) -> AppResult<bool> {
        Self::update_status(self, id, transition).await
    }
}

#[async_trait]
impl LocationStore for LocationRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<location::Model>> {
        Self::find_by_id(self, id).await
    }

    async fn update_tokens(&self, id: &str, update: TokenUpdate) -> AppResult<()> {
        Self::update_tokens(self, id, update).await
    }

    async fn list_connected(&self) -> AppResult<Vec<location::Model>> {
        Self::list_connected(self).await
    }
}

#[async_trait]
impl ReviewStore for ReviewRepository {
    async fn upsert(&self, data: ReviewUpsert) -> AppResult<()> {
        Self::upsert(self, data).await
    }

    async fn find_unreplied_for_auto_reply(
        &self,
        limit: u64,
    ) -> AppResult<Vec<(review::Model, location::Model)>> {
        Self::find_unreplied_for_auto_reply(self, limit).await
    }

    async fn mark_replied(
        &self,
        id: &str,
        comment: &str,
        replied_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        Self::mark_replied(self, id, comment, replied_at).await
    }
}
