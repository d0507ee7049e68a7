//! Post repository.

use std::sync::Arc;

use crate::entities::post::PostStatus;
use crate::entities::{Location, Post, location, post};
use chrono::{DateTime, Utc};
use gbp_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

/// Terminal outcome the worker writes for a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransition {
    Published { published_at: DateTime<Utc> },
    Failed { reason: String },
}

/// Post repository for database operations.
#[derive(Clone)]
pub struct PostRepository {
    db: Arc<DatabaseConnection>,
}

impl PostRepository {
    /// Create a new post repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a post by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<post::Model>> {
        Post::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a post by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<post::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {id} not found")))
    }

    /// Find a post together with its owning location.
    pub async fn find_with_location(
        &self,
        id: &str,
    ) -> AppResult<Option<(post::Model, Option<location::Model>)>> {
        Post::find_by_id(id)
            .find_also_related(Location)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new post.
    pub async fn create(&self, model: post::ActiveModel) -> AppResult<post::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Apply a terminal transition if the post is still `DRAFT` or `SCHEDULED`.
    ///
    /// Returns `false` when the row was missing or already moved on, so two
    /// racing writers can never both land a transition.
    pub async fn update_status(&self, id: &str, transition: StatusTransition) -> AppResult<bool> {
        let now = Utc::now();
        let query = Post::update_many()
            .filter(post::Column::Id.eq(id))
            .filter(post::Column::Status.is_in(PostStatus::TRANSITIONABLE));

        let query = match transition {
            StatusTransition::Published { published_at } => query
                .col_expr(post::Column::Status, Expr::value(PostStatus::Published))
                .col_expr(post::Column::PublishedAt, Expr::value(published_at))
                .col_expr(post::Column::FailureReason, Expr::value(Option::<String>::None)),
            StatusTransition::Failed { reason } => query
                .col_expr(post::Column::Status, Expr::value(PostStatus::Failed))
                .col_expr(post::Column::FailureReason, Expr::value(reason)),
        };

        let result = query
            .col_expr(post::Column::UpdatedAt, Expr::value(now))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::post::PostType;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    fn create_test_post(id: &str) -> post::Model {
        post::Model {
            id: id.to_string(),
            location_id: "loc1".to_string(),
            post_type: PostType::WhatsNew,
            content: "Fresh bread daily".to_string(),
            title: None,
            media_urls: json!(["https://cdn.example.com/a.jpg"]),
            call_to_action: None,
            call_to_action_url: None,
            event_start: None,
            event_end: None,
            offer_start: None,
            offer_end: None,
            coupon_code: None,
            scheduled_at: Some(Utc::now().into()),
            published_at: None,
            status: PostStatus::Scheduled,
            failure_reason: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let post = create_test_post("post1");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[post.clone()]])
                .into_connection(),
        );

        let repo = PostRepository::new(db);
        let result = repo.find_by_id("post1").await.unwrap();
        assert_eq!(result.unwrap().media_urls(), vec!["https://cdn.example.com/a.jpg"]);
    }

    #[tokio::test]
    async fn test_update_status_applies_once() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let repo = PostRepository::new(db);
        let first = repo
            .update_status(
                "post1",
                StatusTransition::Published {
                    published_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let second = repo
            .update_status(
                "post1",
                StatusTransition::Failed {
                    reason: "SERVER_ERROR: boom".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
    }
}
