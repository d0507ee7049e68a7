//! Review repository.

use std::sync::Arc;

use crate::entities::{Location, Review, location, review};
use chrono::{DateTime, Utc};
use gbp_common::{AppError, AppResult, IdGenerator};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};

/// Review data as fetched from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewUpsert {
    pub location_id: String,
    pub external_review_id: String,
    pub reviewer_name: Option<String>,
    pub star_rating: i32,
    pub comment: Option<String>,
    pub review_created_at: Option<DateTime<Utc>>,
    pub reply_comment: Option<String>,
    pub replied_at: Option<DateTime<Utc>>,
}

/// Review repository for database operations.
#[derive(Clone)]
pub struct ReviewRepository {
    db: Arc<DatabaseConnection>,
    id_gen: IdGenerator,
}

impl ReviewRepository {
    /// Create a new review repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            id_gen: IdGenerator::new(),
        }
    }

    /// Find a review by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<review::Model>> {
        Review::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert or refresh a review keyed by `(location_id, external_review_id)`.
    pub async fn upsert(&self, data: ReviewUpsert) -> AppResult<()> {
        let now = Utc::now();
        let model = review::ActiveModel {
            id: Set(self.id_gen.generate()),
            location_id: Set(data.location_id),
            external_review_id: Set(data.external_review_id),
            reviewer_name: Set(data.reviewer_name),
            star_rating: Set(data.star_rating),
            comment: Set(data.comment),
            review_created_at: Set(data.review_created_at.map(Into::into)),
            reply_comment: Set(data.reply_comment),
            replied_at: Set(data.replied_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(Some(now.into())),
        };

        Review::insert(model)
            .on_conflict(
                OnConflict::columns([
                    review::Column::LocationId,
                    review::Column::ExternalReviewId,
                ])
                .update_columns([
                    review::Column::ReviewerName,
                    review::Column::StarRating,
                    review::Column::Comment,
                    review::Column::ReviewCreatedAt,
                    review::Column::ReplyComment,
                    review::Column::RepliedAt,
                    review::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Unreplied reviews whose location has auto-reply turned on, oldest first.
    pub async fn find_unreplied_for_auto_reply(
        &self,
        limit: u64,
    ) -> AppResult<Vec<(review::Model, location::Model)>> {
        let rows = Review::find()
            .find_also_related(Location)
            .filter(review::Column::RepliedAt.is_null())
            .filter(review::Column::ReplyComment.is_null())
            .filter(location::Column::AutoReplyEnabled.eq(true))
            .order_by_asc(review::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(review, location)| location.map(|l| (review, l)))
            .collect())
    }

    /// Record a reply. Returns `false` if the review already had one.
    pub async fn mark_replied(
        &self,
        id: &str,
        comment: &str,
        replied_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = Review::update_many()
            .filter(review::Column::Id.eq(id))
            .filter(review::Column::RepliedAt.is_null())
            .col_expr(review::Column::ReplyComment, Expr::value(comment))
            .col_expr(review::Column::RepliedAt, Expr::value(replied_at))
            .col_expr(review::Column::UpdatedAt, Expr::value(Utc::now()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}
