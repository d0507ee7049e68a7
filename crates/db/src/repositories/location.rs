//! Location repository.

use std::sync::Arc;

use crate::entities::{Location, location};
use chrono::{DateTime, Utc};
use gbp_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

/// Credential change written back after a refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenUpdate {
    /// A new access token was granted. `refresh_token` is set only when the
    /// provider rotated it.
    Refreshed {
        access_token: String,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
    },
    /// The provider refused the cached access token; drop it so the next
    /// caller refreshes. The refresh token is kept.
    AccessTokenExpired,
    /// The refresh token was rejected; all credentials are removed.
    Cleared,
}

/// Location repository for database operations.
#[derive(Clone)]
pub struct LocationRepository {
    db: Arc<DatabaseConnection>,
}

impl LocationRepository {
    /// Create a new location repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a location by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<location::Model>> {
        Location::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a location by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: &str) -> AppResult<location::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location {id} not found")))
    }

    /// Write credentials in a single statement so concurrent writers resolve
    /// last-write-wins without tearing.
    pub async fn update_tokens(&self, id: &str, update: TokenUpdate) -> AppResult<()> {
        let now = Utc::now();
        let mut query = Location::update_many().filter(location::Column::Id.eq(id));

        query = match update {
            TokenUpdate::Refreshed {
                access_token,
                expires_at,
                refresh_token,
            } => {
                let mut q = query
                    .col_expr(location::Column::AccessToken, Expr::value(access_token))
                    .col_expr(location::Column::TokenExpiresAt, Expr::value(expires_at));
                if let Some(refresh_token) = refresh_token {
                    q = q.col_expr(location::Column::RefreshToken, Expr::value(refresh_token));
                }
                q
            }
            TokenUpdate::AccessTokenExpired => query
                .col_expr(location::Column::AccessToken, Expr::value(Option::<String>::None))
                .col_expr(
                    location::Column::TokenExpiresAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                ),
            TokenUpdate::Cleared => query
                .col_expr(location::Column::AccessToken, Expr::value(Option::<String>::None))
                .col_expr(location::Column::RefreshToken, Expr::value(Option::<String>::None))
                .col_expr(
                    location::Column::TokenExpiresAt,
                    Expr::value(Option::<DateTime<Utc>>::None),
                ),
        };

        let result = query
            .col_expr(location::Column::UpdatedAt, Expr::value(now))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound(format!("Location {id} not found")));
        }
        Ok(())
    }

    /// Locations that hold a refresh token and both provider ids.
    pub async fn list_connected(&self) -> AppResult<Vec<location::Model>> {
        Location::find()
            .filter(location::Column::RefreshToken.is_not_null())
            .filter(location::Column::GmbAccountId.is_not_null())
            .filter(location::Column::GmbLocationId.is_not_null())
            .order_by_asc(location::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
