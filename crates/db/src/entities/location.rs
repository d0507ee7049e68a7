//! Location entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A connected business listing with its provider credentials.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "location")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Display name.
    pub name: String,

    /// Provider account id (`accounts/123` or `123`).
    #[sea_orm(nullable)]
    pub gmb_account_id: Option<String>,

    /// Provider location id (`locations/456` or `456`).
    #[sea_orm(nullable)]
    pub gmb_location_id: Option<String>,

    /// Cached OAuth access token.
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// OAuth refresh token. `None` means the location must be reconnected.
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,

    /// When the cached access token expires.
    #[sea_orm(nullable)]
    pub token_expires_at: Option<DateTimeWithTimeZone>,

    /// Whether new reviews get an automatic reply.
    #[sea_orm(default_value = false)]
    pub auto_reply_enabled: bool,

    /// Reply template for automatic replies.
    #[sea_orm(column_type = "Text", nullable)]
    pub auto_reply_template: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Whether both provider identifiers are present and non-empty.
    #[must_use]
    pub fn has_provider_ids(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.gmb_account_id) && present(&self.gmb_location_id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::post::Entity")]
    Post,
    #[sea_orm(has_many = "super::review::Entity")]
    Review,
}

impl Related<super::post::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Post.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Review.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
