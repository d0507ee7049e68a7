//! Post entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of local post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostType {
    #[sea_orm(string_value = "WHATS_NEW")]
    WhatsNew,
    #[sea_orm(string_value = "EVENT")]
    Event,
    #[sea_orm(string_value = "OFFER")]
    Offer,
}

/// Call-to-action button attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallToAction {
    /// Explicitly no button.
    #[sea_orm(string_value = "NONE")]
    #[serde(rename = "NONE")]
    NoAction,
    #[sea_orm(string_value = "BOOK")]
    Book,
    #[sea_orm(string_value = "ORDER")]
    Order,
    #[sea_orm(string_value = "SHOP")]
    Shop,
    #[sea_orm(string_value = "LEARN_MORE")]
    LearnMore,
    #[sea_orm(string_value = "SIGN_UP")]
    SignUp,
    #[sea_orm(string_value = "CALL_NOW")]
    CallNow,
    #[sea_orm(string_value = "GET_DIRECTIONS")]
    GetDirections,
}

/// Post lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "SCHEDULED")]
    Scheduled,
    #[sea_orm(string_value = "PUBLISHED")]
    Published,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "DELETED")]
    Deleted,
}

impl PostStatus {
    /// Statuses the worker may move to `PUBLISHED` or `FAILED`.
    pub const TRANSITIONABLE: [Self; 2] = [Self::Draft, Self::Scheduled];

    /// `PUBLISHED` and `DELETED` are never overwritten by the worker.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Deleted)
    }

    /// Whether the worker may write a terminal outcome over this status.
    #[must_use]
    pub const fn is_transitionable(self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }
}

/// A unit of content scheduled for publication.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "post")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub location_id: String,

    pub post_type: PostType,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    #[sea_orm(nullable)]
    pub title: Option<String>,

    /// Ordered media URLs (JSON array of strings).
    #[sea_orm(column_type = "JsonBinary")]
    pub media_urls: Json,

    #[sea_orm(nullable)]
    pub call_to_action: Option<CallToAction>,

    #[sea_orm(column_type = "Text", nullable)]
    pub call_to_action_url: Option<String>,

    #[sea_orm(nullable)]
    pub event_start: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub event_end: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub offer_start: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub offer_end: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,

    #[sea_orm(indexed, nullable)]
    pub scheduled_at: Option<DateTimeWithTimeZone>,

    /// Set exactly once, when publication succeeds.
    #[sea_orm(nullable)]
    pub published_at: Option<DateTimeWithTimeZone>,

    pub status: PostStatus,

    /// `CODE: message` of the last failure.
    #[sea_orm(column_type = "Text", nullable)]
    pub failure_reason: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Media URLs as strings; non-string entries are ignored.
    #[must_use]
    pub fn media_urls(&self) -> Vec<String> {
        self.media_urls
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::location::Entity",
        from = "Column::LocationId",
        to = "super::location::Column::Id",
        on_delete = "Cascade"
    )]
    Location,
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
