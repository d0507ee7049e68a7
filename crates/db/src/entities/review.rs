//! Review entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A customer review pulled from the provider.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "review")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub location_id: String,

    /// Provider review id, unique per location.
    pub external_review_id: String,

    #[sea_orm(nullable)]
    pub reviewer_name: Option<String>,

    /// 1..=5, 0 when the provider did not rate.
    pub star_rating: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub comment: Option<String>,

    #[sea_orm(nullable)]
    pub review_created_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub reply_comment: Option<String>,

    #[sea_orm(nullable)]
    pub replied_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
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
