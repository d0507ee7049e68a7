//! Create review table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Review::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Review::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Review::LocationId).string_len(32).not_null())
                    .col(ColumnDef::new(Review::ExternalReviewId).string_len(256).not_null())
                    .col(ColumnDef::new(Review::ReviewerName).string_len(256))
                    .col(ColumnDef::new(Review::StarRating).integer().not_null().default(0))
                    .col(ColumnDef::new(Review::Comment).text())
                    .col(ColumnDef::new(Review::ReviewCreatedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Review::ReplyComment).text())
                    .col(ColumnDef::new(Review::RepliedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Review::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Review::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Unique: one row per provider review per location
        manager
            .create_index(
                Index::create()
                    .name("idx_review_location_id_external_review_id")
                    .table(Review::Table)
                    .col(Review::LocationId)
                    .col(Review::ExternalReviewId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: replied_at (unreplied sweep)
        manager
            .create_index(
                Index::create()
                    .name("idx_review_replied_at")
                    .table(Review::Table)
                    .col(Review::RepliedAt)
                    .to_owned(),
            )
            .await?;

        // Foreign key: location_id -> location.id
        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_review_location_id")
                    .from(Review::Table, Review::LocationId)
                    .to(Location::Table, Location::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Review::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Review {
    Table,
    Id,
    LocationId,
    ExternalReviewId,
    ReviewerName,
    StarRating,
    Comment,
    ReviewCreatedAt,
    ReplyComment,
    RepliedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Location {
    Table,
    Id,
}
