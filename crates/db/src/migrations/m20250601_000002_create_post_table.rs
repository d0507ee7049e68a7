//! Create post table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Post::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Post::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Post::LocationId).string_len(32).not_null())
                    .col(ColumnDef::new(Post::PostType).string_len(16).not_null().default("WHATS_NEW"))
                    .col(ColumnDef::new(Post::Content).text().not_null())
                    .col(ColumnDef::new(Post::Title).string_len(256))
                    .col(ColumnDef::new(Post::MediaUrls).json_binary().not_null().default("[]"))
                    .col(ColumnDef::new(Post::CallToAction).string_len(16))
                    .col(ColumnDef::new(Post::CallToActionUrl).text())
                    .col(ColumnDef::new(Post::EventStart).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::EventEnd).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::OfferStart).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::OfferEnd).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::CouponCode).string_len(64))
                    .col(ColumnDef::new(Post::ScheduledAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::PublishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Post::Status).string_len(16).not_null().default("DRAFT"))
                    .col(ColumnDef::new(Post::FailureReason).text())
                    .col(
                        ColumnDef::new(Post::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Post::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Composite index: (location_id, status) for per-location listings
        manager
            .create_index(
                Index::create()
                    .name("idx_post_location_id_status")
                    .table(Post::Table)
                    .col(Post::LocationId)
                    .col(Post::Status)
                    .to_owned(),
            )
            .await?;

        // Composite index: (status, scheduled_at) for due-post queries
        manager
            .create_index(
                Index::create()
                    .name("idx_post_status_scheduled_at")
                    .table(Post::Table)
                    .col(Post::Status)
                    .col(Post::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        // Foreign key: location_id -> location.id
        manager
            .create_foreign_key(
                ForeignKey::create()
                    .name("fk_post_location_id")
                    .from(Post::Table, Post::LocationId)
                    .to(Location::Table, Location::Id)
                    .on_delete(ForeignKeyAction::Cascade)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Post::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Post {
    Table,
    Id,
    LocationId,
    PostType,
    Content,
    Title,
    MediaUrls,
    CallToAction,
    CallToActionUrl,
    EventStart,
    EventEnd,
    OfferStart,
    OfferEnd,
    CouponCode,
    ScheduledAt,
    PublishedAt,
    Status,
    FailureReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Location {
    Table,
    Id,
}
