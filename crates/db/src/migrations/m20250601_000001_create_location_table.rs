//! Create location table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Location::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Location::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Location::Name).string_len(256).not_null())
                    .col(ColumnDef::new(Location::GmbAccountId).string_len(128))
                    .col(ColumnDef::new(Location::GmbLocationId).string_len(128))
                    .col(ColumnDef::new(Location::AccessToken).text())
                    .col(ColumnDef::new(Location::RefreshToken).text())
                    .col(ColumnDef::new(Location::TokenExpiresAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Location::AutoReplyEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Location::AutoReplyTemplate).text())
                    .col(
                        ColumnDef::new(Location::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Location::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index: auto_reply_enabled (auto-reply sweep)
        manager
            .create_index(
                Index::create()
                    .name("idx_location_auto_reply_enabled")
                    .table(Location::Table)
                    .col(Location::AutoReplyEnabled)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Location::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Location {
    Table,
    Id,
    Name,
    GmbAccountId,
    GmbLocationId,
    AccessToken,
    RefreshToken,
    TokenExpiresAt,
    AutoReplyEnabled,
    AutoReplyTemplate,
    CreatedAt,
    UpdatedAt,
}
