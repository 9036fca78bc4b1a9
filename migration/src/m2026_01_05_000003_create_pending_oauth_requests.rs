//! Migration to create the pending_oauth_requests table.
//!
//! Each row binds a CSRF state token to the user, project and platform that started an
//! OAuth flow. Rows are deleted on first use or purged after expiry.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PendingOAuthRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PendingOAuthRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::State)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PendingOAuthRequests::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(PendingOAuthRequests::ProjectId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::Platform)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::RedirectHint)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PendingOAuthRequests::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pending_oauth_requests_state")
                    .table(PendingOAuthRequests::Table)
                    .col(PendingOAuthRequests::State)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_pending_oauth_requests_state")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PendingOAuthRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PendingOAuthRequests {
    #[sea_orm(iden = "pending_oauth_requests")]
    Table,
    Id,
    State,
    UserId,
    ProjectId,
    Platform,
    ConnectionId,
    RedirectHint,
    CreatedAt,
    ExpiresAt,
}
