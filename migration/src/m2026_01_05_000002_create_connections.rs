//! Migration to create the connections table.
//!
//! Connections hold one authorized ad account per row. Credentials are stored only as an
//! encrypted blob; `version` backs optimistic concurrency for refresh and revoke.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::UserId).uuid().not_null())
                    .col(ColumnDef::new(Connections::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Connections::Platform).text().not_null())
                    .col(ColumnDef::new(Connections::ExternalAccountId).text().null())
                    .col(ColumnDef::new(Connections::DisplayName).text().null())
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Connections::Permissions)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Connections::CredentialsCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::LastRefreshedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connections_project_id")
                            .from(Connections::Table, Connections::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one live connection per (user, platform, account); revoked rows are history
        // and pending rows have no account yet. Partial indexes share this syntax on
        // Postgres and SQLite.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_connections_live_account \
                 ON connections (user_id, platform, external_account_id) \
                 WHERE status IN ('connected', 'limited_access', 'expired')",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_connections_project_id")
                    .table(Connections::Table)
                    .col(Connections::ProjectId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_connections_live_account")
            .await?;

        manager
            .drop_index(Index::drop().name("idx_connections_project_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Connections {
    Table,
    Id,
    UserId,
    ProjectId,
    Platform,
    ExternalAccountId,
    DisplayName,
    Status,
    Permissions,
    CredentialsCiphertext,
    TokenExpiresAt,
    LastRefreshedAt,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
