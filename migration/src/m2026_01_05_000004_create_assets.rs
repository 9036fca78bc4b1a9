//! Migration to create the assets table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Assets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Assets::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Assets::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(Assets::Kind).text().not_null())
                    .col(ColumnDef::new(Assets::Name).text().not_null())
                    .col(ColumnDef::new(Assets::ContentRef).text().not_null())
                    .col(ColumnDef::new(Assets::RiskScore).double().null())
                    .col(ColumnDef::new(Assets::QualityScore).double().null())
                    .col(ColumnDef::new(Assets::Compatibility).json_binary().not_null())
                    .col(ColumnDef::new(Assets::Issues).json_binary().not_null())
                    .col(
                        ColumnDef::new(Assets::State)
                            .text()
                            .not_null()
                            .default("UPLOADED"),
                    )
                    .col(
                        ColumnDef::new(Assets::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Assets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Assets::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_assets_project_id")
                            .from(Assets::Table, Assets::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_assets_project_id")
                    .table(Assets::Table)
                    .col(Assets::ProjectId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_assets_project_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Assets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Assets {
    Table,
    Id,
    ProjectId,
    Kind,
    Name,
    ContentRef,
    RiskScore,
    QualityScore,
    Compatibility,
    Issues,
    State,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
