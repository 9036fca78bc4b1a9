//! Migration to create the analysis_jobs table.
//!
//! Jobs drive the asynchronous ANALYZING -> APPROVED/BLOCKED transition with retry and
//! dead-letter bookkeeping. `claimed_at` is the lease on a running attempt.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AnalysisJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AnalysisJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AnalysisJobs::AssetId).uuid().not_null())
                    .col(
                        ColumnDef::new(AnalysisJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(AnalysisJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AnalysisJobs::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AnalysisJobs::LastError).text().null())
                    .col(
                        ColumnDef::new(AnalysisJobs::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AnalysisJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AnalysisJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_analysis_jobs_asset_id")
                            .from(AnalysisJobs::Table, AnalysisJobs::AssetId)
                            .to(Assets::Table, Assets::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_analysis_jobs_status")
                    .table(AnalysisJobs::Table)
                    .col(AnalysisJobs::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_analysis_jobs_status").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AnalysisJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AnalysisJobs {
    Table,
    Id,
    AssetId,
    Status,
    Attempts,
    NextAttemptAt,
    LastError,
    ClaimedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Assets {
    Table,
    Id,
}
