//! Migration to create the automation_rules table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutomationRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutomationRules::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AutomationRules::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(AutomationRules::Name).text().not_null())
                    .col(ColumnDef::new(AutomationRules::Scope).text().not_null())
                    .col(
                        ColumnDef::new(AutomationRules::Condition)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::Action)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::State)
                            .text()
                            .not_null()
                            .default("DISABLED"),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::CooldownMinutes)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::LastTriggeredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::CooldownEndsAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(AutomationRules::LastError).text().null())
                    .col(
                        ColumnDef::new(AutomationRules::Version)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AutomationRules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_automation_rules_project_id")
                            .from(AutomationRules::Table, AutomationRules::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_automation_rules_state")
                    .table(AutomationRules::Table)
                    .col(AutomationRules::State)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_automation_rules_state").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AutomationRules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutomationRules {
    Table,
    Id,
    ProjectId,
    Name,
    Scope,
    Condition,
    Action,
    State,
    CooldownMinutes,
    LastTriggeredAt,
    CooldownEndsAt,
    LastError,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
}
