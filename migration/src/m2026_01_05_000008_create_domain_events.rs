//! Migration to create the domain_events table.
//!
//! The table is append-only: the service inserts and reads rows, it never updates them.
//! It carries no foreign keys so the audit trail outlives the entities it describes.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DomainEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DomainEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DomainEvents::EventType).text().not_null())
                    .col(ColumnDef::new(DomainEvents::Source).text().not_null())
                    .col(ColumnDef::new(DomainEvents::EntityType).text().not_null())
                    .col(ColumnDef::new(DomainEvents::EntityId).uuid().not_null())
                    .col(ColumnDef::new(DomainEvents::ProjectId).uuid().null())
                    .col(ColumnDef::new(DomainEvents::PreviousState).text().null())
                    .col(ColumnDef::new(DomainEvents::NewState).text().null())
                    .col(ColumnDef::new(DomainEvents::Action).text().not_null())
                    .col(ColumnDef::new(DomainEvents::Reason).text().null())
                    .col(
                        ColumnDef::new(DomainEvents::Blocked)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(DomainEvents::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DomainEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_domain_events_entity_id")
                    .table(DomainEvents::Table)
                    .col(DomainEvents::EntityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_domain_events_blocked")
                    .table(DomainEvents::Table)
                    .col(DomainEvents::Blocked)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_domain_events_entity_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_domain_events_blocked").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DomainEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DomainEvents {
    Table,
    Id,
    EventType,
    Source,
    EntityType,
    EntityId,
    ProjectId,
    PreviousState,
    NewState,
    Action,
    Reason,
    Blocked,
    Sequence,
    CreatedAt,
}
