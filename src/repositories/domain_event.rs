//! Domain event repository
//!
//! Append-only: there is no update or delete path for individual events.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::models::domain_event::{self, Entity as DomainEvent};

pub const DEFAULT_EVENT_LIMIT: u64 = 100;
pub const MAX_EVENT_LIMIT: u64 = 1_000;

/// Filters for reading the event log, newest first
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub entity_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub blocked_only: bool,
    pub limit: Option<u64>,
}

pub struct DomainEventRepository<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DomainEventRepository<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn append(&self, event: domain_event::Model) -> Result<domain_event::Model, DbErr> {
        DomainEvent::insert(event.clone().into_active_model().reset_all())
            .exec_without_returning(self.conn)
            .await?;
        Ok(event)
    }

    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<domain_event::Model>, DbErr> {
        let mut query = DomainEvent::find();
        if let Some(entity_id) = filter.entity_id {
            query = query.filter(domain_event::Column::EntityId.eq(entity_id));
        }
        if let Some(project_id) = filter.project_id {
            query = query.filter(domain_event::Column::ProjectId.eq(project_id));
        }
        if filter.blocked_only {
            query = query.filter(domain_event::Column::Blocked.eq(true));
        }

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT);

        query
            .order_by_desc(domain_event::Column::Sequence)
            .limit(limit)
            .all(self.conn)
            .await
    }
}
