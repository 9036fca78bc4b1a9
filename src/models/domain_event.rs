//! Domain event entity model
//!
//! Append-only audit record of every attempted state transition.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Originator of a transition attempt
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    #[sea_orm(string_value = "UI")]
    Ui,
    #[sea_orm(string_value = "AI")]
    Ai,
    #[sea_orm(string_value = "AUTOMATION")]
    Automation,
    #[sea_orm(string_value = "SYSTEM")]
    System,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[sea_orm(string_value = "connection")]
    Connection,
    #[sea_orm(string_value = "asset")]
    Asset,
    #[sea_orm(string_value = "automation_rule")]
    AutomationRule,
    #[sea_orm(string_value = "project")]
    Project,
    #[sea_orm(string_value = "campaign")]
    Campaign,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "domain_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub event_type: String,
    pub source: EventSource,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub project_id: Option<Uuid>,
    pub previous_state: Option<String>,
    pub new_state: Option<String>,
    pub action: String,
    pub reason: Option<String>,
    /// Set when the attempt was rejected by the transition table or a guard
    pub blocked: bool,
    /// Monotonic ordering key
    pub sequence: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
