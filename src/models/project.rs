//! Project entity model
//!
//! Aggregate root owning connections, assets, rules and campaigns. `stage` is derived by the
//! stage aggregator and never written by callers after creation.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Coarse project progress, ordered from least to most advanced
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStage {
    #[sea_orm(string_value = "SETUP")]
    Setup,
    #[sea_orm(string_value = "ACCOUNTS_CONNECTED")]
    AccountsConnected,
    #[sea_orm(string_value = "ASSETS_READY")]
    AssetsReady,
    #[sea_orm(string_value = "ANALYSIS_PASSED")]
    AnalysisPassed,
    #[sea_orm(string_value = "READY_TO_LAUNCH")]
    ReadyToLaunch,
    #[sea_orm(string_value = "LIVE")]
    Live,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub stage: ProjectStage,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::connection::Entity")]
    Connection,
    #[sea_orm(has_many = "super::asset::Entity")]
    Asset,
    #[sea_orm(has_many = "super::automation_rule::Entity")]
    AutomationRule,
    #[sea_orm(has_many = "super::campaign::Entity")]
    Campaign,
}

impl Related<super::connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connection.def()
    }
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Asset.def()
    }
}

impl Related<super::automation_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AutomationRule.def()
    }
}

impl Related<super::campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
