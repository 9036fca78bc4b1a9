//! Asset entity model
//!
//! A creative unit (video, image or copy) owned by a project, moving through the readiness
//! state machine in [`crate::asset_state`].

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::platform::Platform;

/// Readiness lifecycle state
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetState {
    #[sea_orm(string_value = "UPLOADED")]
    Uploaded,
    #[sea_orm(string_value = "ANALYZING")]
    Analyzing,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "BLOCKED")]
    Blocked,
    #[sea_orm(string_value = "READY_FOR_LAUNCH")]
    ReadyForLaunch,
    #[sea_orm(string_value = "USED_IN_CAMPAIGN")]
    UsedInCampaign,
}

impl AssetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetState::Uploaded => "UPLOADED",
            AssetState::Analyzing => "ANALYZING",
            AssetState::Approved => "APPROVED",
            AssetState::Blocked => "BLOCKED",
            AssetState::ReadyForLaunch => "READY_FOR_LAUNCH",
            AssetState::UsedInCampaign => "USED_IN_CAMPAIGN",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    #[sea_orm(string_value = "video")]
    Video,
    #[sea_orm(string_value = "image")]
    Image,
    #[sea_orm(string_value = "copy")]
    Copy,
}

/// Platforms an asset declares itself compatible with; empty means undeclared
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct PlatformSet(pub Vec<Platform>);

impl PlatformSet {
    pub fn is_declared(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.0.contains(&platform)
    }
}

/// A finding reported by analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AssetIssue {
    pub code: String,
    pub message: String,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, ToSchema,
)]
pub struct IssueList(pub Vec<AssetIssue>);

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: AssetKind,
    pub name: String,
    /// Storage reference for the creative content
    pub content_ref: String,
    pub risk_score: Option<f64>,
    pub quality_score: Option<f64>,
    #[sea_orm(column_type = "JsonBinary")]
    pub compatibility: PlatformSet,
    #[sea_orm(column_type = "JsonBinary")]
    pub issues: IssueList,
    pub state: AssetState,
    pub version: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
