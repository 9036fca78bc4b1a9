//! # Common API Types
//!
//! Response bodies for entities whose SeaORM models are not exposed directly, plus path
//! parsing shared by several handlers.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::asset_state;
use crate::automation;
use crate::error::ApiError;
use crate::models::Platform;
use crate::models::asset::{self, AssetIssue, AssetKind, AssetState};
use crate::models::automation_rule::{self, RuleAction, RuleCondition, RuleScope, RuleState};
use crate::models::campaign;
use crate::models::project::{self, ProjectStage};

/// Parses a platform path segment, answering 404 for unknown platforms
pub fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse::<Platform>().map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("platform '{}' not found", raw),
        )
    })
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub name: String,
    pub stage: ProjectStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<project::Model> for ProjectResponse {
    fn from(model: project::Model) -> Self {
        Self {
            id: model.id,
            owner_user_id: model.owner_user_id,
            name: model.name,
            stage: model.stage,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssetResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: AssetKind,
    pub name: String,
    pub content_ref: String,
    pub state: AssetState,
    pub risk_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub compatibility: Vec<Platform>,
    pub issues: Vec<AssetIssue>,
    pub allowed_actions: Vec<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<asset::Model> for AssetResponse {
    fn from(model: asset::Model) -> Self {
        Self {
            allowed_actions: asset_state::allowed_actions(model.state)
                .iter()
                .map(|action| action.as_str().to_string())
                .collect(),
            id: model.id,
            project_id: model.project_id,
            kind: model.kind,
            name: model.name,
            content_ref: model.content_ref,
            state: model.state,
            risk_score: model.risk_score,
            quality_score: model.quality_score,
            compatibility: model.compatibility.0,
            issues: model.issues.0,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RuleResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub scope: RuleScope,
    pub condition: RuleCondition,
    pub action: RuleAction,
    pub state: RuleState,
    pub cooldown_minutes: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub cooldown_ends_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub allowed_actions: Vec<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<automation_rule::Model> for RuleResponse {
    fn from(model: automation_rule::Model) -> Self {
        Self {
            allowed_actions: automation::allowed_commands(model.state)
                .iter()
                .map(|command| command.as_str().to_string())
                .collect(),
            id: model.id,
            project_id: model.project_id,
            name: model.name,
            scope: model.scope,
            condition: model.condition,
            action: model.action,
            state: model.state,
            cooldown_minutes: model.cooldown_minutes,
            last_triggered_at: model.last_triggered_at,
            cooldown_ends_at: model.cooldown_ends_at,
            last_error: model.last_error,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub asset_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<campaign::Model> for CampaignResponse {
    fn from(model: campaign::Model) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            connection_id: model.connection_id,
            name: model.name,
            platform: model.platform,
            asset_ids: model.asset_ids.0,
            created_at: model.created_at,
        }
    }
}
