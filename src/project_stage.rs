//! # Project stage aggregation
//!
//! A project's `stage` is derived, never assigned. [`compute_stage`] is a pure function
//! of a snapshot of the project's connections, assets and campaigns; [`recompute`] loads
//! that snapshot, stores the result and records a `project.*` event when it changes.
//!
//! Precedence, highest qualifying stage wins:
//!
//! | Stage                | Condition                                                   |
//! |----------------------|-------------------------------------------------------------|
//! | `LIVE`               | any campaign exists                                         |
//! | `READY_TO_LAUNCH`    | an approved or ready asset and a live launch-capable account |
//! | `ANALYSIS_PASSED`    | an approved or ready asset                                  |
//! | `ASSETS_READY`       | any asset                                                   |
//! | `ACCOUNTS_CONNECTED` | a `connected` or `limited_access` connection                |
//! | `SETUP`              | otherwise                                                   |

use sea_orm::{ConnectionTrait, DbErr};
use tracing::info;
use uuid::Uuid;

use crate::events::{self, NewEvent};
use crate::models::asset::{self, AssetState};
use crate::models::connection::{self, ConnectionStatus, PermissionSet};
use crate::models::domain_event::{EntityKind, EventSource};
use crate::models::project::ProjectStage;
use crate::repositories::{
    AssetRepository, CampaignRepository, ConnectionRepository, ProjectRepository,
};

/// The facts about a connection that matter for the stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFacts {
    pub status: ConnectionStatus,
    pub permissions: PermissionSet,
}

impl From<&connection::Model> for ConnectionFacts {
    fn from(model: &connection::Model) -> Self {
        Self {
            status: model.status,
            permissions: model.permissions.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub connections: Vec<ConnectionFacts>,
    pub asset_states: Vec<AssetState>,
    pub campaign_count: u64,
}

impl ProjectSnapshot {
    pub fn new(
        connections: &[connection::Model],
        assets: &[asset::Model],
        campaign_count: u64,
    ) -> Self {
        Self {
            connections: connections.iter().map(ConnectionFacts::from).collect(),
            asset_states: assets.iter().map(|a| a.state).collect(),
            campaign_count,
        }
    }
}

pub fn compute_stage(snapshot: &ProjectSnapshot) -> ProjectStage {
    let has_approved_asset = snapshot
        .asset_states
        .iter()
        .any(|state| matches!(state, AssetState::Approved | AssetState::ReadyForLaunch));
    let can_launch = snapshot
        .connections
        .iter()
        .any(|c| c.status.is_live() && c.permissions.can_launch());
    let has_live_connection = snapshot.connections.iter().any(|c| c.status.is_live());

    if snapshot.campaign_count > 0 {
        ProjectStage::Live
    } else if has_approved_asset && can_launch {
        ProjectStage::ReadyToLaunch
    } else if has_approved_asset {
        ProjectStage::AnalysisPassed
    } else if !snapshot.asset_states.is_empty() {
        ProjectStage::AssetsReady
    } else if has_live_connection {
        ProjectStage::AccountsConnected
    } else {
        ProjectStage::Setup
    }
}

pub async fn load_snapshot<C: ConnectionTrait>(
    conn: &C,
    project_id: Uuid,
) -> Result<ProjectSnapshot, DbErr> {
    let connections = ConnectionRepository::new(conn)
        .list_for_project(project_id)
        .await?;
    let assets = AssetRepository::new(conn).list_for_project(project_id).await?;
    let campaign_count = CampaignRepository::new(conn)
        .count_for_project(project_id)
        .await?;
    Ok(ProjectSnapshot::new(&connections, &assets, campaign_count))
}

/// Recomputes and stores the stage of `project_id`.
///
/// Returns `None` if the project no longer exists.
pub async fn recompute<C: ConnectionTrait>(
    conn: &C,
    project_id: Uuid,
    source: EventSource,
) -> Result<Option<ProjectStage>, DbErr> {
    let projects = ProjectRepository::new(conn);
    let Some(project) = projects.find_by_id(project_id).await? else {
        return Ok(None);
    };

    let snapshot = load_snapshot(conn, project_id).await?;
    let stage = compute_stage(&snapshot);

    if stage != project.stage {
        projects.set_stage(project_id, stage).await?;
        events::record(
            conn,
            NewEvent::new(EntityKind::Project, project_id, "recompute_stage", source)
                .project(project_id)
                .transition(Some(stage_name(project.stage)), stage_name(stage)),
        )
        .await?;
        info!(
            project_id = %project_id,
            from = stage_name(project.stage),
            to = stage_name(stage),
            "Project stage changed"
        );
    }

    Ok(Some(stage))
}

pub fn stage_name(stage: ProjectStage) -> &'static str {
    match stage {
        ProjectStage::Setup => "SETUP",
        ProjectStage::AccountsConnected => "ACCOUNTS_CONNECTED",
        ProjectStage::AssetsReady => "ASSETS_READY",
        ProjectStage::AnalysisPassed => "ANALYSIS_PASSED",
        ProjectStage::ReadyToLaunch => "READY_TO_LAUNCH",
        ProjectStage::Live => "LIVE",
    }
}
