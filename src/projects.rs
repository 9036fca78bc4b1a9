//! # Projects and campaigns
//!
//! A project owns its connections, assets, rules and campaigns. Only the owner may read,
//! modify or delete it; every service entry point that takes a project id from a caller
//! goes through [`ProjectService::ensure_owner`] first.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::asset_state::AssetService;
use crate::connection_manager::{ConnectionManager, Usability};
use crate::error::CoreError;
use crate::events::{self, NewEvent};
use crate::models::Platform;
use crate::models::campaign::{self, AssetIdList};
use crate::models::connection::ConnectionStatus;
use crate::models::domain_event::{EntityKind, EventSource};
use crate::models::project::{self, ProjectStage};
use crate::project_stage::{self, stage_name};
use crate::repositories::{
    AnalysisJobRepository, AssetRepository, AutomationRuleRepository, CampaignRepository,
    ConnectionRepository, PendingOAuthRequestRepository, ProjectRepository,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewCampaign {
    pub name: String,
    pub platform: Platform,
    pub asset_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct ProjectService {
    db: Arc<DatabaseConnection>,
    assets: AssetService,
    connections: ConnectionManager,
}

impl ProjectService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        assets: AssetService,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            db,
            assets,
            connections,
        }
    }

    /// Loads a project, failing with `Forbidden` unless `user_id` owns it
    pub async fn ensure_owner(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<project::Model, CoreError> {
        let project = ProjectRepository::new(self.db.as_ref())
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found("project", project_id))?;

        if project.owner_user_id != user_id {
            warn!(
                target: "security",
                project_id = %project_id,
                user_id = %user_id,
                "Project access denied: requester is not the owner"
            );
            return Err(CoreError::Forbidden(
                "project belongs to another user".to_string(),
            ));
        }
        Ok(project)
    }

    #[instrument(skip(self, name), fields(owner_user_id = %owner_user_id))]
    pub async fn create_project(
        &self,
        owner_user_id: Uuid,
        name: &str,
    ) -> Result<project::Model, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation(
                "project name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let stored = ProjectRepository::new(&txn)
            .insert(project::Model {
                id: Uuid::new_v4(),
                owner_user_id,
                name: name.to_string(),
                stage: ProjectStage::Setup,
                created_at: now,
                updated_at: now,
            })
            .await?;
        events::record(
            &txn,
            NewEvent::new(EntityKind::Project, stored.id, "create", EventSource::Ui)
                .project(stored.id)
                .transition(None, stage_name(ProjectStage::Setup)),
        )
        .await?;
        txn.commit().await?;

        info!(project_id = %stored.id, "Project created");
        Ok(stored)
    }

    pub async fn get_project(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<project::Model, CoreError> {
        self.ensure_owner(project_id, user_id).await
    }

    /// Removes the project together with everything it owns. Domain events are kept.
    #[instrument(skip(self), fields(project_id = %project_id))]
    pub async fn delete_project(&self, project_id: Uuid, user_id: Uuid) -> Result<(), CoreError> {
        let project = self.ensure_owner(project_id, user_id).await?;

        let txn = self.db.begin().await?;
        let assets = AssetRepository::new(&txn).list_for_project(project_id).await?;
        let jobs = AnalysisJobRepository::new(&txn);
        for asset in &assets {
            jobs.delete_for_asset(asset.id).await?;
        }
        PendingOAuthRequestRepository::new(&txn)
            .delete_for_project(project_id)
            .await?;
        CampaignRepository::new(&txn)
            .delete_for_project(project_id)
            .await?;
        AutomationRuleRepository::new(&txn)
            .delete_for_project(project_id)
            .await?;
        AssetRepository::new(&txn)
            .delete_for_project(project_id)
            .await?;
        let connections = ConnectionRepository::new(&txn)
            .delete_for_project(project_id)
            .await?;
        if !ProjectRepository::new(&txn).delete(project_id).await? {
            return Err(CoreError::not_found("project", project_id));
        }
        events::record(
            &txn,
            NewEvent::new(EntityKind::Project, project_id, "delete", EventSource::Ui)
                .project(project_id)
                .transition(Some(stage_name(project.stage)), "DELETED"),
        )
        .await?;
        txn.commit().await?;

        info!(
            project_id = %project_id,
            assets = assets.len(),
            connections,
            "Project deleted"
        );
        Ok(())
    }

    pub async fn list_campaigns(&self, project_id: Uuid) -> Result<Vec<campaign::Model>, CoreError> {
        Ok(CampaignRepository::new(self.db.as_ref())
            .list_for_project(project_id)
            .await?)
    }

    /// Records a launched campaign and consumes its assets.
    ///
    /// Every asset must belong to the project and be `READY_FOR_LAUNCH`; the project needs
    /// a usable connection on `platform` with launch permission.
    #[instrument(skip(self, input), fields(project_id = %project_id, platform = %input.platform))]
    pub async fn create_campaign(
        &self,
        project_id: Uuid,
        input: NewCampaign,
        source: EventSource,
    ) -> Result<campaign::Model, CoreError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation(
                "campaign name must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let asset_ids: Vec<Uuid> = input
            .asset_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if asset_ids.is_empty() {
            return Err(CoreError::Validation(
                "a campaign needs at least one asset".to_string(),
            ));
        }

        let mut assets = Vec::with_capacity(asset_ids.len());
        for asset_id in &asset_ids {
            let asset = self.assets.get(*asset_id).await?;
            if asset.project_id != project_id {
                return Err(CoreError::Validation(format!(
                    "asset {asset_id} belongs to another project"
                )));
            }
            self.assets.check_usable_in_campaign(&asset, source).await?;
            assets.push(asset);
        }

        let connection_id = self.launch_connection(project_id, input.platform).await?;

        let campaign_id = Uuid::new_v4();
        let txn = self.db.begin().await?;
        let stored = CampaignRepository::new(&txn)
            .insert(campaign::Model {
                id: campaign_id,
                project_id,
                connection_id,
                name,
                platform: input.platform,
                asset_ids: AssetIdList(asset_ids),
                created_at: Utc::now(),
            })
            .await?;
        for asset in &assets {
            AssetService::use_in_campaign(&txn, asset, campaign_id, source).await?;
        }
        events::record(
            &txn,
            NewEvent::new(EntityKind::Campaign, campaign_id, "launch", source)
                .project(project_id)
                .transition(None, "LAUNCHED"),
        )
        .await?;
        project_stage::recompute(&txn, project_id, source).await?;
        txn.commit().await?;

        info!(
            campaign_id = %campaign_id,
            connection_id = %connection_id,
            assets = assets.len(),
            "Campaign recorded"
        );
        Ok(stored)
    }

    /// First project connection on `platform` that is usable and may launch
    async fn launch_connection(
        &self,
        project_id: Uuid,
        platform: Platform,
    ) -> Result<Uuid, CoreError> {
        let candidates = ConnectionRepository::new(self.db.as_ref())
            .list_for_project(project_id)
            .await?;

        for connection in candidates.into_iter().filter(|c| {
            c.platform == platform
                && !matches!(
                    c.status,
                    ConnectionStatus::Pending | ConnectionStatus::Revoked
                )
        }) {
            match self.connections.ensure_fresh(connection.id).await? {
                Usability::Ready(grant) if grant.permissions.can_launch() => {
                    return Ok(grant.connection_id);
                }
                Usability::Ready(_) => {
                    info!(connection_id = %connection.id, "Connection lacks launch permission");
                }
                Usability::Unavailable { status, .. } => {
                    info!(
                        connection_id = %connection.id,
                        status = status.as_str(),
                        "Connection unusable for launch"
                    );
                }
            }
        }

        Err(CoreError::Validation(format!(
            "project has no usable {platform} connection with launch permission"
        )))
    }
}
