//! # Asset readiness
//!
//! Transition table (state → caller actions → next state):
//!
//! | State              | Actions                                  |
//! |--------------------|------------------------------------------|
//! | `UPLOADED`         | analyze → `ANALYZING`                    |
//! | `ANALYZING`        | none (resolved by the analysis outcome)  |
//! | `APPROVED`         | mark_ready → `READY_FOR_LAUNCH`, analyze |
//! | `BLOCKED`          | analyze                                  |
//! | `READY_FOR_LAUNCH` | unmark → `APPROVED`, use_in_campaign     |
//! | `USED_IN_CAMPAIGN` | none (terminal)                          |
//!
//! `ANALYZING` only leaves through an [`AnalysisVerdict`], applied by the analysis worker
//! or the result callback through the same path as caller actions. `mark_ready` is
//! additionally gated by [`ready_for_launch_guard`].
//!
//! Every attempt, accepted or refused, is recorded as a domain event.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::CoreError;
use crate::events::{self, NewEvent};
use crate::models::Platform;
use crate::models::analysis_job::{self, AnalysisJobStatus};
use crate::models::asset::{self, AssetIssue, AssetKind, AssetState, IssueList, PlatformSet};
use crate::models::domain_event::{EntityKind, EventSource};
use crate::project_stage;
use crate::repositories::{AnalysisJobRepository, AssetRepository};

pub const GUARD_STATE_IS_APPROVED: &str = "state_is_approved";
pub const GUARD_RISK_THRESHOLD: &str = "risk_threshold";
pub const GUARD_PLATFORM_COMPATIBILITY: &str = "platform_compatibility";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetAction {
    Analyze,
    MarkReady,
    Unmark,
    UseInCampaign,
}

impl AssetAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetAction::Analyze => "analyze",
            AssetAction::MarkReady => "mark_ready",
            AssetAction::Unmark => "unmark",
            AssetAction::UseInCampaign => "use_in_campaign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisVerdict {
    Approved,
    Blocked,
}

/// Actions a caller may invoke in `state`
pub fn allowed_actions(state: AssetState) -> &'static [AssetAction] {
    match state {
        AssetState::Uploaded => &[AssetAction::Analyze],
        AssetState::Analyzing => &[],
        AssetState::Approved => &[AssetAction::MarkReady, AssetAction::Analyze],
        AssetState::Blocked => &[AssetAction::Analyze],
        AssetState::ReadyForLaunch => &[AssetAction::Unmark, AssetAction::UseInCampaign],
        AssetState::UsedInCampaign => &[],
    }
}

fn allowed_action_names(state: AssetState) -> Vec<String> {
    allowed_actions(state)
        .iter()
        .map(|action| action.as_str().to_string())
        .collect()
}

/// Either a caller action or an analysis outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetTransition {
    Action(AssetAction),
    Outcome(AnalysisVerdict),
}

impl AssetTransition {
    pub fn name(&self) -> &'static str {
        match self {
            AssetTransition::Action(action) => action.as_str(),
            AssetTransition::Outcome(AnalysisVerdict::Approved) => "analysis_approved",
            AssetTransition::Outcome(AnalysisVerdict::Blocked) => "analysis_blocked",
        }
    }

    /// Next state from `from`, or `None` when the table forbids it
    pub fn target(&self, from: AssetState) -> Option<AssetState> {
        match *self {
            AssetTransition::Action(action) => {
                if !allowed_actions(from).contains(&action) {
                    return None;
                }
                Some(match action {
                    AssetAction::Analyze => AssetState::Analyzing,
                    AssetAction::MarkReady => AssetState::ReadyForLaunch,
                    AssetAction::Unmark => AssetState::Approved,
                    AssetAction::UseInCampaign => AssetState::UsedInCampaign,
                })
            }
            AssetTransition::Outcome(verdict) => match (from, verdict) {
                (AssetState::Analyzing, AnalysisVerdict::Approved) => Some(AssetState::Approved),
                (AssetState::Analyzing, AnalysisVerdict::Blocked) => Some(AssetState::Blocked),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GuardCheck {
    pub guard_name: &'static str,
    pub passed: bool,
    pub reason: Option<String>,
}

/// Evaluates every launch guard without short-circuiting
pub fn evaluate_guards(
    asset: &asset::Model,
    target_platform: Option<Platform>,
    risk_threshold: f64,
) -> Vec<GuardCheck> {
    let state_check = if asset.state == AssetState::Approved {
        None
    } else {
        Some(format!(
            "asset is {}; only APPROVED assets can be marked ready",
            asset.state.as_str()
        ))
    };

    let risk_check = asset
        .risk_score
        .filter(|score| *score > risk_threshold)
        .map(|score| format!("risk score {score} exceeds threshold {risk_threshold}"));

    let platform_check = target_platform
        .filter(|platform| {
            asset.compatibility.is_declared() && !asset.compatibility.contains(*platform)
        })
        .map(|platform| {
            let declared: Vec<&str> = asset.compatibility.0.iter().map(Platform::as_str).collect();
            format!(
                "asset is not compatible with {platform} (compatible with: {})",
                declared.join(", ")
            )
        });

    [
        (GUARD_STATE_IS_APPROVED, state_check),
        (GUARD_RISK_THRESHOLD, risk_check),
        (GUARD_PLATFORM_COMPATIBILITY, platform_check),
    ]
    .into_iter()
    .map(|(guard_name, failure)| GuardCheck {
        guard_name,
        passed: failure.is_none(),
        reason: failure,
    })
    .collect()
}

/// Guard for `APPROVED → READY_FOR_LAUNCH`; returns the first failing guard
pub fn ready_for_launch_guard(
    asset: &asset::Model,
    target_platform: Option<Platform>,
    risk_threshold: f64,
) -> Result<(), GuardCheck> {
    match evaluate_guards(asset, target_platform, risk_threshold)
        .into_iter()
        .find(|check| !check.passed)
    {
        Some(failed) => Err(failed),
        None => Ok(()),
    }
}

/// Input for a new asset
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAsset {
    pub kind: AssetKind,
    pub name: String,
    pub content_ref: String,
    #[serde(default)]
    pub compatibility: Vec<Platform>,
}

/// Verdict delivered by the analysis service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisResult {
    pub verdict: AnalysisVerdict,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub issues: Vec<AssetIssue>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadinessReport {
    pub asset_id: Uuid,
    pub state: AssetState,
    pub target_platform: Option<Platform>,
    pub ready: bool,
    pub guards: Vec<GuardCheck>,
    pub allowed_actions: Vec<String>,
}

#[derive(Clone)]
pub struct AssetService {
    db: Arc<DatabaseConnection>,
    risk_threshold: f64,
}

impl AssetService {
    pub fn new(db: Arc<DatabaseConnection>, risk_threshold: f64) -> Self {
        Self { db, risk_threshold }
    }

    pub async fn get(&self, asset_id: Uuid) -> Result<asset::Model, CoreError> {
        AssetRepository::new(self.db.as_ref())
            .find_by_id(asset_id)
            .await?
            .ok_or_else(|| CoreError::not_found("asset", asset_id))
    }

    pub async fn list_for_project(&self, project_id: Uuid) -> Result<Vec<asset::Model>, CoreError> {
        Ok(AssetRepository::new(self.db.as_ref())
            .list_for_project(project_id)
            .await?)
    }

    #[instrument(skip(self, input), fields(project_id = %project_id))]
    pub async fn create(
        &self,
        project_id: Uuid,
        input: NewAsset,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        if input.name.trim().is_empty() {
            return Err(CoreError::Validation("asset name must not be empty".to_string()));
        }
        if input.content_ref.trim().is_empty() {
            return Err(CoreError::Validation(
                "asset content_ref must not be empty".to_string(),
            ));
        }

        let mut compatibility = input.compatibility;
        compatibility.sort();
        compatibility.dedup();

        let now = Utc::now();
        let txn = self.db.begin().await?;
        let stored = AssetRepository::new(&txn)
            .insert(asset::Model {
                id: Uuid::new_v4(),
                project_id,
                kind: input.kind,
                name: input.name.trim().to_string(),
                content_ref: input.content_ref,
                risk_score: None,
                quality_score: None,
                compatibility: PlatformSet(compatibility),
                issues: IssueList::default(),
                state: AssetState::Uploaded,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        events::record(
            &txn,
            NewEvent::new(EntityKind::Asset, stored.id, "create", source)
                .project(project_id)
                .transition(None, AssetState::Uploaded.as_str()),
        )
        .await?;
        project_stage::recompute(&txn, project_id, EventSource::System).await?;
        txn.commit().await?;

        Ok(stored)
    }

    /// Records a refused attempt and builds the caller-facing error
    async fn reject(
        &self,
        asset: &asset::Model,
        transition: AssetTransition,
        source: EventSource,
    ) -> Result<CoreError, CoreError> {
        let current = asset.state.as_str();
        events::record(
            self.db.as_ref(),
            NewEvent::new(EntityKind::Asset, asset.id, transition.name(), source)
                .project(asset.project_id)
                .rejected(
                    current,
                    format!(
                        "action '{}' is not allowed in state {}",
                        transition.name(),
                        current
                    ),
                ),
        )
        .await?;

        Ok(CoreError::InvalidTransition {
            entity: "asset",
            current_state: current.to_string(),
            attempted_action: transition.name().to_string(),
            allowed_actions: allowed_action_names(asset.state),
        })
    }

    /// Checks the table, recording a refusal; returns the target state
    async fn plan(
        &self,
        asset: &asset::Model,
        transition: AssetTransition,
        source: EventSource,
    ) -> Result<AssetState, CoreError> {
        match transition.target(asset.state) {
            Some(target) => Ok(target),
            None => Err(self.reject(asset, transition, source).await?),
        }
    }

    /// Writes an already-planned transition on `conn` with its event and stage update
    async fn write<C: ConnectionTrait>(
        conn: &C,
        asset: &asset::Model,
        target: AssetState,
        transition: AssetTransition,
        source: EventSource,
        reason: Option<String>,
        update: impl FnOnce(&mut asset::Model),
    ) -> Result<asset::Model, CoreError> {
        let mut updated = asset.clone();
        updated.state = target;
        update(&mut updated);

        let stored = AssetRepository::new(conn)
            .update_versioned(asset.version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "asset",
                id: asset.id,
            })?;

        let mut event = NewEvent::new(EntityKind::Asset, asset.id, transition.name(), source)
            .project(asset.project_id)
            .transition(Some(asset.state.as_str()), target.as_str());
        if let Some(reason) = reason {
            event = event.reason(reason);
        }
        events::record(conn, event).await?;
        project_stage::recompute(conn, asset.project_id, EventSource::System).await?;

        info!(
            asset_id = %asset.id,
            from = asset.state.as_str(),
            to = target.as_str(),
            "Asset transitioned"
        );
        Ok(stored)
    }

    /// `UPLOADED | APPROVED | BLOCKED → ANALYZING` and enqueues an analysis job.
    ///
    /// Returns as soon as the job is queued; the verdict arrives out of band.
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn analyze(
        &self,
        asset_id: Uuid,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        let asset = self.get(asset_id).await?;
        let transition = AssetTransition::Action(AssetAction::Analyze);
        let target = self.plan(&asset, transition, source).await?;

        let txn = self.db.begin().await?;
        let stored = Self::write(&txn, &asset, target, transition, source, None, |a| {
            a.risk_score = None;
            a.quality_score = None;
            a.issues = IssueList::default();
        })
        .await?;

        let now = Utc::now();
        AnalysisJobRepository::new(&txn)
            .insert(analysis_job::Model {
                id: Uuid::new_v4(),
                asset_id,
                status: AnalysisJobStatus::Queued,
                attempts: 0,
                next_attempt_at: now,
                last_error: None,
                claimed_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;
        txn.commit().await?;

        Ok(stored)
    }

    /// `APPROVED → READY_FOR_LAUNCH`, gated by the launch guard
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn mark_ready(
        &self,
        asset_id: Uuid,
        target_platform: Option<Platform>,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        let asset = self.get(asset_id).await?;
        let transition = AssetTransition::Action(AssetAction::MarkReady);
        let target = self.plan(&asset, transition, source).await?;

        if let Err(failed) = ready_for_launch_guard(&asset, target_platform, self.risk_threshold) {
            let reason = failed.reason.unwrap_or_default();
            events::record(
                self.db.as_ref(),
                NewEvent::new(EntityKind::Asset, asset.id, transition.name(), source)
                    .project(asset.project_id)
                    .guard_blocked(asset.state.as_str(), reason.clone()),
            )
            .await?;
            info!(
                asset_id = %asset.id,
                guard = failed.guard_name,
                reason = %reason,
                "Launch guard blocked asset"
            );
            return Err(CoreError::GuardBlocked {
                guard_name: failed.guard_name,
                reason,
                current_state: asset.state.as_str().to_string(),
                allowed_actions: allowed_action_names(asset.state),
            });
        }

        let txn = self.db.begin().await?;
        let stored = Self::write(&txn, &asset, target, transition, source, None, |_| {}).await?;
        txn.commit().await?;
        Ok(stored)
    }

    /// `READY_FOR_LAUNCH → APPROVED`
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn unmark(
        &self,
        asset_id: Uuid,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        let asset = self.get(asset_id).await?;
        let transition = AssetTransition::Action(AssetAction::Unmark);
        let target = self.plan(&asset, transition, source).await?;

        let txn = self.db.begin().await?;
        let stored = Self::write(&txn, &asset, target, transition, source, None, |_| {}).await?;
        txn.commit().await?;
        Ok(stored)
    }

    /// Checks that `asset` may be consumed by a campaign, recording a refusal if not
    pub(crate) async fn check_usable_in_campaign(
        &self,
        asset: &asset::Model,
        source: EventSource,
    ) -> Result<(), CoreError> {
        self.plan(asset, AssetTransition::Action(AssetAction::UseInCampaign), source)
            .await
            .map(|_| ())
    }

    /// `READY_FOR_LAUNCH → USED_IN_CAMPAIGN` on the caller's transaction
    pub(crate) async fn use_in_campaign<C: ConnectionTrait>(
        conn: &C,
        asset: &asset::Model,
        campaign_id: Uuid,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        let transition = AssetTransition::Action(AssetAction::UseInCampaign);
        let target = transition.target(asset.state).ok_or(CoreError::Conflict {
            entity: "asset",
            id: asset.id,
        })?;
        Self::write(
            conn,
            asset,
            target,
            transition,
            source,
            Some(format!("consumed by campaign {campaign_id}")),
            |_| {},
        )
        .await
    }

    /// Applies an analysis verdict and closes the asset's open job as succeeded
    #[instrument(skip(self, result), fields(asset_id = %asset_id))]
    pub async fn complete_analysis(
        &self,
        asset_id: Uuid,
        result: AnalysisResult,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        self.finish_analysis(asset_id, result, AnalysisJobStatus::Succeeded, source)
            .await
    }

    /// Applies `result` through the shared transition path and moves the open analysis
    /// job (if any) to `job_status`.
    pub(crate) async fn finish_analysis(
        &self,
        asset_id: Uuid,
        result: AnalysisResult,
        job_status: AnalysisJobStatus,
        source: EventSource,
    ) -> Result<asset::Model, CoreError> {
        for score in [result.risk_score, result.quality_score].into_iter().flatten() {
            if !(0.0..=100.0).contains(&score) {
                return Err(CoreError::Validation(format!(
                    "score {score} is outside 0..=100"
                )));
            }
        }

        let asset = self.get(asset_id).await?;
        let transition = AssetTransition::Outcome(result.verdict);
        let target = self.plan(&asset, transition, source).await?;

        let reason = (result.verdict == AnalysisVerdict::Blocked)
            .then(|| {
                result
                    .issues
                    .iter()
                    .map(|issue| issue.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .filter(|reason| !reason.is_empty());

        let txn = self.db.begin().await?;
        let stored = Self::write(&txn, &asset, target, transition, source, reason, |a| {
            a.risk_score = result.risk_score;
            a.quality_score = result.quality_score;
            a.issues = IssueList(result.issues.clone());
        })
        .await?;

        let jobs = AnalysisJobRepository::new(&txn);
        if let Some(job) = jobs.find_open_for_asset(asset_id).await? {
            let mut closed = job.clone();
            closed.status = job_status;
            jobs.transition(&job, closed).await?.ok_or(CoreError::Conflict {
                entity: "analysis_job",
                id: job.id,
            })?;
        }
        txn.commit().await?;

        Ok(stored)
    }

    /// Evaluates the launch guard without mutating anything
    pub async fn readiness(
        &self,
        asset_id: Uuid,
        target_platform: Option<Platform>,
    ) -> Result<ReadinessReport, CoreError> {
        let asset = self.get(asset_id).await?;
        let guards = evaluate_guards(&asset, target_platform, self.risk_threshold);
        Ok(ReadinessReport {
            asset_id,
            state: asset.state,
            target_platform,
            ready: asset.state == AssetState::ReadyForLaunch
                || guards.iter().all(|check| check.passed),
            guards,
            allowed_actions: allowed_action_names(asset.state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [AssetState; 6] = [
        AssetState::Uploaded,
        AssetState::Analyzing,
        AssetState::Approved,
        AssetState::Blocked,
        AssetState::ReadyForLaunch,
        AssetState::UsedInCampaign,
    ];

    const ALL_ACTIONS: [AssetAction; 4] = [
        AssetAction::Analyze,
        AssetAction::MarkReady,
        AssetAction::Unmark,
        AssetAction::UseInCampaign,
    ];

    fn approved_asset(risk_score: Option<f64>, compatibility: &[Platform]) -> asset::Model {
        let now = Utc::now();
        asset::Model {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            kind: AssetKind::Video,
            name: "Spring promo".to_string(),
            content_ref: "s3://bucket/promo.mp4".to_string(),
            risk_score,
            quality_score: Some(80.0),
            compatibility: PlatformSet(compatibility.to_vec()),
            issues: IssueList::default(),
            state: AssetState::Approved,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn table_matches_permitted_transitions() {
        let expected = [
            (AssetState::Uploaded, AssetAction::Analyze, AssetState::Analyzing),
            (AssetState::Approved, AssetAction::MarkReady, AssetState::ReadyForLaunch),
            (AssetState::Approved, AssetAction::Analyze, AssetState::Analyzing),
            (AssetState::Blocked, AssetAction::Analyze, AssetState::Analyzing),
            (AssetState::ReadyForLaunch, AssetAction::Unmark, AssetState::Approved),
            (
                AssetState::ReadyForLaunch,
                AssetAction::UseInCampaign,
                AssetState::UsedInCampaign,
            ),
        ];

        for state in ALL_STATES {
            for action in ALL_ACTIONS {
                let target = AssetTransition::Action(action).target(state);
                let permitted = expected
                    .iter()
                    .find(|(from, a, _)| *from == state && *a == action)
                    .map(|(_, _, to)| *to);
                assert_eq!(target, permitted, "{state:?} + {action:?}");
            }
        }
    }

    #[test]
    fn analyzing_only_resolves_through_outcomes() {
        assert!(allowed_actions(AssetState::Analyzing).is_empty());
        assert_eq!(
            AssetTransition::Outcome(AnalysisVerdict::Approved).target(AssetState::Analyzing),
            Some(AssetState::Approved)
        );
        assert_eq!(
            AssetTransition::Outcome(AnalysisVerdict::Blocked).target(AssetState::Analyzing),
            Some(AssetState::Blocked)
        );
        for state in ALL_STATES.into_iter().filter(|s| *s != AssetState::Analyzing) {
            assert_eq!(
                AssetTransition::Outcome(AnalysisVerdict::Approved).target(state),
                None
            );
        }
    }

    #[test]
    fn used_in_campaign_is_terminal() {
        assert!(allowed_actions(AssetState::UsedInCampaign).is_empty());
    }

    #[test]
    fn risk_above_threshold_blocks_with_reason() {
        let asset = approved_asset(Some(51.0), &[]);
        let failed = ready_for_launch_guard(&asset, None, 50.0).unwrap_err();
        assert_eq!(failed.guard_name, GUARD_RISK_THRESHOLD);
        assert!(failed.reason.unwrap().contains("risk score 51"));

        // Exactly at the threshold passes
        let asset = approved_asset(Some(50.0), &[]);
        assert!(ready_for_launch_guard(&asset, None, 50.0).is_ok());
    }

    #[test]
    fn missing_risk_score_passes_risk_guard() {
        let asset = approved_asset(None, &[]);
        assert!(ready_for_launch_guard(&asset, Some(Platform::Snapchat), 50.0).is_ok());
    }

    #[test]
    fn platform_must_be_declared_compatible() {
        let asset = approved_asset(Some(20.0), &[Platform::Google, Platform::Tiktok]);
        assert!(ready_for_launch_guard(&asset, Some(Platform::Google), 50.0).is_ok());
        assert!(ready_for_launch_guard(&asset, None, 50.0).is_ok());

        let failed = ready_for_launch_guard(&asset, Some(Platform::Snapchat), 50.0).unwrap_err();
        assert_eq!(failed.guard_name, GUARD_PLATFORM_COMPATIBILITY);
        assert!(failed.reason.unwrap().contains("snapchat"));
    }

    #[test]
    fn first_failing_guard_wins() {
        let mut asset = approved_asset(Some(99.0), &[Platform::Google]);
        asset.state = AssetState::Blocked;

        let failed = ready_for_launch_guard(&asset, Some(Platform::Tiktok), 50.0).unwrap_err();
        assert_eq!(failed.guard_name, GUARD_STATE_IS_APPROVED);

        let checks = evaluate_guards(&asset, Some(Platform::Tiktok), 50.0);
        assert!(checks.iter().all(|check| !check.passed));
    }
}
