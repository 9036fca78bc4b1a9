//! # Asset Handlers
//!
//! Asset creation and the readiness transitions. Every mutation goes through
//! [`crate::asset_state::AssetService`], which records the attempt whether or not it is
//! accepted.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::asset_state::{AnalysisResult, NewAsset, ReadinessReport};
use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::error::ApiError;
use crate::handlers::ActorQuery;
use crate::handlers::types::{AssetResponse, parse_platform};
use crate::models::Platform;
use crate::models::asset;
use crate::models::domain_event::EventSource;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TargetPlatformQuery {
    /// Platform the asset is about to launch on; enables the compatibility guard
    pub platform: Option<String>,
    /// `UI` (default), `AI` or `AUTOMATION`
    pub source: Option<EventSource>,
}

impl TargetPlatformQuery {
    fn platform(&self) -> Result<Option<Platform>, ApiError> {
        self.platform.as_deref().map(parse_platform).transpose()
    }
}

/// Loads an asset the acting user may touch
async fn owned_asset(state: &AppState, id: Uuid, user: Uuid) -> Result<asset::Model, ApiError> {
    let asset = state.assets.get(id).await?;
    state.projects.ensure_owner(asset.project_id, user).await?;
    Ok(asset)
}

#[utoipa::path(
    get,
    path = "/projects/{id}/assets",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader),
    responses(
        (status = 200, description = "Project assets", body = [AssetResponse]),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn list_assets(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AssetResponse>>, ApiError> {
    state.projects.ensure_owner(id, user.0).await?;
    let assets = state.assets.list_for_project(id).await?;
    Ok(Json(assets.into_iter().map(AssetResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/assets",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader, ActorQuery),
    request_body = NewAsset,
    responses(
        (status = 201, description = "Asset created in UPLOADED", body = AssetResponse),
        (status = 400, description = "Invalid body", body = ApiError),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn create_asset(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
    payload: Result<Json<NewAsset>, JsonRejection>,
) -> Result<(StatusCode, Json<AssetResponse>), ApiError> {
    let source = actor.source()?;
    let Json(input) = payload?;
    state.projects.ensure_owner(id, user.0).await?;
    let asset = state.assets.create(id, input, source).await?;
    Ok((StatusCode::CREATED, Json(asset.into())))
}

#[utoipa::path(
    get,
    path = "/assets/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader),
    responses(
        (status = 200, description = "Asset", body = AssetResponse),
        (status = 403, description = "Asset belongs to another user's project", body = ApiError),
        (status = 404, description = "Asset not found", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn get_asset(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>, ApiError> {
    let asset = owned_asset(&state, id, user.0).await?;
    Ok(Json(asset.into()))
}

/// Starts analysis; the verdict arrives asynchronously
#[utoipa::path(
    post,
    path = "/assets/{id}/analyze",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader, ActorQuery),
    responses(
        (status = 202, description = "Asset is ANALYZING and a job is queued", body = AssetResponse),
        (status = 409, description = "Analyze not allowed in the current state", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn analyze_asset(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<(StatusCode, Json<AssetResponse>), ApiError> {
    let source = actor.source()?;
    owned_asset(&state, id, user.0).await?;
    let asset = state.assets.analyze(id, source).await?;
    Ok((StatusCode::ACCEPTED, Json(asset.into())))
}

/// Marks an approved asset ready for launch, subject to the launch guard
#[utoipa::path(
    post,
    path = "/assets/{id}/mark-ready",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader, TargetPlatformQuery),
    responses(
        (status = 200, description = "Asset is READY_FOR_LAUNCH", body = AssetResponse),
        (status = 409, description = "Transition not allowed or a guard blocked it", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn mark_ready(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(query): Query<TargetPlatformQuery>,
) -> Result<Json<AssetResponse>, ApiError> {
    let platform = query.platform()?;
    let source = ActorQuery {
        source: query.source,
    }
    .source()?;
    owned_asset(&state, id, user.0).await?;
    let asset = state.assets.mark_ready(id, platform, source).await?;
    Ok(Json(asset.into()))
}

#[utoipa::path(
    post,
    path = "/assets/{id}/unmark",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader, ActorQuery),
    responses(
        (status = 200, description = "Asset is back to APPROVED", body = AssetResponse),
        (status = 409, description = "Unmark not allowed in the current state", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn unmark(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<Json<AssetResponse>, ApiError> {
    let source = actor.source()?;
    owned_asset(&state, id, user.0).await?;
    let asset = state.assets.unmark(id, source).await?;
    Ok(Json(asset.into()))
}

/// Previews the launch guard without changing the asset
#[utoipa::path(
    get,
    path = "/assets/{id}/readiness",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader, TargetPlatformQuery),
    responses(
        (status = 200, description = "Guard evaluation", body = ReadinessReport),
        (status = 404, description = "Asset not found", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn readiness(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(query): Query<TargetPlatformQuery>,
) -> Result<Json<ReadinessReport>, ApiError> {
    let platform = query.platform()?;
    owned_asset(&state, id, user.0).await?;
    Ok(Json(state.assets.readiness(id, platform).await?))
}

/// Analysis service callback delivering a verdict
///
/// Authenticated with the operator token; the analysis service acts for no project owner.
#[utoipa::path(
    post,
    path = "/assets/{id}/analysis-result",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Asset id"), UserHeader),
    request_body = AnalysisResult,
    responses(
        (status = 200, description = "Verdict applied", body = AssetResponse),
        (status = 400, description = "Scores out of range", body = ApiError),
        (status = 409, description = "Asset is not ANALYZING", body = ApiError)
    ),
    tag = "assets"
)]
pub async fn analysis_result(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    payload: Result<Json<AnalysisResult>, JsonRejection>,
) -> Result<Json<AssetResponse>, ApiError> {
    let Json(result) = payload?;
    let asset = state
        .assets
        .complete_analysis(id, result, EventSource::Ai)
        .await?;
    Ok(Json(asset.into()))
}
