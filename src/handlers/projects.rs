//! # Project Handlers

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::error::ApiError;
use crate::handlers::ActorQuery;
use crate::handlers::types::{CampaignResponse, ProjectResponse};
use crate::projects::NewCampaign;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub name: String,
}

/// Creates a project owned by the acting user
#[utoipa::path(
    post,
    path = "/projects",
    security(("bearer_auth" = [])),
    params(UserHeader),
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created in stage SETUP", body = ProjectResponse),
        (status = 400, description = "Invalid body", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn create_project(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let Json(request) = payload?;
    let project = state.projects.create_project(user.0, &request.name).await?;
    Ok((StatusCode::CREATED, Json(project.into())))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader),
    responses(
        (status = 200, description = "Project with its current stage", body = ProjectResponse),
        (status = 403, description = "Project belongs to another user", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn get_project(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = state.projects.get_project(id, user.0).await?;
    Ok(Json(project.into()))
}

/// Deletes a project with everything it owns
#[utoipa::path(
    delete,
    path = "/projects/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 403, description = "Project belongs to another user", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn delete_project(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.projects.delete_project(id, user.0).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/projects/{id}/campaigns",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader),
    responses(
        (status = 200, description = "Launched campaigns", body = [CampaignResponse]),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CampaignResponse>>, ApiError> {
    state.projects.ensure_owner(id, user.0).await?;
    let campaigns = state.projects.list_campaigns(id).await?;
    Ok(Json(campaigns.into_iter().map(CampaignResponse::from).collect()))
}

/// Records a launched campaign
///
/// Consumes the referenced assets, which must all be READY_FOR_LAUNCH.
#[utoipa::path(
    post,
    path = "/projects/{id}/campaigns",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader, ActorQuery),
    request_body = NewCampaign,
    responses(
        (status = 201, description = "Campaign recorded", body = CampaignResponse),
        (status = 400, description = "Invalid body or no usable launch connection", body = ApiError),
        (status = 403, description = "Project belongs to another user", body = ApiError),
        (status = 409, description = "An asset is not ready for launch", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
    payload: Result<Json<NewCampaign>, JsonRejection>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let source = actor.source()?;
    let Json(request) = payload?;
    state.projects.ensure_owner(id, user.0).await?;
    let campaign = state.projects.create_campaign(id, request, source).await?;
    Ok((StatusCode::CREATED, Json(campaign.into())))
}
