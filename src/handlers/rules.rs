//! # Automation Rule Handlers

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::automation::NewRule;
use crate::error::ApiError;
use crate::handlers::ActorQuery;
use crate::handlers::types::RuleResponse;
use crate::models::automation_rule;
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RuleFailure {
    pub message: String,
}

async fn owned_rule(
    state: &AppState,
    id: Uuid,
    user: Uuid,
) -> Result<automation_rule::Model, ApiError> {
    let rule = state.rules.get(id).await?;
    state.projects.ensure_owner(rule.project_id, user).await?;
    Ok(rule)
}

#[utoipa::path(
    get,
    path = "/projects/{id}/rules",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader),
    responses(
        (status = 200, description = "Project rules", body = [RuleResponse]),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn list_rules(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RuleResponse>>, ApiError> {
    state.projects.ensure_owner(id, user.0).await?;
    let rules = state.rules.list_for_project(id).await?;
    Ok(Json(rules.into_iter().map(RuleResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/rules",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Project id"), UserHeader, ActorQuery),
    request_body = NewRule,
    responses(
        (status = 201, description = "Rule created in DISABLED", body = RuleResponse),
        (status = 400, description = "Invalid body", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
    payload: Result<Json<NewRule>, JsonRejection>,
) -> Result<(StatusCode, Json<RuleResponse>), ApiError> {
    let source = actor.source()?;
    let Json(input) = payload?;
    state.projects.ensure_owner(id, user.0).await?;
    let rule = state.rules.create(id, input, source).await?;
    Ok((StatusCode::CREATED, Json(rule.into())))
}

#[utoipa::path(
    get,
    path = "/rules/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader),
    responses(
        (status = 200, description = "Rule", body = RuleResponse),
        (status = 404, description = "Rule not found", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn get_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<RuleResponse>, ApiError> {
    Ok(Json(owned_rule(&state, id, user.0).await?.into()))
}

/// Deletes a DISABLED or ERROR rule
#[utoipa::path(
    delete,
    path = "/rules/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    responses(
        (status = 204, description = "Rule deleted"),
        (status = 409, description = "Rule must be DISABLED or ERROR", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<StatusCode, ApiError> {
    let source = actor.source()?;
    owned_rule(&state, id, user.0).await?;
    state.rules.delete(id, source).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/rules/{id}/enable",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    responses(
        (status = 200, description = "Rule is ACTIVE", body = RuleResponse),
        (status = 409, description = "Transition not allowed in the current state", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn enable_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<Json<RuleResponse>, ApiError> {
    let source = actor.source()?;
    owned_rule(&state, id, user.0).await?;
    let rule = state.rules.enable(id, source).await?;
    Ok(Json(rule.into()))
}

/// Disables the rule from ACTIVE, COOLDOWN or ERROR
#[utoipa::path(
    post,
    path = "/rules/{id}/disable",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    responses(
        (status = 200, description = "Rule is DISABLED", body = RuleResponse),
        (status = 409, description = "Transition not allowed in the current state", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn disable_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<Json<RuleResponse>, ApiError> {
    let source = actor.source()?;
    owned_rule(&state, id, user.0).await?;
    let rule = state.rules.disable(id, source).await?;
    Ok(Json(rule.into()))
}

/// Marks the rule as fired and starts its cooldown
#[utoipa::path(
    post,
    path = "/rules/{id}/trigger",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    responses(
        (status = 200, description = "Rule is in COOLDOWN", body = RuleResponse),
        (status = 409, description = "Transition not allowed in the current state", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn trigger_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<Json<RuleResponse>, ApiError> {
    let source = actor.source()?;
    owned_rule(&state, id, user.0).await?;
    let rule = state.rules.trigger(id, source).await?;
    Ok(Json(rule.into()))
}

/// Ends the cooldown early
#[utoipa::path(
    post,
    path = "/rules/{id}/reset",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    responses(
        (status = 200, description = "Rule is ACTIVE again", body = RuleResponse),
        (status = 409, description = "Transition not allowed in the current state", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn reset_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> Result<Json<RuleResponse>, ApiError> {
    let source = actor.source()?;
    owned_rule(&state, id, user.0).await?;
    let rule = state.rules.reset(id, source).await?;
    Ok(Json(rule.into()))
}

/// Records a rule execution failure
#[utoipa::path(
    post,
    path = "/rules/{id}/fail",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Rule id"), UserHeader, ActorQuery),
    request_body = RuleFailure,
    responses(
        (status = 200, description = "Rule is in ERROR", body = RuleResponse),
        (status = 409, description = "Transition not allowed in the current state", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn fail_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
    payload: Result<Json<RuleFailure>, JsonRejection>,
) -> Result<Json<RuleResponse>, ApiError> {
    let source = actor.source()?;
    let Json(failure) = payload?;
    if failure.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "message must not be empty",
        ));
    }
    owned_rule(&state, id, user.0).await?;
    let rule = state
        .rules
        .record_failure(id, failure.message, source)
        .await?;
    Ok(Json(rule.into()))
}
