//! # Domain Event Handlers
//!
//! Read access to the append-only event log, newest first, restricted to the acting
//! user's projects.

use std::collections::HashSet;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::error::ApiError;
use crate::events::DomainEventResponse;
use crate::repositories::domain_event::MAX_EVENT_LIMIT;
use crate::repositories::{DomainEventRepository, EventFilter, ProjectRepository};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    /// Only events about this entity
    pub entity_id: Option<Uuid>,
    /// Only events of this project
    pub project_id: Option<Uuid>,
    /// Only rejected and guard-blocked attempts
    #[serde(default)]
    pub blocked_only: bool,
    /// Maximum number of events (default 100, max 1000)
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/events",
    security(("bearer_auth" = [])),
    params(UserHeader, EventsQuery),
    responses(
        (status = 200, description = "Events, newest first", body = [DomainEventResponse]),
        (status = 400, description = "Invalid query", body = ApiError),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "events"
)]
pub async fn list_events(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<DomainEventResponse>>, ApiError> {
    if let Some(limit) = query.limit
        && !(1..=MAX_EVENT_LIMIT).contains(&limit)
    {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("limit must be between 1 and {MAX_EVENT_LIMIT}"),
        ));
    }
    if let Some(project_id) = query.project_id {
        state.projects.ensure_owner(project_id, user.0).await?;
    }

    let owned: HashSet<Uuid> = ProjectRepository::new(state.db.as_ref())
        .list_for_owner(user.0)
        .await?
        .into_iter()
        .map(|project| project.id)
        .collect();

    let events = DomainEventRepository::new(state.db.as_ref())
        .list(&EventFilter {
            entity_id: query.entity_id,
            project_id: query.project_id,
            blocked_only: query.blocked_only,
            limit: query.limit,
        })
        .await?;

    // Events of deleted projects stay in the log but are no longer anyone's to read
    let visible = events
        .into_iter()
        .filter(|event| event.project_id.is_some_and(|id| owned.contains(&id)))
        .map(DomainEventResponse::from)
        .collect();
    Ok(Json(visible))
}
