//! # Connections API Handlers
//!
//! Listing, refresh and revocation of ad account connections, plus the provider-side
//! revocation notification.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::connection_manager::ConnectionSummary;
use crate::error::ApiError;
use crate::handlers::types::parse_platform;
use crate::models::domain_event::EventSource;
use crate::server::AppState;

/// Query parameters for connections listing
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListConnectionsQuery {
    /// Only connections of this project
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    /// False when the provider refused and the connection was downgraded to `expired`
    pub refreshed: bool,
    pub connection: ConnectionSummary,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProviderRevocation {
    pub external_account_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderRevocationResponse {
    pub revoked_connection_ids: Vec<Uuid>,
}

/// Lists the acting user's connections
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    params(UserHeader, ListConnectionsQuery),
    responses(
        (status = 200, description = "Connections without credential material", body = ConnectionsResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Project belongs to another user", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Query(query): Query<ListConnectionsQuery>,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    if let Some(project_id) = query.project_id {
        state.projects.ensure_owner(project_id, user.0).await?;
    }
    let connections = state
        .connections
        .get_connections(user.0, query.project_id)
        .await?;
    Ok(Json(ConnectionsResponse { connections }))
}

/// Refreshes a connection's tokens now
#[utoipa::path(
    post,
    path = "/connections/{id}/refresh",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection id"), UserHeader),
    responses(
        (status = 200, description = "Refresh attempted", body = RefreshResponse),
        (status = 403, description = "Connection belongs to another user", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 409, description = "Refresh not allowed in the current status", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn refresh_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<RefreshResponse>, ApiError> {
    state.connections.get_owned(id, user.0).await?;
    let refreshed = state
        .connections
        .refresh_connection(id, EventSource::Ui)
        .await?;
    let connection = state.connections.get_owned(id, user.0).await?;

    Ok(Json(RefreshResponse {
        refreshed,
        connection: ConnectionSummary::from(&connection),
    }))
}

/// Revokes a connection and discards its credentials
#[utoipa::path(
    delete,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection id"), UserHeader),
    responses(
        (status = 200, description = "Connection revoked", body = ConnectionSummary),
        (status = 403, description = "Connection belongs to another user", body = ApiError),
        (status = 404, description = "Connection not found", body = ApiError),
        (status = 409, description = "Connection already revoked", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn revoke_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let summary = state
        .connections
        .revoke_connection(id, user.0, EventSource::Ui)
        .await?;
    Ok(Json(summary))
}

/// Provider-side revocation notification
///
/// Revokes every credential-holding connection bound to the external account.
#[utoipa::path(
    post,
    path = "/platforms/{platform}/revocations",
    security(("bearer_auth" = [])),
    params(("platform" = String, Path, description = "Platform identifier"), UserHeader),
    request_body = ProviderRevocation,
    responses(
        (status = 200, description = "Notification applied", body = ProviderRevocationResponse),
        (status = 400, description = "Invalid body", body = ApiError),
        (status = 404, description = "Unknown platform", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn provider_revocation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(platform): Path<String>,
    payload: Result<Json<ProviderRevocation>, JsonRejection>,
) -> Result<Json<ProviderRevocationResponse>, ApiError> {
    let platform = parse_platform(&platform)?;
    let Json(notification) = payload?;
    let external_account_id = notification.external_account_id.trim();
    if external_account_id.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "external_account_id must not be empty",
        ));
    }

    let revoked_connection_ids = state
        .connections
        .handle_provider_revocation(platform, external_account_id)
        .await?;
    Ok(Json(ProviderRevocationResponse {
        revoked_connection_ids,
    }))
}
