//! # API Handlers
//!
//! HTTP endpoints. Handlers translate requests into service calls and
//! [`crate::error::CoreError`] into [`crate::error::ApiError`]; no lifecycle rule lives here.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::models::domain_event::EventSource;
use crate::server::AppState;

pub mod assets;
pub mod connect;
pub mod connections;
pub mod events;
pub mod projects;
pub mod rules;
pub mod types;


/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// Database health probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are healthy", body = HealthResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "Health check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database service unavailable",
        )
    })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        database: "ok".to_string(),
    }))
}

/// Originator recorded on the events of a caller-initiated transition
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ActorQuery {
    /// `UI` (default), `AI` or `AUTOMATION`
    pub source: Option<EventSource>,
}

impl ActorQuery {
    pub fn source(&self) -> Result<EventSource, ApiError> {
        match self.source.unwrap_or(EventSource::Ui) {
            EventSource::System => Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                "source SYSTEM is reserved for the service itself",
            )),
            other => Ok(other),
        }
    }
}
