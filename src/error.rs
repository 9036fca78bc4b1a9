//! # Error Handling
//!
//! Two layers live here. [`CoreError`] is the transport-agnostic taxonomy returned by the
//! connection, readiness and automation services; each variant has a stable machine-readable
//! [`CoreError::kind`]. [`ApiError`] is the problem+json body the HTTP boundary renders, with
//! trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::adapters::ProviderAuthError;
use crate::crypto::VaultError;
use crate::models::Platform;
use crate::telemetry;

/// Core error taxonomy shared by every service
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential decryption failed: {0}")]
    Decryption(String),

    #[error(transparent)]
    ProviderAuth(#[from] ProviderAuthError),

    /// CSRF state missing, expired, replayed or bound to another platform
    #[error("invalid or expired OAuth state")]
    InvalidState { reason: String },

    #[error("no ad accounts are accessible for this {platform} authorization")]
    NoAdAccounts { platform: Platform },

    #[error("token exchange with {platform} failed: {provider_message}")]
    TokenExchangeFailed {
        platform: Platform,
        provider_message: String,
    },

    #[error("action '{attempted_action}' is not permitted in state {current_state}")]
    InvalidTransition {
        entity: &'static str,
        current_state: String,
        attempted_action: String,
        allowed_actions: Vec<String>,
    },

    #[error("guard '{guard_name}' blocked the transition: {reason}")]
    GuardBlocked {
        guard_name: &'static str,
        reason: String,
        current_state: String,
        allowed_actions: Vec<String>,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// Lost an optimistic version check against a concurrent writer
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl CoreError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Configuration(_) => "CONFIGURATION_ERROR",
            CoreError::Decryption(_) => "DECRYPTION_ERROR",
            CoreError::ProviderAuth(_) => "PROVIDER_AUTH_ERROR",
            CoreError::InvalidState { .. } => "INVALID_STATE",
            CoreError::NoAdAccounts { .. } => "NO_AD_ACCOUNTS",
            CoreError::TokenExchangeFailed { .. } => "TOKEN_EXCHANGE_FAILED",
            CoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            CoreError::GuardBlocked { .. } => "GUARD_BLOCKED",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Conflict { .. } => "CONFLICT",
            CoreError::Validation(_) => "VALIDATION_FAILED",
            CoreError::Database(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Configuration(_) | CoreError::Decryption(_) | CoreError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CoreError::ProviderAuth(_) | CoreError::TokenExchangeFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CoreError::InvalidState { .. } | CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NoAdAccounts { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::InvalidTransition { .. }
            | CoreError::GuardBlocked { .. }
            | CoreError::Conflict { .. } => StatusCode::CONFLICT,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        }
    }

    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        CoreError::NotFound { entity, id }
    }

    /// Maps a failed write; a unique-constraint violation means a concurrent writer won
    pub fn from_write(error: sea_orm::DbErr, entity: &'static str, id: Uuid) -> Self {
        match error.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                CoreError::Conflict { entity, id }
            }
            _ => CoreError::Database(error),
        }
    }
}

impl From<VaultError> for CoreError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::MissingSecret | VaultError::InvalidKey(_) => {
                CoreError::Configuration(error.to_string())
            }
            other => CoreError::Decryption(other.to_string()),
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Current task trace ID, or a generated correlation ID outside a request
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        let status = error.status_code();
        let code = error.kind();

        match &error {
            CoreError::InvalidTransition {
                entity,
                current_state,
                attempted_action,
                allowed_actions,
            } => ApiError::new(status, code, error.to_string()).with_details(json!({
                "entity": entity,
                "current_state": current_state,
                "attempted_action": attempted_action,
                "allowed_actions": allowed_actions,
            })),
            CoreError::GuardBlocked {
                guard_name,
                reason,
                current_state,
                allowed_actions,
            } => ApiError::new(status, code, error.to_string()).with_details(json!({
                "guard_name": guard_name,
                "reason": reason,
                "current_state": current_state,
                "allowed_actions": allowed_actions,
            })),
            CoreError::InvalidState { reason } => {
                // The caller only learns that the state was rejected
                tracing::warn!(target: "security", reason = %reason, "Rejected OAuth callback state");
                ApiError::new(status, code, "Invalid or expired OAuth state")
            }
            CoreError::ProviderAuth(provider_error) => {
                ApiError::new(status, code, error.to_string()).with_details(json!({
                    "platform": provider_error.platform,
                    "provider_status": provider_error.status,
                }))
            }
            CoreError::TokenExchangeFailed { platform, .. } => {
                ApiError::new(status, code, error.to_string())
                    .with_details(json!({ "platform": platform }))
            }
            CoreError::NoAdAccounts { platform } => ApiError::new(status, code, error.to_string())
                .with_details(json!({ "platform": platform })),
            CoreError::Configuration(_) | CoreError::Decryption(_) | CoreError::Database(_) => {
                tracing::error!(error = %error, kind = code, "Internal failure while serving request");
                ApiError::new(status, code, "An internal error occurred")
            }
            CoreError::Forbidden(_)
            | CoreError::NotFound { .. }
            | CoreError::Conflict { .. }
            | CoreError::Validation(_) => ApiError::new(status, code, error.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
