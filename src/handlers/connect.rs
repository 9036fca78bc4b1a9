//! # OAuth Handlers
//!
//! Starts provider authorization and receives the provider callback. The callback is the
//! only unauthenticated mutating endpoint: it is authorized by the single-use state alone.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, UserExtension, UserHeader};
use crate::connection_manager::{CallbackOutcome, InitiatedOAuth};
use crate::error::{ApiError, CoreError};
use crate::handlers::types::parse_platform;
use crate::server::AppState;

const DEFAULT_RETURN_PATH: &str = "/connections";
const MAX_REDIRECT_HINT_LEN: usize = 512;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// Project the connection will belong to
    pub project_id: Uuid,
    /// Frontend path to return to after the callback, e.g. `/projects/42/accounts`
    #[serde(default)]
    pub redirect_hint: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user declined
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackResponse {
    pub status: String,
    #[serde(flatten)]
    pub outcome: CallbackOutcome,
}

/// Only same-origin relative paths are accepted as return targets
fn validate_redirect_hint(hint: Option<String>) -> Result<Option<String>, ApiError> {
    let Some(hint) = hint.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()) else {
        return Ok(None);
    };
    let relative = hint.starts_with('/') && !hint.starts_with("//") && !hint.contains('\\');
    if !relative || hint.len() > MAX_REDIRECT_HINT_LEN {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "redirect_hint must be a relative path starting with '/'",
        ));
    }
    Ok(Some(hint))
}

/// Start an OAuth flow for a platform
///
/// Reserves a pending connection and returns the provider authorization URL.
#[utoipa::path(
    post,
    path = "/connect/{platform}",
    security(("bearer_auth" = [])),
    params(
        ("platform" = String, Path, description = "Platform identifier: google, tiktok or snapchat"),
        UserHeader
    ),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Authorization URL generated", body = InitiatedOAuth),
        (status = 400, description = "Invalid request or platform not configured", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 403, description = "Project belongs to another user", body = ApiError),
        (status = 404, description = "Unknown platform or project", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn start_oauth(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    UserExtension(user): UserExtension,
    Path(platform): Path<String>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<InitiatedOAuth>, ApiError> {
    let platform = parse_platform(&platform)?;
    let Json(request) = payload?;
    let redirect_hint = validate_redirect_hint(request.redirect_hint)?;

    let initiated = state
        .connections
        .initiate_oauth(user.0, platform, request.project_id, redirect_hint)
        .await?;

    tracing::info!(
        user_id = %user.0,
        platform = %platform,
        connection_id = %initiated.connection_id,
        "OAuth flow initiated"
    );
    Ok(Json(initiated))
}

/// OAuth provider callback
///
/// Redirects the browser to the configured frontend with the outcome in the query string,
/// or answers with JSON when no frontend is configured.
#[utoipa::path(
    get,
    path = "/connect/{platform}/callback",
    params(
        ("platform" = String, Path, description = "Platform identifier"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Accounts connected", body = CallbackResponse),
        (status = 303, description = "Redirect to the frontend with the outcome"),
        (status = 400, description = "Invalid or expired state", body = ApiError),
        (status = 422, description = "Authorization grants no ad accounts", body = ApiError),
        (status = 502, description = "Token exchange with the provider failed", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let platform = parse_platform(&platform)?;
    let frontend = state.config.oauth.frontend_base_url.clone();

    if let Some(error) = query.error {
        tracing::info!(platform = %platform, error = %error, "Provider reported a declined authorization");
        return Ok(match frontend {
            Some(base) => redirect(&base, None, &[("status", "error"), ("code", "ACCESS_DENIED")])?,
            None => ApiError::new(
                StatusCode::BAD_REQUEST,
                "ACCESS_DENIED",
                "The authorization request was declined",
            )
            .into_response(),
        });
    }

    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(CoreError::InvalidState {
            reason: "callback without code or state".to_string(),
        }
        .into());
    };

    let result = state
        .connections
        .handle_callback(platform, &code, &oauth_state)
        .await;

    match (frontend, result) {
        (None, Ok(outcome)) => Ok(Json(CallbackResponse {
            status: "connected".to_string(),
            outcome,
        })
        .into_response()),
        (None, Err(error)) => Err(error.into()),
        (Some(base), Ok(outcome)) => {
            let connection_id = outcome.connection_id.to_string();
            let project_id = outcome.project_id.to_string();
            redirect(
                &base,
                outcome.redirect_hint.as_deref(),
                &[
                    ("status", "success"),
                    ("platform", platform.as_str()),
                    ("connection_id", &connection_id),
                    ("project_id", &project_id),
                ],
            )
        }
        (Some(base), Err(error)) => {
            let api_error = ApiError::from(error);
            redirect(&base, None, &[("status", "error"), ("code", api_error.code.as_ref())])
        }
    }
}

fn redirect(base: &str, path: Option<&str>, params: &[(&str, &str)]) -> Result<Response, ApiError> {
    let invalid = |_: url::ParseError| {
        ApiError::from(CoreError::Configuration(
            "frontend base URL is not a valid URL".to_string(),
        ))
    };
    let mut target = Url::parse(base)
        .map_err(invalid)?
        .join(path.unwrap_or(DEFAULT_RETURN_PATH))
        .map_err(invalid)?;
    target.query_pairs_mut().extend_pairs(params);

    Ok(Redirect::to(target.as_str()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_hints_must_be_relative() {
        assert_eq!(validate_redirect_hint(None).unwrap(), None);
        assert_eq!(
            validate_redirect_hint(Some("/projects/1".into())).unwrap(),
            Some("/projects/1".to_string())
        );
        assert!(validate_redirect_hint(Some("https://evil.example".into())).is_err());
        assert!(validate_redirect_hint(Some("//evil.example".into())).is_err());
        assert!(validate_redirect_hint(Some("/\\evil.example".into())).is_err());
    }

    #[test]
    fn redirect_carries_outcome_in_query() {
        let response = redirect(
            "https://app.example.com",
            Some("/projects/7"),
            &[("status", "success"), ("platform", "google")],
        )
        .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()["location"],
            "https://app.example.com/projects/7?status=success&platform=google"
        );
    }
}
