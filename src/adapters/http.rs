//! Shared HTTP plumbing for platform adapters

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::trait_::{ProviderAuthError, TokenSet};
use crate::models::Platform;

/// Longest slice of a provider error body carried into an error message
const MAX_ERROR_BODY: usize = 512;

/// Build a client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("launchgate/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Configured base URL or the platform default, without a trailing slash
pub fn base_url(configured: &Option<String>, default: &str) -> String {
    configured
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Map a transport failure; a timeout is a provider failure like any other
pub fn transport_error(platform: Platform, error: reqwest::Error) -> ProviderAuthError {
    let status = error.status().map(|s| s.as_u16());
    let message = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "could not connect to provider".to_string()
    } else {
        format!("transport error: {}", error.without_url())
    };
    ProviderAuthError::new(platform, message, status)
}

/// Read a JSON body, turning non-2xx statuses and malformed bodies into provider errors
pub async fn read_json<T: DeserializeOwned>(
    platform: Platform,
    response: reqwest::Response,
) -> Result<T, ProviderAuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderAuthError::new(
            platform,
            format!("HTTP {}: {}", status.as_u16(), truncate(&body)),
            Some(status.as_u16()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(platform, e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ProviderAuthError::new(
            platform,
            format!("malformed response body: {}", e),
            Some(status.as_u16()),
        )
    })
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

/// RFC 6749 token endpoint response
#[derive(Deserialize)]
pub struct StandardTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl StandardTokenResponse {
    /// Scopes are space separated; an omitted scope means the requested ones were granted
    pub fn into_token_set(self, requested_scopes: &[&str]) -> TokenSet {
        let scopes = match self.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_string).collect()
            }
            _ => requested_scopes.iter().map(|s| s.to_string()).collect(),
        };
        TokenSet::new(self.access_token, self.refresh_token, self.expires_in, scopes)
    }
}
