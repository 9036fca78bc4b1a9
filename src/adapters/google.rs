//! Google Ads adapter
//!
//! Standard Google OAuth 2.0 web-server flow with offline access, and the
//! Google Ads `listAccessibleCustomers` endpoint for account discovery.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::http::{StandardTokenResponse, base_url, build_client, read_json, transport_error};
use super::trait_::{AdAccount, PlatformAdapter, ProviderAuthError, TokenSet};
use crate::config::{OAuthConfig, PlatformConfig};
use crate::models::Platform;

pub const DEFAULT_AUTH_BASE: &str = "https://accounts.google.com";
pub const DEFAULT_TOKEN_BASE: &str = "https://oauth2.googleapis.com";
pub const DEFAULT_API_BASE: &str = "https://googleads.googleapis.com";
pub const ADWORDS_SCOPE: &str = "https://www.googleapis.com/auth/adwords";
const ADS_API_VERSION: &str = "v17";

#[derive(Deserialize)]
struct AccessibleCustomers {
    #[serde(rename = "resourceNames", default)]
    resource_names: Vec<String>,
}

/// Google Ads OAuth adapter
pub struct GoogleAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    developer_token: Option<String>,
    auth_base: String,
    token_base: String,
    api_base: String,
}

impl GoogleAdapter {
    pub fn new(
        platform: &PlatformConfig,
        oauth: &OAuthConfig,
        developer_token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(oauth.provider_timeout())?,
            client_id: platform.client_id.clone().unwrap_or_default(),
            client_secret: platform.client_secret.clone().unwrap_or_default(),
            redirect_uri: platform.redirect_uri.clone().unwrap_or_default(),
            developer_token,
            auth_base: base_url(&platform.auth_base, DEFAULT_AUTH_BASE),
            token_base: base_url(&platform.token_base, DEFAULT_TOKEN_BASE),
            api_base: base_url(&platform.api_base, DEFAULT_API_BASE),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderAuthError> {
        let response = self
            .client
            .post(format!("{}/token", self.token_base))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Google, e))?;

        let body: StandardTokenResponse = read_json(Platform::Google, response).await?;
        Ok(body.into_token_set(&[ADWORDS_SCOPE]))
    }
}

#[async_trait]
impl PlatformAdapter for GoogleAdapter {
    fn platform(&self) -> Platform {
        Platform::Google
    }

    fn authorization_url(&self, state: &str) -> Result<Url, ProviderAuthError> {
        let mut url = Url::parse(&format!("{}/o/oauth2/v2/auth", self.auth_base))
            .map_err(|e| ProviderAuthError::new(Platform::Google, e.to_string(), None))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", ADWORDS_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("include_granted_scopes", "true")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderAuthError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderAuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderAuthError> {
        let response = self
            .client
            .post(format!("{}/revoke", self.token_base))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| transport_error(Platform::Google, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderAuthError::new(
                Platform::Google,
                format!("revoke returned HTTP {}", status.as_u16()),
                Some(status.as_u16()),
            ))
        }
    }

    async fn list_ad_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AdAccount>, ProviderAuthError> {
        let mut request = self
            .client
            .get(format!(
                "{}/{}/customers:listAccessibleCustomers",
                self.api_base, ADS_API_VERSION
            ))
            .bearer_auth(access_token);
        if let Some(developer_token) = &self.developer_token {
            request = request.header("developer-token", developer_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(Platform::Google, e))?;
        let body: AccessibleCustomers = read_json(Platform::Google, response).await?;

        Ok(body
            .resource_names
            .into_iter()
            .filter_map(|resource| {
                resource
                    .strip_prefix("customers/")
                    .map(|id| AdAccount {
                        id: id.to_string(),
                        name: format!("Google Ads customer {}", id),
                    })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::connection::Permission;

    fn adapter() -> GoogleAdapter {
        GoogleAdapter::new(
            &PlatformConfig {
                client_id: Some("google-client".to_string()),
                client_secret: Some("google-secret".to_string()),
                redirect_uri: Some("https://app.example.com/connect/google/callback".to_string()),
                ..Default::default()
            },
            &OAuthConfig::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn authorization_url_requests_offline_adwords_access() {
        let url = adapter().authorization_url("state-123").unwrap();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(url.path(), "/o/oauth2/v2/auth");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("state").map(String::as_str), Some("state-123"));
        assert_eq!(pairs.get("scope").map(String::as_str), Some(ADWORDS_SCOPE));
        assert_eq!(pairs.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("google-client"));
    }

    #[test]
    fn adwords_scope_grants_launch() {
        let permissions = adapter().derive_permissions(&[ADWORDS_SCOPE.to_string()]);
        assert!(permissions.contains(Permission::Launch));
    }
}
