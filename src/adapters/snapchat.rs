//! Snapchat Marketing API adapter

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::http::{StandardTokenResponse, base_url, build_client, read_json, transport_error};
use super::trait_::{AdAccount, PlatformAdapter, ProviderAuthError, TokenSet};
use crate::config::{OAuthConfig, PlatformConfig};
use crate::models::Platform;

pub const DEFAULT_AUTH_BASE: &str = "https://accounts.snapchat.com";
pub const DEFAULT_API_BASE: &str = "https://adsapi.snapchat.com";
pub const MARKETING_SCOPE: &str = "snapchat-marketing-api";

#[derive(Deserialize)]
struct OrganizationsResponse {
    #[serde(default)]
    organizations: Vec<OrganizationEntry>,
}

#[derive(Deserialize)]
struct OrganizationEntry {
    organization: Organization,
}

#[derive(Deserialize)]
struct Organization {
    #[serde(default)]
    ad_accounts: Vec<SnapAdAccount>,
}

#[derive(Deserialize)]
struct SnapAdAccount {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Snapchat Marketing API OAuth adapter
pub struct SnapchatAdapter {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_base: String,
    token_base: String,
    api_base: String,
}

impl SnapchatAdapter {
    pub fn new(platform: &PlatformConfig, oauth: &OAuthConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(oauth.provider_timeout())?,
            client_id: platform.client_id.clone().unwrap_or_default(),
            client_secret: platform.client_secret.clone().unwrap_or_default(),
            redirect_uri: platform.redirect_uri.clone().unwrap_or_default(),
            auth_base: base_url(&platform.auth_base, DEFAULT_AUTH_BASE),
            token_base: base_url(&platform.token_base, DEFAULT_AUTH_BASE),
            api_base: base_url(&platform.api_base, DEFAULT_API_BASE),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderAuthError> {
        let response = self
            .client
            .post(format!("{}/login/oauth2/access_token", self.token_base))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Snapchat, e))?;

        let body: StandardTokenResponse = read_json(Platform::Snapchat, response).await?;
        Ok(body.into_token_set(&[MARKETING_SCOPE]))
    }
}

#[async_trait]
impl PlatformAdapter for SnapchatAdapter {
    fn platform(&self) -> Platform {
        Platform::Snapchat
    }

    fn authorization_url(&self, state: &str) -> Result<Url, ProviderAuthError> {
        let mut url = Url::parse(&format!("{}/login/oauth2/authorize", self.auth_base))
            .map_err(|e| ProviderAuthError::new(Platform::Snapchat, e.to_string(), None))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", MARKETING_SCOPE)
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

    async fn revoke(&self, _token: &str) -> Result<(), ProviderAuthError> {
        // No public revocation endpoint; the grant lapses once its refresh token is discarded
        tracing::debug!(platform = "snapchat", "Provider-side revoke not supported, skipping");
        Ok(())
    }

    async fn list_ad_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AdAccount>, ProviderAuthError> {
        let response = self
            .client
            .get(format!("{}/v1/me/organizations", self.api_base))
            .query(&[("with_ad_accounts", "true")])
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Snapchat, e))?;

        let body: OrganizationsResponse = read_json(Platform::Snapchat, response).await?;

        Ok(body
            .organizations
            .into_iter()
            .flat_map(|entry| entry.organization.ad_accounts)
            .filter(|account| {
                account
                    .status
                    .as_deref()
                    .is_none_or(|status| status.eq_ignore_ascii_case("ACTIVE"))
            })
            .map(|account| AdAccount {
                name: account
                    .name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("Snapchat ad account {}", account.id)),
                id: account.id,
            })
            .collect())
    }
}
