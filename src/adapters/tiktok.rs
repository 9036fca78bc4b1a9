//! TikTok for Business adapter
//!
//! TikTok's Marketing API wraps every response in a `{code, message, data}`
//! envelope; a non-zero `code` is a failure even when the HTTP status is 200.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::http::{base_url, build_client, read_json, transport_error};
use super::trait_::{AdAccount, PlatformAdapter, ProviderAuthError, TokenSet};
use crate::config::{OAuthConfig, PlatformConfig};
use crate::models::Platform;

pub const DEFAULT_AUTH_BASE: &str = "https://business-api.tiktok.com";
pub const DEFAULT_API_BASE: &str = "https://business-api.tiktok.com";
const API_PREFIX: &str = "/open_api/v1.3";

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct TokenData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token_expire_in: Option<i64>,
    #[serde(default)]
    scope: Vec<serde_json::Value>,
}

impl TokenData {
    fn into_token_set(self) -> TokenSet {
        let scopes = self
            .scope
            .into_iter()
            .map(|scope| match scope {
                serde_json::Value::String(value) => value,
                other => other.to_string(),
            })
            .collect();
        TokenSet::new(
            self.access_token,
            self.refresh_token,
            self.access_token_expire_in,
            scopes,
        )
    }
}

#[derive(Deserialize)]
struct AdvertiserList {
    #[serde(default)]
    list: Vec<Advertiser>,
}

#[derive(Deserialize)]
struct Advertiser {
    advertiser_id: String,
    #[serde(default)]
    advertiser_name: Option<String>,
}

/// TikTok Marketing API OAuth adapter
pub struct TiktokAdapter {
    client: reqwest::Client,
    app_id: String,
    secret: String,
    redirect_uri: String,
    auth_base: String,
    token_base: String,
    api_base: String,
}

impl TiktokAdapter {
    pub fn new(platform: &PlatformConfig, oauth: &OAuthConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(oauth.provider_timeout())?,
            app_id: platform.client_id.clone().unwrap_or_default(),
            secret: platform.client_secret.clone().unwrap_or_default(),
            redirect_uri: platform.redirect_uri.clone().unwrap_or_default(),
            auth_base: base_url(&platform.auth_base, DEFAULT_AUTH_BASE),
            token_base: base_url(&platform.token_base, DEFAULT_API_BASE),
            api_base: base_url(&platform.api_base, DEFAULT_API_BASE),
        })
    }

    async fn post_oauth<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<Envelope<T>, ProviderAuthError> {
        let response = self
            .client
            .post(format!("{}{}/oauth2/{}/", self.token_base, API_PREFIX, endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Tiktok, e))?;

        read_json(Platform::Tiktok, response).await
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, ProviderAuthError> {
    if envelope.code != 0 {
        return Err(ProviderAuthError::new(
            Platform::Tiktok,
            format!("code {}: {}", envelope.code, envelope.message),
            Some(200),
        ));
    }
    envelope.data.ok_or_else(|| {
        ProviderAuthError::new(Platform::Tiktok, "response is missing data", Some(200))
    })
}

#[async_trait]
impl PlatformAdapter for TiktokAdapter {
    fn platform(&self) -> Platform {
        Platform::Tiktok
    }

    fn authorization_url(&self, state: &str) -> Result<Url, ProviderAuthError> {
        let mut url = Url::parse(&format!("{}/portal/auth", self.auth_base))
            .map_err(|e| ProviderAuthError::new(Platform::Tiktok, e.to_string(), None))?;
        url.query_pairs_mut()
            .append_pair("app_id", &self.app_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderAuthError> {
        let envelope: Envelope<TokenData> = self
            .post_oauth(
                "access_token",
                json!({ "app_id": self.app_id, "secret": self.secret, "auth_code": code }),
            )
            .await?;
        Ok(unwrap_envelope(envelope)?.into_token_set())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderAuthError> {
        let envelope: Envelope<TokenData> = self
            .post_oauth(
                "refresh_token",
                json!({
                    "app_id": self.app_id,
                    "secret": self.secret,
                    "refresh_token": refresh_token,
                }),
            )
            .await?;
        Ok(unwrap_envelope(envelope)?.into_token_set())
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderAuthError> {
        let envelope: Envelope<serde_json::Value> = self
            .post_oauth(
                "revoke_token",
                json!({ "app_id": self.app_id, "secret": self.secret, "access_token": token }),
            )
            .await?;
        // Revocation answers with an empty data object, only the code matters
        if envelope.code != 0 {
            return Err(ProviderAuthError::new(
                Platform::Tiktok,
                format!("code {}: {}", envelope.code, envelope.message),
                Some(200),
            ));
        }
        Ok(())
    }

    async fn list_ad_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AdAccount>, ProviderAuthError> {
        let response = self
            .client
            .get(format!("{}{}/oauth2/advertiser/get/", self.api_base, API_PREFIX))
            .query(&[("app_id", &self.app_id), ("secret", &self.secret)])
            .header("Access-Token", access_token)
            .send()
            .await
            .map_err(|e| transport_error(Platform::Tiktok, e))?;

        let data: AdvertiserList = unwrap_envelope(read_json(Platform::Tiktok, response).await?)?;

        Ok(data
            .list
            .into_iter()
            .map(|advertiser| AdAccount {
                name: advertiser
                    .advertiser_name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("TikTok advertiser {}", advertiser.advertiser_id)),
                id: advertiser.advertiser_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_code_is_an_error_despite_http_200() {
        let envelope: Envelope<TokenData> = serde_json::from_value(json!({
            "code": 40001,
            "message": "auth_code is expired",
            "data": null
        }))
        .unwrap();

        let error = unwrap_envelope(envelope).err().unwrap();
        assert_eq!(error.platform, Platform::Tiktok);
        assert!(error.provider_message.contains("auth_code is expired"));
    }

    #[test]
    fn numeric_scopes_are_kept_as_strings() {
        let data: TokenData = serde_json::from_value(json!({
            "access_token": "tk-access",
            "scope": [4, "ad.read"]
        }))
        .unwrap();

        let tokens = data.into_token_set();
        assert_eq!(tokens.scopes, vec!["4".to_string(), "ad.read".to_string()]);
        assert!(tokens.expires_at.is_none());
    }
}
