//! Platform adapter trait definition
//!
//! Defines the uniform OAuth contract every ad platform adapter implements.
//! Adapters are stateless translators: credentials come in as parameters and
//! nothing is stored between calls.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::models::Platform;
use crate::models::connection::{Permission, PermissionSet};

/// Token material returned by a provider.
///
/// Debug output is redacted and the secrets are wiped when the value drops.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Builds a token set from an `expires_in` seconds hint
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.filter(|token| !token.is_empty()),
            expires_at: expires_in
                .filter(|seconds| *seconds > 0)
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
            scopes,
        }
    }

    /// Providers that do not rotate refresh tokens omit them on refresh; keep the prior one.
    pub fn inherit_refresh_token(&mut self, previous: &TokenSet) {
        if self.refresh_token.is_none() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.scopes.is_empty() {
            self.scopes = previous.scopes.clone();
        }
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Upstream rejection of an exchange, refresh, revoke or account lookup
#[derive(Debug, Clone, Error)]
#[error("{platform} provider error: {provider_message}")]
pub struct ProviderAuthError {
    pub platform: Platform,
    pub provider_message: String,
    /// HTTP status when the provider answered at all
    pub status: Option<u16>,
}

impl ProviderAuthError {
    pub fn new(platform: Platform, provider_message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            platform,
            provider_message: provider_message.into(),
            status,
        }
    }
}

/// One advertising account reachable with a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdAccount {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Authorization URL embedding the CSRF state and requested scopes.
    fn authorization_url(&self, state: &str) -> Result<Url, ProviderAuthError>;

    /// Exchange a single-use authorization code.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderAuthError>;

    /// Obtain a fresh token set from a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderAuthError>;

    /// Revoke a token upstream. Callers treat failures as best-effort.
    async fn revoke(&self, token: &str) -> Result<(), ProviderAuthError>;

    /// Ad accounts accessible with the given access token.
    async fn list_ad_accounts(&self, access_token: &str)
    -> Result<Vec<AdAccount>, ProviderAuthError>;

    /// Account-level permissions implied by the granted scopes.
    ///
    /// Every grant can read; launching is withheld when every scope is read-only.
    fn derive_permissions(&self, scopes: &[String]) -> PermissionSet {
        let read_only = !scopes.is_empty()
            && scopes.iter().all(|scope| {
                let scope = scope.to_ascii_lowercase();
                scope.contains("readonly") || scope.contains("read_only")
            });

        if read_only {
            PermissionSet::new([Permission::Read])
        } else {
            PermissionSet::new([Permission::Read, Permission::Launch])
        }
    }
}
