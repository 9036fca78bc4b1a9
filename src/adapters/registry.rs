//! Adapter registry
//!
//! Maps each configured platform to its adapter. Built once at startup and
//! shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::google::GoogleAdapter;
use super::snapchat::SnapchatAdapter;
use super::tiktok::TiktokAdapter;
use super::trait_::PlatformAdapter;
use crate::config::AppConfig;
use crate::models::Platform;

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("platform '{platform}' is not configured")]
    PlatformNotConfigured { platform: Platform },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Platform registry that stores adapters
#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every platform that has client credentials configured
    pub fn from_config(config: &AppConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for platform in Platform::ALL {
            let platform_config = config.platform(platform);
            if !platform_config.is_configured() {
                warn!(platform = %platform, "Platform not registered: missing client credentials");
                continue;
            }

            let adapter: Arc<dyn PlatformAdapter> = match platform {
                Platform::Google => Arc::new(GoogleAdapter::new(
                    platform_config,
                    &config.oauth,
                    config.google_developer_token.clone(),
                )?),
                Platform::Tiktok => Arc::new(TiktokAdapter::new(platform_config, &config.oauth)?),
                Platform::Snapchat => {
                    Arc::new(SnapchatAdapter::new(platform_config, &config.oauth)?)
                }
            };
            registry.register(adapter);
            info!(platform = %platform, "Registered platform adapter");
        }

        Ok(registry)
    }

    /// Register an adapter, replacing any previous one for its platform
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, RegistryError> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or(RegistryError::PlatformNotConfigured { platform })
    }

    /// Registered platforms in a stable order
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}
