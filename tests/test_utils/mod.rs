//! Shared fixtures for integration tests.
//!
//! In-memory SQLite with every migration applied, a scriptable platform adapter and
//! helpers that drive entities into the states a test needs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use launchgate::adapters::{AdAccount, PlatformAdapter, ProviderAuthError, Registry, TokenSet};
use launchgate::asset_state::{AnalysisResult, AnalysisVerdict, NewAsset};
use launchgate::config::AppConfig;
use launchgate::crypto::TokenVault;
use launchgate::models::Platform;
use launchgate::models::asset::{self, AssetKind};
use launchgate::models::domain_event::{self, EventSource};
use launchgate::models::project;
use launchgate::repositories::{DomainEventRepository, EventFilter};
use launchgate::server::AppState;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio::sync::Notify;
use url::Url;
use uuid::Uuid;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Raw key bytes in hex, so fixtures skip key stretching
pub const VAULT_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Sets up an in-memory SQLite database with all migrations applied and foreign keys
/// enforced, so cascades behave as they do on Postgres.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;
    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Configuration that passes validation without touching the environment
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        vault_secret: Some(VAULT_KEY_HEX.to_string()),
        ..Default::default()
    };
    config.token_refresh.jitter_factor = 0.0;
    config
}

/// What the scripted provider answers
#[derive(Debug, Clone)]
pub struct ProviderScript {
    pub accounts: Vec<AdAccount>,
    pub scopes: Vec<String>,
    pub issue_refresh_token: bool,
    pub expires_in: Option<i64>,
    pub fail_exchange: bool,
    pub fail_refresh: bool,
    pub fail_revoke: bool,
    /// How long each refresh takes upstream
    pub refresh_delay: Option<Duration>,
    /// Park refreshes until the test calls `release_refresh`
    pub hold_refresh: bool,
}

impl Default for ProviderScript {
    fn default() -> Self {
        Self {
            accounts: vec![AdAccount {
                id: "acct-1".to_string(),
                name: "Primary account".to_string(),
            }],
            scopes: vec!["ads.manage".to_string()],
            issue_refresh_token: true,
            expires_in: Some(3600),
            fail_exchange: false,
            fail_refresh: false,
            fail_revoke: false,
            refresh_delay: None,
            hold_refresh: false,
        }
    }
}

/// Platform adapter whose answers are set by the test
pub struct ScriptedAdapter {
    platform: Platform,
    script: Mutex<ProviderScript>,
    calls: Mutex<Vec<String>>,
    refreshes_in_flight: AtomicUsize,
    max_refreshes_in_flight: AtomicUsize,
    refresh_entered: Notify,
    refresh_released: Notify,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            script: Mutex::new(ProviderScript::default()),
            calls: Mutex::new(Vec::new()),
            refreshes_in_flight: AtomicUsize::new(0),
            max_refreshes_in_flight: AtomicUsize::new(0),
            refresh_entered: Notify::new(),
            refresh_released: Notify::new(),
        })
    }

    /// Most refreshes the provider ever saw at the same time
    pub fn max_concurrent_refreshes(&self) -> usize {
        self.max_refreshes_in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once a held refresh has reached the provider
    pub async fn refresh_started(&self) {
        self.refresh_entered.notified().await;
    }

    pub fn release_refresh(&self) {
        self.refresh_released.notify_one();
    }

    pub fn update(&self, change: impl FnOnce(&mut ProviderScript)) {
        change(&mut self.script.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn script(&self) -> ProviderScript {
        self.script.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn issue(&self, script: &ProviderScript, access_token: String) -> TokenSet {
        let refresh_token = script
            .issue_refresh_token
            .then(|| format!("refresh-{}", Uuid::new_v4()));
        TokenSet::new(
            access_token,
            refresh_token,
            script.expires_in,
            script.scopes.clone(),
        )
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn authorization_url(&self, state: &str) -> Result<Url, ProviderAuthError> {
        let mut url = Url::parse("https://provider.test/authorize")
            .map_err(|e| ProviderAuthError::new(self.platform, e.to_string(), None))?;
        url.query_pairs_mut().append_pair("state", state);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderAuthError> {
        self.log(format!("exchange:{code}"));
        let script = self.script();
        if script.fail_exchange {
            return Err(ProviderAuthError::new(
                self.platform,
                "invalid_grant",
                Some(400),
            ));
        }
        Ok(self.issue(&script, format!("access-{code}")))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderAuthError> {
        self.log(format!("refresh:{refresh_token}"));
        let script = self.script();

        let running = self.refreshes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_refreshes_in_flight
            .fetch_max(running, Ordering::SeqCst);
        if script.hold_refresh {
            self.refresh_entered.notify_one();
            self.refresh_released.notified().await;
        }
        if let Some(delay) = script.refresh_delay {
            tokio::time::sleep(delay).await;
        }
        self.refreshes_in_flight.fetch_sub(1, Ordering::SeqCst);

        if script.fail_refresh {
            return Err(ProviderAuthError::new(
                self.platform,
                "refresh token revoked",
                Some(400),
            ));
        }
        Ok(self.issue(&script, format!("access-{}", Uuid::new_v4())))
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderAuthError> {
        self.log(format!("revoke:{token}"));
        if self.script().fail_revoke {
            return Err(ProviderAuthError::new(self.platform, "upstream down", Some(503)));
        }
        Ok(())
    }

    async fn list_ad_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<AdAccount>, ProviderAuthError> {
        self.log(format!("accounts:{access_token}"));
        Ok(self.script().accounts)
    }
}

/// Full application state over a fresh database with one scripted adapter per platform
pub struct TestHarness {
    pub state: AppState,
    pub google: Arc<ScriptedAdapter>,
    pub tiktok: Arc<ScriptedAdapter>,
    pub snapchat: Arc<ScriptedAdapter>,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let db = setup_test_db().await?;
        let vault = TokenVault::from_secret(config.vault_secret.as_deref())?;

        let google = ScriptedAdapter::new(Platform::Google);
        let tiktok = ScriptedAdapter::new(Platform::Tiktok);
        let snapchat = ScriptedAdapter::new(Platform::Snapchat);
        let mut registry = Registry::new();
        registry.register(google.clone());
        registry.register(tiktok.clone());
        registry.register(snapchat.clone());

        Ok(Self {
            state: AppState::new(config, db, vault, registry),
            google,
            tiktok,
            snapchat,
        })
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.state.db.as_ref()
    }

    pub async fn project(&self, owner: Uuid) -> Result<project::Model> {
        Ok(self
            .state
            .projects
            .create_project(owner, "Spring launch")
            .await?)
    }

    /// Runs initiate + callback and returns the first connection id
    pub async fn connect(&self, owner: Uuid, project_id: Uuid, platform: Platform) -> Result<Uuid> {
        let initiated = self
            .state
            .connections
            .initiate_oauth(owner, platform, project_id, None)
            .await?;
        let outcome = self
            .state
            .connections
            .handle_callback(platform, "code", &initiated.state)
            .await?;
        Ok(outcome.connection_id)
    }

    pub async fn asset(&self, project_id: Uuid, compatibility: Vec<Platform>) -> Result<asset::Model> {
        Ok(self
            .state
            .assets
            .create(
                project_id,
                NewAsset {
                    kind: AssetKind::Video,
                    name: "Hero cut".to_string(),
                    content_ref: "s3://creative/hero.mp4".to_string(),
                    compatibility,
                },
                EventSource::Ui,
            )
            .await?)
    }

    /// Drives a new asset through analysis to APPROVED with the given risk score
    pub async fn approved_asset(&self, project_id: Uuid, risk_score: f64) -> Result<asset::Model> {
        let created = self.asset(project_id, Vec::new()).await?;
        self.state.assets.analyze(created.id, EventSource::Ui).await?;
        Ok(self
            .state
            .assets
            .complete_analysis(created.id, approve(risk_score), EventSource::Ai)
            .await?)
    }

    pub async fn events_for(&self, entity_id: Uuid) -> Result<Vec<domain_event::Model>> {
        Ok(DomainEventRepository::new(self.db())
            .list(&EventFilter {
                entity_id: Some(entity_id),
                ..Default::default()
            })
            .await?)
    }
}

pub fn approve(risk_score: f64) -> AnalysisResult {
    AnalysisResult {
        verdict: AnalysisVerdict::Approved,
        risk_score: Some(risk_score),
        quality_score: Some(80.0),
        issues: Vec::new(),
    }
}
