//! # Connection lifecycle
//!
//! Owns every state change of a [`connection::Model`]:
//!
//! ```text
//! pending ──callback──▶ connected ──mark_limited_access──▶ limited_access
//!                          │  ▲                                  │
//!                  refresh │  │ refresh ok                       │ refresh fails
//!                   fails  ▼  │                                  ▼
//!                         expired ◀──────────────────────────────┘
//!
//! any non-revoked state ──revoke──▶ revoked (terminal)
//! ```
//!
//! Credentials are sealed by the [`TokenVault`] per connection id and are only ever
//! decrypted in memory. Writes use the row version so two concurrent refreshes of the
//! same connection cannot clobber each other; within one process refreshes of a
//! connection are additionally single-flighted.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::adapters::{PlatformAdapter, Registry, TokenSet};
use crate::config::AppConfig;
use crate::crypto::{TokenVault, generate_state_token};
use crate::error::CoreError;
use crate::events::{self, NewEvent};
use crate::models::Platform;
use crate::models::connection::{self, ConnectionStatus, Permission, PermissionSet};
use crate::models::domain_event::{EntityKind, EventSource};
use crate::models::pending_oauth_request;
use crate::project_stage;
use crate::repositories::{ConnectionRepository, PendingOAuthRequestRepository, ProjectRepository};

/// Caller-invocable actions on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Refresh,
    MarkLimitedAccess,
    Revoke,
}

impl ConnectionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionAction::Refresh => "refresh",
            ConnectionAction::MarkLimitedAccess => "mark_limited_access",
            ConnectionAction::Revoke => "revoke",
        }
    }
}

pub fn allowed_actions(status: ConnectionStatus) -> &'static [ConnectionAction] {
    use ConnectionAction::*;
    match status {
        ConnectionStatus::Pending => &[Revoke],
        ConnectionStatus::Connected => &[Refresh, MarkLimitedAccess, Revoke],
        ConnectionStatus::LimitedAccess => &[Refresh, Revoke],
        ConnectionStatus::Expired => &[Refresh, Revoke],
        ConnectionStatus::Revoked => &[],
    }
}

fn is_allowed(status: ConnectionStatus, action: ConnectionAction) -> bool {
    allowed_actions(status).contains(&action)
}

/// Result of starting an OAuth flow
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiatedOAuth {
    pub auth_url: String,
    pub connection_id: Uuid,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful OAuth callback
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackOutcome {
    /// Connection created from (or promoted for) the first discovered account
    pub connection_id: Uuid,
    pub connection_ids: Vec<Uuid>,
    pub account_name: String,
    pub platform: Platform,
    pub project_id: Uuid,
    #[serde(skip)]
    pub redirect_hint: Option<String>,
}

/// Connection as exposed outside the core: never carries credential material
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub platform: Platform,
    pub external_account_id: Option<String>,
    pub display_name: Option<String>,
    pub status: ConnectionStatus,
    pub permissions: Vec<Permission>,
    pub allowed_actions: Vec<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&connection::Model> for ConnectionSummary {
    fn from(model: &connection::Model) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            platform: model.platform,
            external_account_id: model.external_account_id.clone(),
            display_name: model.display_name.clone(),
            status: model.status,
            permissions: model.permissions.0.clone(),
            allowed_actions: allowed_actions(model.status)
                .iter()
                .map(|action| action.as_str().to_string())
                .collect(),
            token_expires_at: model.token_expires_at,
            last_refreshed_at: model.last_refreshed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Decrypted access token; redacted in `Debug`, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub connection_id: Uuid,
    pub platform: Platform,
    pub status: ConnectionStatus,
    pub permissions: PermissionSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_token: SecretToken,
}

/// Outcome of applying the refresh policy before use
#[derive(Debug, Clone)]
pub enum Usability {
    Ready(AccessGrant),
    Unavailable {
        connection_id: Uuid,
        status: ConnectionStatus,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct PurgeReport {
    pub pending_requests: u64,
    pub pending_connections: u64,
}

type RefreshLocks = Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Connection lifecycle manager
#[derive(Clone)]
pub struct ConnectionManager {
    db: Arc<DatabaseConnection>,
    vault: TokenVault,
    registry: Registry,
    config: Arc<AppConfig>,
    /// Per-connection refresh serialization within this process
    refresh_locks: RefreshLocks,
}

impl ConnectionManager {
    pub fn new(
        db: Arc<DatabaseConnection>,
        vault: TokenVault,
        registry: Registry,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            vault,
            registry,
            config,
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn adapter(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, CoreError> {
        self.registry
            .get(platform)
            .map_err(|e| CoreError::Configuration(e.to_string()))
    }

    async fn load(&self, connection_id: Uuid) -> Result<connection::Model, CoreError> {
        ConnectionRepository::new(self.db.as_ref())
            .find_by_id(connection_id)
            .await?
            .ok_or_else(|| CoreError::not_found("connection", connection_id))
    }

    /// Loads a connection, failing with `Forbidden` unless `user_id` owns it
    pub async fn get_owned(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
    ) -> Result<connection::Model, CoreError> {
        let connection = self.load(connection_id).await?;
        if connection.user_id != user_id {
            warn!(
                target: "security",
                connection_id = %connection_id,
                user_id = %user_id,
                "Connection access denied: requester is not the owner"
            );
            return Err(CoreError::Forbidden(
                "connection belongs to another user".to_string(),
            ));
        }
        Ok(connection)
    }

    /// Records the refused attempt and builds the error returned to the caller
    async fn reject(
        &self,
        connection: &connection::Model,
        action: ConnectionAction,
        source: EventSource,
    ) -> Result<CoreError, CoreError> {
        let current = connection.status.as_str();
        let reason = format!(
            "action '{}' is not allowed in state {}",
            action.as_str(),
            current
        );
        events::record(
            self.db.as_ref(),
            NewEvent::new(EntityKind::Connection, connection.id, action.as_str(), source)
                .project(connection.project_id)
                .rejected(current, reason),
        )
        .await?;

        Ok(CoreError::InvalidTransition {
            entity: "connection",
            current_state: current.to_string(),
            attempted_action: action.as_str().to_string(),
            allowed_actions: allowed_actions(connection.status)
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        })
    }

    /// Starts an OAuth flow for `platform` on behalf of `user_id`.
    ///
    /// Reserves a `pending` connection and a single-use CSRF state, and returns the
    /// provider authorization URL to redirect the user to.
    #[instrument(skip(self, redirect_hint), fields(platform = %platform))]
    pub async fn initiate_oauth(
        &self,
        user_id: Uuid,
        platform: Platform,
        project_id: Uuid,
        redirect_hint: Option<String>,
    ) -> Result<InitiatedOAuth, CoreError> {
        let project = ProjectRepository::new(self.db.as_ref())
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found("project", project_id))?;
        if project.owner_user_id != user_id {
            warn!(
                target: "security",
                project_id = %project_id,
                user_id = %user_id,
                "OAuth initiation denied: requester does not own the project"
            );
            return Err(CoreError::Forbidden(
                "project belongs to another user".to_string(),
            ));
        }

        let adapter = self
            .registry
            .get(platform)
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let state = generate_state_token();
        let auth_url = adapter.authorization_url(&state)?;
        let now = Utc::now();
        let expires_at = now + self.config.oauth.state_ttl();
        let connection_id = Uuid::new_v4();

        let txn = self.db.begin().await?;
        ConnectionRepository::new(&txn)
            .insert(connection::Model {
                id: connection_id,
                user_id,
                project_id,
                platform,
                external_account_id: None,
                display_name: None,
                status: ConnectionStatus::Pending,
                permissions: PermissionSet::default(),
                credentials_ciphertext: None,
                token_expires_at: None,
                last_refreshed_at: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        PendingOAuthRequestRepository::new(&txn)
            .insert(pending_oauth_request::Model {
                id: Uuid::new_v4(),
                state: state.clone(),
                user_id,
                project_id,
                platform,
                connection_id,
                redirect_hint,
                created_at: now,
                expires_at,
            })
            .await?;
        txn.commit().await?;

        counter!("oauth_initiations_total", "platform" => platform.as_str()).increment(1);
        info!(
            connection_id = %connection_id,
            project_id = %project_id,
            "OAuth flow initiated"
        );

        Ok(InitiatedOAuth {
            auth_url: auth_url.to_string(),
            connection_id,
            state,
            expires_at,
        })
    }

    /// Consumes the pending request for `state`; the state is burned even when the
    /// request turns out to be expired or bound to another platform.
    async fn consume_state(
        &self,
        platform: Platform,
        state: &str,
    ) -> Result<pending_oauth_request::Model, CoreError> {
        let repo = PendingOAuthRequestRepository::new(self.db.as_ref());

        let Some(request) = repo.find_by_state(state).await? else {
            return Err(invalid_state(platform, "unknown or already consumed state"));
        };
        if !repo.claim(request.id).await? {
            return Err(invalid_state(platform, "state consumed concurrently"));
        }
        if request.is_expired_at(Utc::now()) {
            return Err(invalid_state(platform, "state expired"));
        }
        if request.platform != platform {
            return Err(invalid_state(platform, "state issued for another platform"));
        }
        Ok(request)
    }

    /// Completes an OAuth flow.
    ///
    /// All-or-nothing: every discovered account is persisted in one transaction, or
    /// nothing is and the reserved connection stays `pending`.
    #[instrument(skip(self, code, state), fields(platform = %platform))]
    pub async fn handle_callback(
        &self,
        platform: Platform,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome, CoreError> {
        let result = self.complete_callback(platform, code, state).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(error) => error.kind(),
        };
        counter!(
            "oauth_callbacks_total",
            "platform" => platform.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn complete_callback(
        &self,
        platform: Platform,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome, CoreError> {
        let request = self.consume_state(platform, state).await?;

        let reserved = ConnectionRepository::new(self.db.as_ref())
            .find_by_id(request.connection_id)
            .await?;
        if reserved
            .as_ref()
            .is_some_and(|c| c.status == ConnectionStatus::Revoked)
        {
            return Err(invalid_state(platform, "reserved connection was revoked"));
        }

        let adapter = self.adapter(platform)?;
        let tokens = adapter
            .exchange_code(code)
            .await
            .map_err(|e| exchange_failed(platform, e.provider_message))?;
        let accounts = adapter
            .list_ad_accounts(&tokens.access_token)
            .await
            .map_err(|e| exchange_failed(platform, e.provider_message))?;
        if accounts.is_empty() {
            info!(user_id = %request.user_id, "Authorization granted no ad accounts");
            return Err(CoreError::NoAdAccounts { platform });
        }
        let permissions = adapter.derive_permissions(&tokens.scopes);

        let txn = self.db.begin().await?;
        let repo = ConnectionRepository::new(&txn);
        let mut reserved = reserved.filter(|c| c.status == ConnectionStatus::Pending);
        let mut connection_ids = Vec::with_capacity(accounts.len());
        let mut touched_projects = BTreeSet::new();

        for account in &accounts {
            let now = Utc::now();
            let existing = repo
                .find_live_for_account(request.user_id, platform, &account.id)
                .await?;

            let (stored, previous, action) = match existing.or_else(|| reserved.take()) {
                Some(row) => {
                    let previous = row.status;
                    let version = row.version;
                    let action = if previous == ConnectionStatus::Pending {
                        "callback"
                    } else {
                        "reconnect"
                    };
                    let mut updated = row;
                    updated.external_account_id = Some(account.id.clone());
                    updated.display_name = Some(account.name.clone());
                    updated.status = ConnectionStatus::Connected;
                    updated.permissions = permissions.clone();
                    updated.credentials_ciphertext =
                        Some(self.vault.seal_token_set(updated.id, platform, &tokens)?);
                    updated.token_expires_at = tokens.expires_at;
                    updated.last_refreshed_at = Some(now);

                    let id = updated.id;
                    let stored = repo
                        .update_versioned(version, updated)
                        .await
                        .map_err(|e| CoreError::from_write(e, "connection", id))?
                        .ok_or(CoreError::Conflict {
                            entity: "connection",
                            id,
                        })?;
                    (stored, Some(previous), action)
                }
                None => {
                    let id = Uuid::new_v4();
                    let stored = repo
                        .insert(connection::Model {
                            id,
                            user_id: request.user_id,
                            project_id: request.project_id,
                            platform,
                            external_account_id: Some(account.id.clone()),
                            display_name: Some(account.name.clone()),
                            status: ConnectionStatus::Connected,
                            permissions: permissions.clone(),
                            credentials_ciphertext: Some(
                                self.vault.seal_token_set(id, platform, &tokens)?,
                            ),
                            token_expires_at: tokens.expires_at,
                            last_refreshed_at: Some(now),
                            version: 0,
                            created_at: now,
                            updated_at: now,
                        })
                        .await
                        .map_err(|e| CoreError::from_write(e, "connection", id))?;
                    (stored, None, "callback")
                }
            };

            events::record(
                &txn,
                NewEvent::new(EntityKind::Connection, stored.id, action, EventSource::Ui)
                    .project(stored.project_id)
                    .transition(
                        previous.as_ref().map(ConnectionStatus::as_str),
                        ConnectionStatus::Connected.as_str(),
                    ),
            )
            .await?;

            touched_projects.insert(stored.project_id);
            connection_ids.push(stored.id);
        }

        // Every account matched an existing connection; drop the unused reservation
        if let Some(unused) = reserved {
            repo.delete_pending(unused.id).await?;
        }

        for project_id in touched_projects {
            project_stage::recompute(&txn, project_id, EventSource::System).await?;
        }
        txn.commit().await?;

        info!(
            user_id = %request.user_id,
            project_id = %request.project_id,
            accounts = connection_ids.len(),
            "OAuth callback completed"
        );

        Ok(CallbackOutcome {
            connection_id: connection_ids[0],
            connection_ids,
            account_name: accounts[0].name.clone(),
            platform,
            project_id: request.project_id,
            redirect_hint: request.redirect_hint,
        })
    }

    async fn refresh_lock(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks.entry(connection_id).or_default().clone()
    }

    async fn release_refresh_lock(&self, connection_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.refresh_locks.lock().await;
        // One reference in the map plus ours: nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&connection_id);
        }
    }

    /// Refreshes a connection's tokens.
    ///
    /// Returns `false` when there is no refresh token or the provider rejects it; the
    /// connection is then `expired` and needs a full reconnect.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn refresh_connection(
        &self,
        connection_id: Uuid,
        source: EventSource,
    ) -> Result<bool, CoreError> {
        let lock = self.refresh_lock(connection_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.refresh_serialized(connection_id, source).await
        };
        self.release_refresh_lock(connection_id, lock).await;
        result
    }

    async fn refresh_serialized(
        &self,
        connection_id: Uuid,
        source: EventSource,
    ) -> Result<bool, CoreError> {
        let connection = self.load(connection_id).await?;
        if !is_allowed(connection.status, ConnectionAction::Refresh) {
            return Err(self
                .reject(&connection, ConnectionAction::Refresh, source)
                .await?);
        }

        let current = self.open_credentials(&connection)?;
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            self.expire(&connection, "no refresh token stored").await?;
            return Ok(false);
        };

        let platform = connection.platform;
        let adapter = self.adapter(platform)?;
        counter!("token_refresh_attempts_total", "platform" => platform.as_str()).increment(1);
        let started = Instant::now();

        match adapter.refresh(refresh_token).await {
            Ok(mut fresh) => {
                histogram!("token_refresh_latency_ms", "platform" => platform.as_str())
                    .record(started.elapsed().as_secs_f64() * 1_000.0);
                fresh.inherit_refresh_token(&current);
                let permissions = adapter.derive_permissions(&fresh.scopes);
                self.store_refreshed(connection, &fresh, permissions, source)
                    .await?;
                counter!("token_refresh_success_total", "platform" => platform.as_str())
                    .increment(1);
                Ok(true)
            }
            Err(error) => {
                warn!(
                    platform = %platform,
                    status = ?error.status,
                    provider_message = %error.provider_message,
                    "Provider rejected token refresh"
                );
                counter!("token_refresh_failure_total", "platform" => platform.as_str())
                    .increment(1);
                self.expire(&connection, &error.provider_message).await?;
                Ok(false)
            }
        }
    }

    fn open_credentials(&self, connection: &connection::Model) -> Result<TokenSet, CoreError> {
        let blob = connection.credentials_ciphertext.as_deref().ok_or_else(|| {
            CoreError::Decryption(format!(
                "connection {} has no stored credentials",
                connection.id
            ))
        })?;
        self.vault
            .open_token_set(connection.id, connection.platform, blob)
            .map_err(|e| {
                warn!(connection_id = %connection.id, "Credential decryption failed");
                CoreError::from(e)
            })
    }

    async fn store_refreshed(
        &self,
        connection: connection::Model,
        fresh: &TokenSet,
        permissions: PermissionSet,
        source: EventSource,
    ) -> Result<(), CoreError> {
        let previous = connection.status;
        let version = connection.version;
        let id = connection.id;
        let project_id = connection.project_id;

        let mut updated = connection;
        updated.credentials_ciphertext =
            Some(self.vault.seal_token_set(id, updated.platform, fresh)?);
        updated.token_expires_at = fresh.expires_at;
        updated.last_refreshed_at = Some(Utc::now());
        // A fresh grant supersedes any earlier downgrade
        updated.permissions = permissions;
        updated.status = ConnectionStatus::Connected;

        let txn = self.db.begin().await?;
        ConnectionRepository::new(&txn)
            .update_versioned(version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "connection",
                id,
            })?;
        events::record(
            &txn,
            NewEvent::new(
                EntityKind::Connection,
                id,
                ConnectionAction::Refresh.as_str(),
                source,
            )
            .project(project_id)
            .transition(Some(previous.as_str()), ConnectionStatus::Connected.as_str()),
        )
        .await?;
        project_stage::recompute(&txn, project_id, EventSource::System).await?;
        txn.commit().await?;

        debug!(connection_id = %id, "Stored refreshed credentials");
        Ok(())
    }

    /// Downgrades to `expired`, keeping the sealed credentials
    async fn expire(&self, connection: &connection::Model, reason: &str) -> Result<(), CoreError> {
        if connection.status == ConnectionStatus::Expired {
            return Ok(());
        }

        let mut updated = connection.clone();
        updated.status = ConnectionStatus::Expired;

        let txn = self.db.begin().await?;
        ConnectionRepository::new(&txn)
            .update_versioned(connection.version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "connection",
                id: connection.id,
            })?;
        events::record(
            &txn,
            NewEvent::new(
                EntityKind::Connection,
                connection.id,
                ConnectionAction::Refresh.as_str(),
                EventSource::System,
            )
            .project(connection.project_id)
            .transition(
                Some(connection.status.as_str()),
                ConnectionStatus::Expired.as_str(),
            )
            .reason(reason),
        )
        .await?;
        project_stage::recompute(&txn, connection.project_id, EventSource::System).await?;
        txn.commit().await?;

        counter!("connections_expired_total", "platform" => connection.platform.as_str())
            .increment(1);
        info!(connection_id = %connection.id, "Connection expired, reconnect required");
        Ok(())
    }

    /// Revokes a connection owned by `requesting_user_id`.
    ///
    /// The provider-side revoke is best-effort; the local transition always happens.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn revoke_connection(
        &self,
        connection_id: Uuid,
        requesting_user_id: Uuid,
        source: EventSource,
    ) -> Result<ConnectionSummary, CoreError> {
        let connection = self.get_owned(connection_id, requesting_user_id).await?;
        if !is_allowed(connection.status, ConnectionAction::Revoke) {
            return Err(self
                .reject(&connection, ConnectionAction::Revoke, source)
                .await?);
        }

        if connection.credentials_ciphertext.is_some() {
            self.revoke_upstream(&connection).await;
        }

        let stored = self
            .mark_revoked(&connection, source, ConnectionAction::Revoke.as_str(), None)
            .await?;
        Ok(ConnectionSummary::from(&stored))
    }

    async fn revoke_upstream(&self, connection: &connection::Model) {
        let platform = connection.platform;
        let tokens = match self.open_credentials(connection) {
            Ok(tokens) => tokens,
            Err(_) => {
                warn!(
                    connection_id = %connection.id,
                    "Skipping provider revoke: credentials could not be opened"
                );
                return;
            }
        };
        let adapter = match self.adapter(platform) {
            Ok(adapter) => adapter,
            Err(error) => {
                warn!(connection_id = %connection.id, error = %error, "Skipping provider revoke");
                return;
            }
        };

        let token = tokens
            .refresh_token
            .as_deref()
            .unwrap_or(&tokens.access_token);
        if let Err(error) = adapter.revoke(token).await {
            counter!("provider_revoke_failures_total", "platform" => platform.as_str())
                .increment(1);
            warn!(
                connection_id = %connection.id,
                platform = %platform,
                provider_message = %error.provider_message,
                "Provider-side revoke failed; revoking locally"
            );
        }
    }

    async fn mark_revoked(
        &self,
        connection: &connection::Model,
        source: EventSource,
        action: &str,
        reason: Option<&str>,
    ) -> Result<connection::Model, CoreError> {
        let mut updated = connection.clone();
        updated.status = ConnectionStatus::Revoked;
        updated.credentials_ciphertext = None;
        updated.token_expires_at = None;

        let mut event = NewEvent::new(EntityKind::Connection, connection.id, action, source)
            .project(connection.project_id)
            .transition(
                Some(connection.status.as_str()),
                ConnectionStatus::Revoked.as_str(),
            );
        if let Some(reason) = reason {
            event = event.reason(reason);
        }

        let txn = self.db.begin().await?;
        let stored = ConnectionRepository::new(&txn)
            .update_versioned(connection.version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "connection",
                id: connection.id,
            })?;
        events::record(&txn, event).await?;
        project_stage::recompute(&txn, connection.project_id, EventSource::System).await?;
        txn.commit().await?;

        info!(connection_id = %connection.id, "Connection revoked");
        Ok(stored)
    }

    /// Applies a provider-side revocation to every credential-holding connection for the
    /// account. Returns the revoked connection ids.
    #[instrument(skip(self))]
    pub async fn handle_provider_revocation(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Vec<Uuid>, CoreError> {
        let affected = ConnectionRepository::new(self.db.as_ref())
            .list_holding_credentials_for_account(platform, external_account_id)
            .await?;

        let mut revoked = Vec::with_capacity(affected.len());
        for connection in affected {
            self.mark_revoked(
                &connection,
                EventSource::System,
                "provider_revocation",
                Some("provider revoked access"),
            )
            .await?;
            revoked.push(connection.id);
        }

        if revoked.is_empty() {
            debug!(platform = %platform, "Provider revocation matched no connections");
        }
        Ok(revoked)
    }

    /// Records a permission downgrade detected without a token change
    #[instrument(skip(self, permissions), fields(connection_id = %connection_id))]
    pub async fn mark_limited_access(
        &self,
        connection_id: Uuid,
        permissions: PermissionSet,
        source: EventSource,
    ) -> Result<ConnectionSummary, CoreError> {
        let connection = self.load(connection_id).await?;
        if !is_allowed(connection.status, ConnectionAction::MarkLimitedAccess) {
            return Err(self
                .reject(&connection, ConnectionAction::MarkLimitedAccess, source)
                .await?);
        }

        let mut updated = connection.clone();
        updated.status = ConnectionStatus::LimitedAccess;
        updated.permissions = permissions;

        let txn = self.db.begin().await?;
        let stored = ConnectionRepository::new(&txn)
            .update_versioned(connection.version, updated)
            .await?
            .ok_or(CoreError::Conflict {
                entity: "connection",
                id: connection_id,
            })?;
        events::record(
            &txn,
            NewEvent::new(
                EntityKind::Connection,
                connection_id,
                ConnectionAction::MarkLimitedAccess.as_str(),
                source,
            )
            .project(connection.project_id)
            .transition(
                Some(connection.status.as_str()),
                ConnectionStatus::LimitedAccess.as_str(),
            ),
        )
        .await?;
        project_stage::recompute(&txn, connection.project_id, EventSource::System).await?;
        txn.commit().await?;

        Ok(ConnectionSummary::from(&stored))
    }

    /// Lists a user's connections without touching credentials
    pub async fn get_connections(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<ConnectionSummary>, CoreError> {
        let connections = ConnectionRepository::new(self.db.as_ref())
            .list_for_user(user_id, project_id)
            .await?;
        Ok(connections.iter().map(ConnectionSummary::from).collect())
    }

    fn is_due(&self, connection: &connection::Model, now: DateTime<Utc>) -> bool {
        let lead = self.config.token_refresh.lead_time();
        connection
            .token_expires_at
            .is_some_and(|expires_at| expires_at <= now + lead)
    }

    /// Applies the refresh policy and hands out a usable access token, or reports why
    /// the connection cannot be used.
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub async fn ensure_fresh(&self, connection_id: Uuid) -> Result<Usability, CoreError> {
        let mut connection = self.load(connection_id).await?;

        let needs_refresh = match connection.status {
            ConnectionStatus::Pending | ConnectionStatus::Revoked => {
                return Ok(Usability::Unavailable {
                    connection_id,
                    status: connection.status,
                });
            }
            ConnectionStatus::Expired => true,
            ConnectionStatus::Connected | ConnectionStatus::LimitedAccess => {
                self.is_due(&connection, Utc::now())
            }
        };

        if needs_refresh {
            if !self
                .refresh_connection(connection_id, EventSource::System)
                .await?
            {
                return Ok(Usability::Unavailable {
                    connection_id,
                    status: ConnectionStatus::Expired,
                });
            }
            connection = self.load(connection_id).await?;
        }

        let tokens = self.open_credentials(&connection)?;
        Ok(Usability::Ready(AccessGrant {
            connection_id,
            platform: connection.platform,
            status: connection.status,
            permissions: connection.permissions.clone(),
            expires_at: connection.token_expires_at,
            access_token: SecretToken(tokens.access_token.clone()),
        }))
    }

    /// Connections whose tokens fall inside the refresh lead window
    pub async fn due_for_refresh(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<connection::Model>, CoreError> {
        Ok(ConnectionRepository::new(self.db.as_ref())
            .list_due_for_refresh(now + self.config.token_refresh.lead_time())
            .await?)
    }

    /// Deletes expired pending requests and the `pending` connections that can no
    /// longer be completed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, CoreError> {
        let txn = self.db.begin().await?;
        let requests = PendingOAuthRequestRepository::new(&txn);
        let connections = ConnectionRepository::new(&txn);
        let mut report = PurgeReport::default();

        for request in requests.list_expired(now).await? {
            if requests.claim(request.id).await? {
                report.pending_requests += 1;
            }
        }

        // A pending connection older than the state TTL has no live request left
        let cutoff = now - self.config.oauth.state_ttl();
        for stale in connections.list_pending_created_before(cutoff).await? {
            if connections.delete_pending(stale.id).await? {
                report.pending_connections += 1;
            }
        }
        txn.commit().await?;

        if report != PurgeReport::default() {
            info!(
                pending_requests = report.pending_requests,
                pending_connections = report.pending_connections,
                "Purged abandoned OAuth flows"
            );
        }
        Ok(report)
    }
}

fn invalid_state(platform: Platform, reason: &str) -> CoreError {
    warn!(
        target: "security",
        platform = %platform,
        reason = reason,
        "Rejected OAuth callback state"
    );
    CoreError::InvalidState {
        reason: reason.to_string(),
    }
}

fn exchange_failed(platform: Platform, provider_message: String) -> CoreError {
    warn!(platform = %platform, provider_message = %provider_message, "Token exchange failed");
    CoreError::TokenExchangeFailed {
        platform,
        provider_message,
    }
}
