//! Connection lifecycle: OAuth initiation and callback, refresh, revocation and upkeep.

mod test_utils;

use chrono::{Duration, Utc};
use launchgate::adapters::AdAccount;
use launchgate::connection_manager::Usability;
use launchgate::crypto::TokenVault;
use launchgate::error::CoreError;
use launchgate::models::Platform;
use launchgate::models::connection::{ConnectionStatus, Permission, PermissionSet};
use launchgate::models::domain_event::EventSource;
use launchgate::models::project::ProjectStage;
use launchgate::repositories::{ConnectionRepository, ProjectRepository};
use launchgate::token_refresh::TokenRefreshService;
use test_utils::{TestHarness, test_config};
use uuid::Uuid;

#[tokio::test]
async fn callback_connects_account_and_advances_stage() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();

    let initiated = harness
        .state
        .connections
        .initiate_oauth(owner, Platform::Google, project.id, Some("/done".to_string()))
        .await
        .unwrap();
    assert!(initiated.auth_url.contains(&initiated.state));

    let pending = ConnectionRepository::new(harness.db())
        .find_by_id(initiated.connection_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, ConnectionStatus::Pending);
    assert!(pending.credentials_ciphertext.is_none());

    let outcome = harness
        .state
        .connections
        .handle_callback(Platform::Google, "abc", &initiated.state)
        .await
        .unwrap();
    assert_eq!(outcome.connection_id, initiated.connection_id);
    assert_eq!(outcome.redirect_hint.as_deref(), Some("/done"));
    assert_eq!(outcome.account_name, "Primary account");

    let connected = ConnectionRepository::new(harness.db())
        .find_by_id(outcome.connection_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connected.status, ConnectionStatus::Connected);
    assert_eq!(connected.external_account_id.as_deref(), Some("acct-1"));
    assert!(connected.permissions.can_launch());

    // Sealed, never stored in the clear
    let blob = connected.credentials_ciphertext.unwrap();
    assert!(!String::from_utf8_lossy(&blob).contains("access-abc"));

    let stored = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stage, ProjectStage::AccountsConnected);

    let events = harness.events_for(outcome.connection_id).await.unwrap();
    assert_eq!(events[0].event_type, "connection.connected");
    assert_eq!(events[0].previous_state.as_deref(), Some("pending"));
    assert_eq!(events[0].source, EventSource::Ui);
}

#[tokio::test]
async fn initiation_requires_project_ownership() {
    let harness = TestHarness::new().await.unwrap();
    let project = harness.project(Uuid::new_v4()).await.unwrap();

    let err = harness
        .state
        .connections
        .initiate_oauth(Uuid::new_v4(), Platform::Tiktok, project.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Forbidden(_)));
}

#[tokio::test]
async fn state_is_single_use_and_platform_bound() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let connections = &harness.state.connections;

    let first = connections
        .initiate_oauth(owner, Platform::Google, project.id, None)
        .await
        .unwrap();
    connections
        .handle_callback(Platform::Google, "abc", &first.state)
        .await
        .unwrap();
    let replay = connections
        .handle_callback(Platform::Google, "abc", &first.state)
        .await
        .unwrap_err();
    assert!(matches!(replay, CoreError::InvalidState { .. }));

    let second = connections
        .initiate_oauth(owner, Platform::Google, project.id, None)
        .await
        .unwrap();
    let wrong_platform = connections
        .handle_callback(Platform::Snapchat, "abc", &second.state)
        .await
        .unwrap_err();
    assert!(matches!(wrong_platform, CoreError::InvalidState { .. }));

    // The mismatched attempt burned the state
    let retry = connections
        .handle_callback(Platform::Google, "abc", &second.state)
        .await
        .unwrap_err();
    assert!(matches!(retry, CoreError::InvalidState { .. }));

    let unknown = connections
        .handle_callback(Platform::Google, "abc", "never-issued")
        .await
        .unwrap_err();
    assert!(matches!(unknown, CoreError::InvalidState { .. }));
}

#[tokio::test]
async fn failed_callbacks_leave_connection_pending() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let connections = &harness.state.connections;

    harness.tiktok.update(|script| script.accounts.clear());
    let initiated = connections
        .initiate_oauth(owner, Platform::Tiktok, project.id, None)
        .await
        .unwrap();
    let err = connections
        .handle_callback(Platform::Tiktok, "abc", &initiated.state)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoAdAccounts { platform: Platform::Tiktok }));

    harness.tiktok.update(|script| script.fail_exchange = true);
    let second = connections
        .initiate_oauth(owner, Platform::Tiktok, project.id, None)
        .await
        .unwrap();
    let err = connections
        .handle_callback(Platform::Tiktok, "abc", &second.state)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TokenExchangeFailed { .. }));

    let listed = connections.get_connections(owner, Some(project.id)).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|c| c.status == ConnectionStatus::Pending));
}

#[tokio::test]
async fn every_discovered_account_gets_a_connection() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    harness.snapchat.update(|script| {
        script.accounts = vec![
            AdAccount {
                id: "snap-1".to_string(),
                name: "Brand".to_string(),
            },
            AdAccount {
                id: "snap-2".to_string(),
                name: "Retargeting".to_string(),
            },
        ];
    });

    let initiated = harness
        .state
        .connections
        .initiate_oauth(owner, Platform::Snapchat, project.id, None)
        .await
        .unwrap();
    let outcome = harness
        .state
        .connections
        .handle_callback(Platform::Snapchat, "abc", &initiated.state)
        .await
        .unwrap();
    assert_eq!(outcome.connection_ids.len(), 2);

    // Reconnecting the same accounts reuses the live rows
    let again = harness
        .state
        .connections
        .initiate_oauth(owner, Platform::Snapchat, project.id, None)
        .await
        .unwrap();
    let reconnected = harness
        .state
        .connections
        .handle_callback(Platform::Snapchat, "def", &again.state)
        .await
        .unwrap();
    assert_eq!(reconnected.connection_ids, outcome.connection_ids);

    let listed = harness
        .state
        .connections
        .get_connections(owner, None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2, "unused reservation is dropped");
}

#[tokio::test]
async fn refresh_rotates_tokens_and_failure_expires() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();
    let connections = &harness.state.connections;

    assert!(connections.refresh_connection(id, EventSource::Ui).await.unwrap());

    harness.google.update(|script| script.fail_refresh = true);
    assert!(!connections.refresh_connection(id, EventSource::Ui).await.unwrap());

    let expired = connections.get_owned(id, owner).await.unwrap();
    assert_eq!(expired.status, ConnectionStatus::Expired);
    assert!(expired.credentials_ciphertext.is_some());

    let events = harness.events_for(id).await.unwrap();
    assert_eq!(events[0].event_type, "connection.expired");
    assert_eq!(events[0].source, EventSource::System);
    assert_eq!(events[0].reason.as_deref(), Some("refresh token revoked"));

    // Recovers once the provider accepts again
    harness.google.update(|script| script.fail_refresh = false);
    assert!(connections.refresh_connection(id, EventSource::Ui).await.unwrap());
    let recovered = connections.get_owned(id, owner).await.unwrap();
    assert_eq!(recovered.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn refresh_without_refresh_token_expires_connection() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    harness.tiktok.update(|script| script.issue_refresh_token = false);
    let id = harness.connect(owner, project.id, Platform::Tiktok).await.unwrap();

    let refreshed = harness
        .state
        .connections
        .refresh_connection(id, EventSource::System)
        .await
        .unwrap();
    assert!(!refreshed);
    assert!(
        !harness
            .tiktok
            .calls()
            .iter()
            .any(|call| call.starts_with("refresh:"))
    );
}

#[tokio::test]
async fn refresh_of_pending_is_rejected_and_recorded() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let initiated = harness
        .state
        .connections
        .initiate_oauth(owner, Platform::Google, project.id, None)
        .await
        .unwrap();

    let err = harness
        .state
        .connections
        .refresh_connection(initiated.connection_id, EventSource::Ui)
        .await
        .unwrap_err();
    match err {
        CoreError::InvalidTransition {
            current_state,
            allowed_actions,
            ..
        } => {
            assert_eq!(current_state, "pending");
            assert_eq!(allowed_actions, vec!["revoke".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = harness.events_for(initiated.connection_id).await.unwrap();
    assert!(events[0].blocked);
    assert_eq!(events[0].event_type, "connection.transition_rejected");
}

#[tokio::test]
async fn revoke_discards_credentials_even_when_provider_fails() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();
    harness.google.update(|script| script.fail_revoke = true);
    let connections = &harness.state.connections;

    let forbidden = connections
        .revoke_connection(id, Uuid::new_v4(), EventSource::Ui)
        .await
        .unwrap_err();
    assert!(matches!(forbidden, CoreError::Forbidden(_)));

    let summary = connections
        .revoke_connection(id, owner, EventSource::Ui)
        .await
        .unwrap();
    assert_eq!(summary.status, ConnectionStatus::Revoked);
    assert!(summary.allowed_actions.is_empty());
    assert!(harness.google.calls().iter().any(|c| c.starts_with("revoke:")));

    let stored = connections.get_owned(id, owner).await.unwrap();
    assert!(stored.credentials_ciphertext.is_none());

    let again = connections
        .revoke_connection(id, owner, EventSource::Ui)
        .await
        .unwrap_err();
    assert!(matches!(again, CoreError::InvalidTransition { .. }));

    let project = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.stage, ProjectStage::Setup);
}

#[tokio::test]
async fn provider_revocation_revokes_matching_accounts() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Tiktok).await.unwrap();

    let none = harness
        .state
        .connections
        .handle_provider_revocation(Platform::Tiktok, "someone-else")
        .await
        .unwrap();
    assert!(none.is_empty());

    let revoked = harness
        .state
        .connections
        .handle_provider_revocation(Platform::Tiktok, "acct-1")
        .await
        .unwrap();
    assert_eq!(revoked, vec![id]);

    let events = harness.events_for(id).await.unwrap();
    assert_eq!(events[0].action, "provider_revocation");
    assert_eq!(events[0].source, EventSource::System);
}

#[tokio::test]
async fn limited_access_blocks_launch_but_stays_usable() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();
    let connections = &harness.state.connections;

    let summary = connections
        .mark_limited_access(id, PermissionSet::new([Permission::Read]), EventSource::System)
        .await
        .unwrap();
    assert_eq!(summary.status, ConnectionStatus::LimitedAccess);
    assert_eq!(summary.permissions, vec![Permission::Read]);

    let again = connections
        .mark_limited_access(id, PermissionSet::new([Permission::Read]), EventSource::System)
        .await
        .unwrap_err();
    assert!(matches!(again, CoreError::InvalidTransition { .. }));

    match connections.ensure_fresh(id).await.unwrap() {
        Usability::Ready(grant) => {
            assert_eq!(grant.status, ConnectionStatus::LimitedAccess);
            assert!(!grant.permissions.can_launch());
            assert_eq!(grant.access_token.expose(), "access-code");
        }
        Usability::Unavailable { status, .. } => panic!("unexpectedly unavailable: {status:?}"),
    }
}

#[tokio::test]
async fn ensure_fresh_refreshes_tokens_inside_lead_window() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    harness.google.update(|script| script.expires_in = Some(60));
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();

    let Usability::Ready(grant) = harness.state.connections.ensure_fresh(id).await.unwrap() else {
        panic!("connection should be usable");
    };
    assert_ne!(grant.access_token.expose(), "access-code");
    assert!(format!("{grant:?}").contains("REDACTED"));

    harness.google.update(|script| script.fail_refresh = true);
    let outcome = harness.state.connections.ensure_fresh(id).await.unwrap();
    assert!(matches!(
        outcome,
        Usability::Unavailable {
            status: ConnectionStatus::Expired,
            ..
        }
    ));
}

#[tokio::test]
async fn purge_removes_abandoned_flows() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    harness
        .state
        .connections
        .initiate_oauth(owner, Platform::Snapchat, project.id, None)
        .await
        .unwrap();

    let nothing = harness.state.connections.purge_expired(Utc::now()).await.unwrap();
    assert_eq!(nothing.pending_requests, 0);
    assert_eq!(nothing.pending_connections, 0);

    let later = Utc::now() + Duration::hours(1);
    let report = harness.state.connections.purge_expired(later).await.unwrap();
    assert_eq!(report.pending_requests, 1);
    assert_eq!(report.pending_connections, 1);
    assert!(
        harness
            .state
            .connections
            .get_connections(owner, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn refresh_tick_renews_due_connections() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    harness.tiktok.update(|script| script.expires_in = Some(30));
    let due = harness.connect(owner, project.id, Platform::Tiktok).await.unwrap();
    harness.google.update(|script| script.expires_in = Some(86_400));
    harness.connect(owner, project.id, Platform::Google).await.unwrap();
    harness.tiktok.update(|script| script.expires_in = Some(3600));

    let service = TokenRefreshService::new(
        harness.state.config.token_refresh.clone(),
        harness.state.connections.clone(),
    );
    let stats = service.tick().await.unwrap();
    assert_eq!(stats.connections_polled, 1);
    assert_eq!(stats.refreshes_succeeded, 1);

    let refreshed = harness.state.connections.get_owned(due, owner).await.unwrap();
    assert!(refreshed.token_expires_at.unwrap() > Utc::now() + Duration::minutes(10));
}

#[tokio::test]
async fn refresh_after_limited_access_restores_granted_permissions() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Tiktok).await.unwrap();
    harness.approved_asset(project.id, 10.0).await.unwrap();
    let connections = &harness.state.connections;

    connections
        .mark_limited_access(id, PermissionSet::new([Permission::Read]), EventSource::System)
        .await
        .unwrap();
    let stage = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, ProjectStage::AnalysisPassed);

    assert!(connections.refresh_connection(id, EventSource::System).await.unwrap());

    let refreshed = connections.get_owned(id, owner).await.unwrap();
    assert_eq!(refreshed.status, ConnectionStatus::Connected);
    assert!(refreshed.permissions.can_launch());
    let stage = ProjectRepository::new(harness.db())
        .find_by_id(project.id)
        .await
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, ProjectStage::ReadyToLaunch);

    // A read-only grant comes back connected but still unable to launch
    harness
        .tiktok
        .update(|script| script.scopes = vec!["ads.readonly".to_string()]);
    assert!(connections.refresh_connection(id, EventSource::System).await.unwrap());
    let narrowed = connections.get_owned(id, owner).await.unwrap();
    assert_eq!(narrowed.status, ConnectionStatus::Connected);
    assert_eq!(narrowed.permissions.0, vec![Permission::Read]);
}

#[tokio::test]
async fn concurrent_refreshes_of_one_connection_are_serialized() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();
    harness
        .google
        .update(|script| script.refresh_delay = Some(std::time::Duration::from_millis(20)));
    let connections = &harness.state.connections;

    let (first, second) = tokio::join!(
        connections.refresh_connection(id, EventSource::System),
        connections.refresh_connection(id, EventSource::Ui),
    );
    assert!(first.unwrap());
    assert!(second.unwrap());
    assert_eq!(harness.google.max_concurrent_refreshes(), 1);

    // The second refresh used the token the first one stored
    let presented: Vec<String> = harness
        .google
        .calls()
        .into_iter()
        .filter_map(|call| call.strip_prefix("refresh:").map(str::to_string))
        .collect();
    assert_eq!(presented.len(), 2);
    assert_ne!(presented[0], presented[1]);

    let stored = ConnectionRepository::new(harness.db())
        .find_by_id(id)
        .await
        .unwrap()
        .unwrap();
    let vault = TokenVault::from_secret(test_config().vault_secret.as_deref()).unwrap();
    let tokens = vault
        .open_token_set(id, Platform::Google, &stored.credentials_ciphertext.unwrap())
        .unwrap();
    let newest = tokens.refresh_token.clone().unwrap();
    assert!(!presented.contains(&newest));
}

#[tokio::test]
async fn write_against_a_stale_version_is_a_conflict() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();
    harness.google.update(|script| script.hold_refresh = true);

    let manager = harness.state.connections.clone();
    let refresh = tokio::spawn(async move { manager.refresh_connection(id, EventSource::System).await });

    // Another writer moves the row on while the refresh is upstream
    harness.google.refresh_started().await;
    harness
        .state
        .connections
        .mark_limited_access(id, PermissionSet::new([Permission::Read]), EventSource::System)
        .await
        .unwrap();
    harness.google.release_refresh();

    let err = refresh.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Conflict { entity: "connection", .. }));

    let current = harness.state.connections.get_owned(id, owner).await.unwrap();
    assert_eq!(current.status, ConnectionStatus::LimitedAccess);
    assert_eq!(current.permissions.0, vec![Permission::Read]);

    let stale = ConnectionRepository::new(harness.db())
        .update_versioned(current.version - 1, current.clone())
        .await
        .unwrap();
    assert!(stale.is_none());
}

#[tokio::test]
async fn a_second_live_row_for_the_same_account_is_refused() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Snapchat).await.unwrap();
    let repo = ConnectionRepository::new(harness.db());
    let existing = repo.find_by_id(id).await.unwrap().unwrap();

    let mut duplicate = existing.clone();
    duplicate.id = Uuid::new_v4();
    duplicate.version = 0;
    let err = repo.insert(duplicate.clone()).await.unwrap_err();
    assert!(matches!(
        CoreError::from_write(err, "connection", duplicate.id),
        CoreError::Conflict { entity: "connection", .. }
    ));

    // History rows for the same account do not count
    duplicate.status = ConnectionStatus::Revoked;
    duplicate.credentials_ciphertext = None;
    repo.insert(duplicate).await.unwrap();

    // Revoking frees the account for a new live connection
    harness
        .state
        .connections
        .revoke_connection(id, owner, EventSource::Ui)
        .await
        .unwrap();
    let reconnected = harness.connect(owner, project.id, Platform::Snapchat).await.unwrap();
    assert_ne!(reconnected, id);
}
