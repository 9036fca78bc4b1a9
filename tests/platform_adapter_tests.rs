//! Platform adapters against mocked provider endpoints.

mod test_utils;

use launchgate::adapters::{
    GoogleAdapter, PlatformAdapter, Registry, SnapchatAdapter, TiktokAdapter,
};
use launchgate::config::{OAuthConfig, PlatformConfig};
use launchgate::crypto::TokenVault;
use launchgate::models::Platform;
use launchgate::models::connection::{ConnectionStatus, Permission};
use launchgate::models::domain_event::EventSource;
use launchgate::server::AppState;
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path, query_param},
};

fn platform_config(server: &MockServer) -> PlatformConfig {
    PlatformConfig {
        client_id: Some("client-id".to_string()),
        client_secret: Some("client-secret".to_string()),
        redirect_uri: Some("https://launchgate.test/connect/cb".to_string()),
        auth_base: Some(server.uri()),
        token_base: Some(server.uri()),
        api_base: Some(server.uri()),
    }
}

#[tokio::test]
async fn google_exchange_and_account_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("accept", "application/json"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "g-access",
            "refresh_token": "g-refresh",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/adwords",
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v17/customers:listAccessibleCustomers"))
        .and(header("authorization", "Bearer g-access"))
        .and(header("developer-token", "dev-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceNames": ["customers/1234567890", "customers/987"]
        })))
        .mount(&server)
        .await;

    let adapter = GoogleAdapter::new(
        &platform_config(&server),
        &OAuthConfig::default(),
        Some("dev-token".to_string()),
    )
    .unwrap();

    let tokens = adapter.exchange_code("auth-code").await.unwrap();
    assert_eq!(tokens.access_token, "g-access");
    assert_eq!(tokens.refresh_token.as_deref(), Some("g-refresh"));
    assert!(tokens.expires_at.is_some());
    assert!(adapter.derive_permissions(&tokens.scopes).can_launch());

    let accounts = adapter.list_ad_accounts(&tokens.access_token).await.unwrap();
    let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["1234567890", "987"]);
}

#[tokio::test]
async fn google_refresh_rejection_surfaces_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let adapter =
        GoogleAdapter::new(&platform_config(&server), &OAuthConfig::default(), None).unwrap();
    let error = adapter.refresh("stale").await.unwrap_err();
    assert_eq!(error.platform, Platform::Google);
    assert_eq!(error.status, Some(400));
    assert!(error.provider_message.contains("invalid_grant"));
}

#[tokio::test]
async fn tiktok_envelope_errors_fail_despite_http_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/open_api/v1.3/oauth2/access_token/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40001,
            "message": "auth_code has expired",
            "data": null
        })))
        .mount(&server)
        .await;

    let adapter = TiktokAdapter::new(&platform_config(&server), &OAuthConfig::default()).unwrap();
    let error = adapter.exchange_code("late").await.unwrap_err();
    assert!(error.provider_message.contains("auth_code has expired"));
}

#[tokio::test]
async fn tiktok_lists_advertisers_with_access_token_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/open_api/v1.3/oauth2/advertiser/get/"))
        .and(header("access-token", "tk-access"))
        .and(query_param("app_id", "client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "message": "OK",
            "data": { "list": [
                { "advertiser_id": "7001", "advertiser_name": "Storefront" },
                { "advertiser_id": "7002", "advertiser_name": "" }
            ]}
        })))
        .mount(&server)
        .await;

    let adapter = TiktokAdapter::new(&platform_config(&server), &OAuthConfig::default()).unwrap();
    let accounts = adapter.list_ad_accounts("tk-access").await.unwrap();
    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].name, "Storefront");
    assert_eq!(accounts[1].name, "TikTok advertiser 7002");
}

#[tokio::test]
async fn snapchat_skips_inactive_ad_accounts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me/organizations"))
        .and(query_param("with_ad_accounts", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organizations": [{
                "organization": {
                    "ad_accounts": [
                        { "id": "sa-1", "name": "Main", "status": "ACTIVE" },
                        { "id": "sa-2", "name": "Old", "status": "PAUSED" }
                    ]
                }
            }]
        })))
        .mount(&server)
        .await;

    let adapter =
        SnapchatAdapter::new(&platform_config(&server), &OAuthConfig::default()).unwrap();
    let accounts = adapter.list_ad_accounts("snap-access").await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, "sa-1");
}

#[tokio::test]
async fn malformed_token_body_is_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let adapter =
        SnapchatAdapter::new(&platform_config(&server), &OAuthConfig::default()).unwrap();
    let error = adapter.exchange_code("abc").await.unwrap_err();
    assert!(error.provider_message.starts_with("malformed response body"));
}

#[tokio::test]
async fn oauth_round_trip_through_configured_registry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "snap-access",
            "refresh_token": "snap-refresh",
            "expires_in": 1800
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/me/organizations"))
        .and(header("authorization", "Bearer snap-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organizations": [{ "organization": { "ad_accounts": [
                { "id": "sa-9", "name": "Launch account" }
            ]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_utils::test_config();
    config.snapchat = platform_config(&server);
    let registry = Registry::from_config(&config).unwrap();
    assert_eq!(registry.platforms(), vec![Platform::Snapchat]);

    let db = test_utils::setup_test_db().await.unwrap();
    let vault = TokenVault::from_secret(config.vault_secret.as_deref()).unwrap();
    let state = AppState::new(config, db, vault, registry);

    let owner = Uuid::new_v4();
    let project = state.projects.create_project(owner, "Snap launch").await.unwrap();
    let initiated = state
        .connections
        .initiate_oauth(owner, Platform::Snapchat, project.id, None)
        .await
        .unwrap();
    assert!(initiated.auth_url.starts_with(&server.uri()));

    let outcome = state
        .connections
        .handle_callback(Platform::Snapchat, "code-1", &initiated.state)
        .await
        .unwrap();
    let summary = state
        .connections
        .get_connections(owner, Some(project.id))
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.id == outcome.connection_id)
        .unwrap();
    assert_eq!(summary.status, ConnectionStatus::Connected);
    assert_eq!(summary.external_account_id.as_deref(), Some("sa-9"));
    assert!(summary.permissions.contains(&Permission::Launch));

    // Unregistered platforms cannot start a flow
    let err = state
        .connections
        .initiate_oauth(owner, Platform::Google, project.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_FAILED");

    let revoked = state
        .connections
        .revoke_connection(outcome.connection_id, owner, EventSource::Ui)
        .await
        .unwrap();
    assert_eq!(revoked.status, ConnectionStatus::Revoked);
}
