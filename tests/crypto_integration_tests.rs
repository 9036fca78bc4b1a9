//! Credential material at rest: what lands in the connections table is sealed, bound to
//! its row and never readable as plaintext.

mod test_utils;

use launchgate::crypto::{TokenVault, VaultError, is_encrypted_payload};
use launchgate::models::Platform;
use launchgate::repositories::ConnectionRepository;
use test_utils::{TestHarness, test_config};
use uuid::Uuid;

#[tokio::test]
async fn stored_credentials_are_sealed_and_row_bound() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Google).await.unwrap();

    let row = ConnectionRepository::new(harness.db())
        .find_by_id(id)
        .await
        .unwrap()
        .unwrap();
    let blob = row.credentials_ciphertext.expect("connected rows hold credentials");
    assert!(is_encrypted_payload(&blob));
    assert!(!String::from_utf8_lossy(&blob).contains("access-code"));

    let vault = TokenVault::from_secret(test_config().vault_secret.as_deref()).unwrap();
    let tokens = vault.open_token_set(id, Platform::Google, &blob).unwrap();
    assert_eq!(tokens.access_token, "access-code");

    // Sealed for one row, useless for another
    assert!(matches!(
        vault.open_token_set(Uuid::new_v4(), Platform::Google, &blob),
        Err(VaultError::Decryption)
    ));
    assert!(matches!(
        vault.open_token_set(id, Platform::Tiktok, &blob),
        Err(VaultError::Decryption)
    ));
}

#[tokio::test]
async fn a_different_secret_cannot_open_stored_credentials() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Snapchat).await.unwrap();

    let blob = ConnectionRepository::new(harness.db())
        .find_by_id(id)
        .await
        .unwrap()
        .unwrap()
        .credentials_ciphertext
        .unwrap();

    let other = TokenVault::from_secret(Some("some other deployment")).unwrap();
    assert!(other.open_token_set(id, Platform::Snapchat, &blob).is_err());
}

#[tokio::test]
async fn revoked_connections_keep_no_credentials() {
    let harness = TestHarness::new().await.unwrap();
    let owner = Uuid::new_v4();
    let project = harness.project(owner).await.unwrap();
    let id = harness.connect(owner, project.id, Platform::Tiktok).await.unwrap();

    harness
        .state
        .connections
        .revoke_connection(id, owner, launchgate::models::domain_event::EventSource::Ui)
        .await
        .unwrap();

    let row = ConnectionRepository::new(harness.db())
        .find_by_id(id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.credentials_ciphertext.is_none());
    assert!(row.token_expires_at.is_none());
}

#[test]
fn vault_requires_a_secret() {
    assert!(matches!(
        TokenVault::from_secret(None),
        Err(VaultError::MissingSecret)
    ));
    assert!(matches!(
        TokenVault::from_secret(Some("   ")),
        Err(VaultError::MissingSecret)
    ));
}
