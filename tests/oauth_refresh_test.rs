// Integration tests for the OAuth refresh path against a stub token
// endpoint

use agentvault::platforms::OAuthEndpoint;
use agentvault::vault::{
    needs_refresh, refresh_access_token, CredentialStore, OAuthTokens, RefreshError,
};
use mockito::Matcher;
use serde_json::json;

fn test_store() -> CredentialStore {
    let key = hex::encode([0u8; 32]);
    CredentialStore::new(":memory:", &key).unwrap()
}

fn endpoint(token_url: String) -> OAuthEndpoint {
    OAuthEndpoint {
        token_url,
        client_id: "client-1".to_string(),
        client_secret: "shhh".to_string(),
    }
}

fn tokens(access: &str, refresh: Option<&str>, expires_in: Option<i64>) -> OAuthTokens {
    OAuthTokens {
        access_token: access.to_string(),
        refresh_token: refresh.map(|s| s.to_string()),
        expires_in,
        scope: None,
    }
}

#[tokio::test]
async fn test_expired_token_refreshes_and_updates_store() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "R".into()),
            Matcher::UrlEncoded("client_id".into(), "client-1".into()),
            Matcher::UrlEncoded("client_secret".into(), "shhh".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": "A2", "expires_in": 3600}).to_string())
        .create_async()
        .await;

    let store = test_store();
    // A token that expired moments after issue
    store
        .store_oauth("u1", "w1", "notion", &tokens("A", Some("R"), Some(10)), None)
        .unwrap();

    let current = store.retrieve_oauth("u1", "w1", "notion").unwrap().unwrap();
    assert!(needs_refresh(&current));

    let refreshed = refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint(format!("{}/token", server.url())),
    )
    .await
    .unwrap();
    mock.assert_async().await;

    assert_eq!(refreshed.access_token, "A2");
    // Provider omitted a new refresh token, so the old one is kept
    assert_eq!(refreshed.refresh_token.as_deref(), Some("R"));

    // The store now serves the new access token with a fresh expiry
    let stored = store.retrieve_oauth("u1", "w1", "notion").unwrap().unwrap();
    assert_eq!(stored.access_token, "A2");
    assert_eq!(stored.refresh_token.as_deref(), Some("R"));
    assert!(!needs_refresh(&stored));
}

#[tokio::test]
async fn test_rotated_refresh_token_replaces_stored_one() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"access_token": "A2", "refresh_token": "R2", "expires_in": 3600}).to_string(),
        )
        .create_async()
        .await;

    let store = test_store();
    store
        .store_oauth("u1", "w1", "notion", &tokens("A", Some("R"), Some(10)), None)
        .unwrap();

    refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint(format!("{}/token", server.url())),
    )
    .await
    .unwrap();

    let stored = store.retrieve_oauth("u1", "w1", "notion").unwrap().unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_refresh_preserves_metadata() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": "A2", "expires_in": 3600}).to_string())
        .create_async()
        .await;

    let store = test_store();
    store
        .store_oauth(
            "u1",
            "w1",
            "notion",
            &tokens("A", Some("R"), Some(10)),
            Some(&json!({"workspace": "Acme"})),
        )
        .unwrap();

    refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint(format!("{}/token", server.url())),
    )
    .await
    .unwrap();

    let stored = store.retrieve_oauth("u1", "w1", "notion").unwrap().unwrap();
    assert_eq!(stored.metadata.unwrap()["workspace"], "Acme");
}

#[tokio::test]
async fn test_upstream_rejection_is_terminal_with_diagnostics() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = test_store();
    store
        .store_oauth("u1", "w1", "notion", &tokens("A", Some("R"), Some(10)), None)
        .unwrap();

    let result = refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint(format!("{}/token", server.url())),
    )
    .await;

    match result {
        Err(RefreshError::Upstream { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("Expected Upstream error, got {:?}", other.map(|t| t.access_token)),
    }

    // Exactly one attempt: no automatic retry
    mock.assert_async().await;

    // The stored credential is untouched
    let stored = store.retrieve_oauth("u1", "w1", "notion").unwrap().unwrap();
    assert_eq!(stored.access_token, "A");
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let store = test_store();
    store
        .store_oauth("u1", "w1", "notion", &tokens("A", None, Some(10)), None)
        .unwrap();

    let result = refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint("http://127.0.0.1:1/token".to_string()),
    )
    .await;

    assert!(matches!(result, Err(RefreshError::NoRefreshToken)));
}

#[tokio::test]
async fn test_refresh_never_connected() {
    let store = test_store();

    let result = refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint("http://127.0.0.1:1/token".to_string()),
    )
    .await;

    assert!(matches!(result, Err(RefreshError::NotConnected)));
}

#[tokio::test]
async fn test_refresh_after_disconnect_is_not_connected() {
    let store = test_store();
    store
        .store_oauth("u1", "w1", "notion", &tokens("A", Some("R"), Some(10)), None)
        .unwrap();
    store.deactivate("u1", "w1", "notion").unwrap();

    let result = refresh_access_token(
        &store,
        "u1",
        "w1",
        "notion",
        &endpoint("http://127.0.0.1:1/token".to_string()),
    )
    .await;

    assert!(matches!(result, Err(RefreshError::NotConnected)));
}
