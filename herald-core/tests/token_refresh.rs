//! Integration tests for session token refresh.
//!
//! These tests verify that the AuthRefresher correctly:
//! - Serves cached tokens without touching the network
//! - Refreshes expiring tokens exactly once
//! - Follows secret rotation across restarts
//! - Leaves cache and store untouched when a refresh fails

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use herald_core::{
    ApiClient, ApiConfig, AuthRefresher, JsonFileStore, MemoryStore, PersistedTokenRecord,
    TokenCache, TokenCacheEntry, TokenError, TokenRecords, TokenStore,
};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

const REFRESH_PATH: &str = "/auth/v1/oauth/refresh";

/// Build an unsigned session token expiring `expires_in` from now.
fn session_token(sub: &str, expires_in: Duration) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({"sub": sub, "exp": (Utc::now() + expires_in).timestamp()});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

fn refresh_response(session: &str, rotated: Option<&str>) -> ResponseTemplate {
    let template = ResponseTemplate::new(200)
        .append_header("set-cookie", format!("accessToken2={}; Path=/; HttpOnly", session).as_str());
    match rotated {
        Some(secret) => template.append_header(
            "set-cookie",
            format!("refreshToken2={}; Path=/; HttpOnly", secret).as_str(),
        ),
        None => template,
    }
}

fn api_for(server: &MockServer) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(ApiConfig::with_base_url(&server.uri())).unwrap())
}

fn refresher_with<S: TokenStore>(server: &MockServer, store: S) -> AuthRefresher<S> {
    AuthRefresher::new(api_for(server), Arc::new(TokenCache::new()), store)
}

#[tokio::test]
async fn test_cached_valid_token_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let refresher = refresher_with(&server, MemoryStore::new());
    let session = session_token("user-1", Duration::hours(1));
    refresher.cache().put(
        "rt-1",
        TokenCacheEntry::new(session.as_str(), "rt-1", Some(Utc::now() + Duration::hours(1))),
    );

    let token = refresher.get_valid_session_token("rt-1", None).await.unwrap();
    assert_eq!(token.expose(), session);
}

#[tokio::test]
async fn test_expiring_token_refreshes_once() {
    let server = MockServer::start().await;
    let fresh = session_token("user-1", Duration::hours(1));

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("cookie", "refreshToken2=rt-1"))
        .respond_with(refresh_response(&fresh, None))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = refresher_with(&server, MemoryStore::new());
    refresher.cache().put(
        "rt-1",
        TokenCacheEntry::new("old-session", "rt-1", Some(Utc::now() + Duration::seconds(20))),
    );

    let token = refresher.get_valid_session_token("rt-1", None).await.unwrap();
    assert_eq!(token.expose(), fresh);

    // Second lookup is served from cache.
    let again = refresher.get_valid_session_token("rt-1", None).await.unwrap();
    assert_eq!(again.expose(), fresh);

    // An opaque secret is keyed by its own prefix.
    let records = refresher.store().snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records["rt-1"].session.expose(), fresh);
}

#[tokio::test]
async fn test_cached_entry_refreshes_with_rotated_secret() {
    let server = MockServer::start().await;
    let fresh = session_token("user-1", Duration::hours(1));

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("cookie", "refreshToken2=rt-rotated"))
        .respond_with(refresh_response(&fresh, None))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = refresher_with(&server, MemoryStore::new());
    refresher.cache().put(
        "rt-original",
        TokenCacheEntry::new("old-session", "rt-rotated", Some(Utc::now() - Duration::hours(1))),
    );

    let token = refresher
        .get_valid_session_token("rt-original", None)
        .await
        .unwrap();
    assert_eq!(token.expose(), fresh);
}

/// Mount a refresh mock answering only for `secret`.
async fn mount_refresh(
    server: &MockServer,
    secret: &str,
    response: ResponseTemplate,
    calls: u64,
) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("cookie", format!("refreshToken2={}", secret).as_str()))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_rotation_survives_restart() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let token_file = temp_dir.path().join("tokens.json");

    // Secrets carry the user's subject, like the session tokens.
    let original = session_token("user-1", Duration::days(30));
    let rotated = session_token("user-1", Duration::days(31));

    // First refresh rotates the secret and issues a token inside the margin.
    let short_lived = session_token("user-1", Duration::seconds(30));
    mount_refresh(&server, &original, refresh_response(&short_lived, Some(&rotated)), 1).await;

    let fresh = session_token("user-1", Duration::hours(1));
    mount_refresh(&server, &rotated, refresh_response(&fresh, None), 1).await;

    {
        let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
        let token = refresher.get_valid_session_token(&original, None).await.unwrap();
        assert_eq!(token.expose(), short_lived);

        // Every secret involved maps to the new entry.
        assert!(refresher.cache().get(&original).is_some());
        assert!(refresher.cache().get(&rotated).is_some());
    }

    // A new process presents the original secret again.
    let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
    let token = refresher.get_valid_session_token(&original, None).await.unwrap();
    assert_eq!(token.expose(), fresh);

    let records = JsonFileStore::new(&token_file).load().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records["user-1"].secret.expose(), rotated);
    assert_eq!(records["user-1"].session.expose(), fresh);
}

#[tokio::test]
async fn test_rotation_of_opaque_secret_survives_restart() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let token_file = temp_dir.path().join("tokens.json");

    let short_lived = session_token("user-1", Duration::seconds(30));
    mount_refresh(
        &server,
        "rt-original-opaque",
        refresh_response(&short_lived, Some("rt-rotated")),
        1,
    )
    .await;

    let fresh = session_token("user-1", Duration::hours(1));
    mount_refresh(&server, "rt-rotated", refresh_response(&fresh, None), 1).await;

    {
        let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
        refresher
            .get_valid_session_token("rt-original-opaque", None)
            .await
            .unwrap();
    }

    let records = JsonFileStore::new(&token_file).load().await.unwrap();
    assert_eq!(records["rt-original-opa"].secret.expose(), "rt-rotated");

    // A new process with no session hint still finds the rotated secret.
    let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
    let token = refresher
        .get_valid_session_token("rt-original-opaque", None)
        .await
        .unwrap();
    assert_eq!(token.expose(), fresh);
}

#[tokio::test]
async fn test_store_write_failure_does_not_fail_refresh() {
    let server = MockServer::start().await;
    let fresh = session_token("user-1", Duration::hours(1));
    mount_refresh(&server, "rt-1", refresh_response(&fresh, None), 1).await;

    // The token file's parent is a regular file, so every write fails.
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let token_file = blocker.join("tokens.json");

    let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
    let token = refresher.get_valid_session_token("rt-1", None).await.unwrap();

    assert_eq!(token.expose(), fresh);
    assert_eq!(refresher.cache().get("rt-1").unwrap().session.expose(), fresh);
    assert!(!token_file.exists());
}

#[tokio::test]
async fn test_persisted_valid_token_adopted_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let persisted = session_token("user-1", Duration::hours(2));
    let mut records = TokenRecords::new();
    records.insert(
        "rt-1".to_string(),
        PersistedTokenRecord::new("rt-1", persisted.as_str()),
    );

    let refresher = refresher_with(&server, MemoryStore::with_data(records));
    let token = refresher.get_valid_session_token("rt-1", None).await.unwrap();

    assert_eq!(token.expose(), persisted);
    assert!(refresher.cache().get("rt-1").is_some());
}

#[tokio::test]
async fn test_refresh_failure_leaves_state_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = refresher_with(&server, MemoryStore::new());
    let result = refresher.get_valid_session_token("rt-bad", None).await;

    assert!(matches!(
        result,
        Err(TokenError::RefreshFailed {
            status: Some(401),
            ..
        })
    ));
    assert!(refresher.cache().is_empty());
    assert!(refresher.store().snapshot().is_empty());
}

#[tokio::test]
async fn test_missing_session_cookie_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200).append_header("set-cookie", "refreshToken2=rt-new; Path=/"),
        )
        .mount(&server)
        .await;

    let refresher = refresher_with(&server, MemoryStore::new());
    let result = refresher.get_valid_session_token("rt-1", None).await;

    assert!(matches!(result, Err(TokenError::MissingSessionToken)));
    assert!(refresher.cache().is_empty());
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_refresh() {
    let server = MockServer::start().await;
    let fresh = session_token("user-1", Duration::hours(1));

    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_response(&fresh, None).set_delay(std::time::Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(refresher_with(&server, MemoryStore::new()));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.get_valid_session_token("rt-1", None).await })
        })
        .collect();

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token.expose(), fresh);
    }
}

#[tokio::test]
async fn test_corrupt_token_file_does_not_fail_request() {
    let server = MockServer::start().await;
    let fresh = session_token("user-1", Duration::hours(1));
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_response(&fresh, None))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let token_file = temp_dir.path().join("tokens.json");
    std::fs::write(&token_file, "{definitely not json").unwrap();

    let refresher = refresher_with(&server, JsonFileStore::new(&token_file));
    let token = refresher.get_valid_session_token("rt-1", None).await.unwrap();
    assert_eq!(token.expose(), fresh);

    // The refresh rewrote the file with a valid mapping.
    let records = JsonFileStore::new(&token_file).load().await.unwrap();
    assert!(records.contains_key("rt-1"));
}
