// Integration tests for session enforcement and the account settings API

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use nowplaying::api::{create_router, AppState};
use nowplaying::auth::{hash_token, SessionConfig, SessionIssuer};
use nowplaying::credentials::{CredentialStore, TokenSet, TokenVault, User};
use nowplaying::oauth::eligibility::TwitterConfig;
use nowplaying::oauth::provider::ProviderConfig;
use nowplaying::oauth::OAuthSettings;
use nowplaying::spotify::SpotifyClient;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    store: Arc<CredentialStore>,
    issuer: Arc<SessionIssuer>,
    user: User,
    server: mockito::ServerGuard,
}

async fn test_app(twitter: TwitterConfig) -> TestApp {
    let server = mockito::Server::new_async().await;
    let store = Arc::new(
        CredentialStore::new(":memory:", Arc::new(TokenVault::disabled())).unwrap(),
    );
    let issuer = Arc::new(SessionIssuer::new(SessionConfig::new(SECRET)));
    let spotify = Arc::new(
        SpotifyClient::new(
            reqwest::Client::new(),
            ProviderConfig::spotify("id", "secret")
                .with_token_url(format!("{}/api/token", server.url())),
        )
        .with_api_base(server.url()),
    );
    let user = store
        .create_or_update_user(
            "sp-1",
            &TokenSet {
                access_token: "spotify-access".to_string(),
                refresh_token: Some("spotify-refresh".to_string()),
                expires_at: None,
            },
        )
        .unwrap();

    let state = AppState::new(
        Arc::clone(&store),
        Arc::clone(&issuer),
        spotify,
        reqwest::Client::new(),
        OAuthSettings::new("https://np.example"),
        twitter,
    );

    TestApp {
        router: create_router(state),
        store,
        issuer,
        user,
        server,
    }
}

impl TestApp {
    fn session_cookie(&self) -> String {
        let token = self.issuer.issue(self.user.id, &self.user.spotify_user_id).unwrap();
        format!("session_token={token}")
    }

    async fn send(&self, method: &str, uri: &str, cookie: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ── Session enforcement ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = test_app(TwitterConfig::default()).await;

    for (method, uri) in [
        ("GET", "/api/me"),
        ("POST", "/api/logout"),
        ("GET", "/api/config"),
        ("DELETE", "/api/miauth"),
        ("GET", "/api/twitter/start"),
        ("DELETE", "/api/twitter"),
        ("POST", "/api/settings/header-token"),
        ("DELETE", "/api/settings/header-token"),
        ("POST", "/api/settings/api-url-token/regenerate"),
    ] {
        let response = app.send(method, uri, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(json_body(response).await["error"], "unauthorized");
    }
}

#[tokio::test]
async fn test_forged_session_is_invalid() {
    let app = test_app(TwitterConfig::default()).await;
    let forger = SessionIssuer::new(SessionConfig::new("not-the-secret"));
    let token = forger.issue(app.user.id, "sp-1").unwrap();

    let response = app
        .send("GET", "/api/me", Some(&format!("session_token={token}")))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(json_body(response).await["error"], "invalid session");
}

#[tokio::test]
async fn test_expired_session_clears_cookie() {
    let app = test_app(TwitterConfig::default()).await;
    let expired = SessionIssuer::new(
        SessionConfig::new(SECRET).with_duration(Duration::seconds(-30)),
    );
    let token = expired.issue(app.user.id, "sp-1").unwrap();

    let response = app
        .send("GET", "/api/me", Some(&format!("session_token={token}")))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(json_body(response).await["error"], "session expired");
}

#[tokio::test]
async fn test_auth_check_never_fails() {
    let app = test_app(TwitterConfig::default()).await;

    let anonymous = app.send("GET", "/api/auth/check", None).await;
    assert_eq!(anonymous.status(), StatusCode::OK);
    assert_eq!(json_body(anonymous).await, serde_json::json!({"authenticated": false}));

    let cookie = app.session_cookie();
    let known = app.send("GET", "/api/auth/check", Some(&cookie)).await;
    let body = json_body(known).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user_id"], app.user.id.to_string());
    assert_eq!(body["spotify_user_id"], "sp-1");
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = test_app(TwitterConfig::default()).await;
    let cookie = app.session_cookie();

    let response = app.send("POST", "/api/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("session_token=;"));
    assert_eq!(json_body(response).await["message"], "logged out");
}

// ── Account settings ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_me_includes_live_spotify_profile() {
    let mut app = test_app(TwitterConfig::default()).await;
    let _profile = app
        .server
        .mock("GET", "/v1/me")
        .match_header("authorization", "Bearer spotify-access")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"sp-1","display_name":"Alice","images":[{"url":"https://i.scdn.co/a.jpg"}]}"#)
        .create_async()
        .await;
    let cookie = app.session_cookie();

    let response = app.send("GET", "/api/me", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], app.user.id.to_string());
    assert_eq!(body["spotify_display_name"], "Alice");
    assert_eq!(body["spotify_image_url"], "https://i.scdn.co/a.jpg");
    assert_eq!(body["misskey_connected"], false);
    assert_eq!(body["twitter_connected"], false);
    assert_eq!(body["api_url_token"], app.user.api_url_token.to_string());
    assert_eq!(body["api_header_token_enabled"], false);
}

#[tokio::test]
async fn test_me_survives_spotify_outage() {
    let mut app = test_app(TwitterConfig::default()).await;
    let _profile = app
        .server
        .mock("GET", "/v1/me")
        .with_status(503)
        .create_async()
        .await;
    let cookie = app.session_cookie();

    let response = app.send("GET", "/api/me", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["spotify_display_name"].is_null());
    assert_eq!(body["spotify_user_id"], "sp-1");
}

#[tokio::test]
async fn test_header_token_lifecycle() {
    let app = test_app(TwitterConfig::default()).await;
    let cookie = app.session_cookie();

    let response = app.send("POST", "/api/settings/header-token", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);

    let stored = app.store.get_user_by_id(app.user.id).unwrap().unwrap();
    assert!(stored.api_header_token_enabled);
    assert_eq!(stored.api_header_token_hash, Some(hash_token(&token)));

    let response = app.send("DELETE", "/api/settings/header-token", Some(&cookie)).await;
    assert_eq!(json_body(response).await["message"], "header token disabled");
    let stored = app.store.get_user_by_id(app.user.id).unwrap().unwrap();
    assert!(!stored.api_header_token_enabled);
}

#[tokio::test]
async fn test_regenerate_api_url_token() {
    let app = test_app(TwitterConfig::default()).await;
    let cookie = app.session_cookie();

    let response = app
        .send("POST", "/api/settings/api-url-token/regenerate", Some(&cookie))
        .await;

    let body = json_body(response).await;
    let new_token = body["api_url_token"].as_str().unwrap().to_string();
    assert_ne!(new_token, app.user.api_url_token.to_string());
    assert!(app.store.get_user_by_api_token(app.user.api_url_token).unwrap().is_none());
}

#[tokio::test]
async fn test_app_config_reports_eligibility() {
    let app = test_app(TwitterConfig {
        require_misskey: true,
        client_id: "tw".to_string(),
        client_secret: "secret".to_string(),
        ..Default::default()
    })
    .await;
    let cookie = app.session_cookie();

    let body = json_body(app.send("GET", "/api/config", Some(&cookie)).await).await;

    assert_eq!(body["twitter_available"], true);
    assert_eq!(body["twitter_eligibility"]["eligible"], false);
    assert_eq!(body["twitter_eligibility"]["reason"], "Misskey connection required");
}

#[tokio::test]
async fn test_twitter_start_forbidden_when_unavailable() {
    let app = test_app(TwitterConfig::default()).await;
    let cookie = app.session_cookie();

    let response = app.send("GET", "/api/twitter/start", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        json_body(response).await["error"],
        "Twitter integration is not available"
    );
}
