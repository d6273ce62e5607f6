//! Post-on-demand: `GET /api/post/:token` shares whatever is playing.
//!
//! The capability token in the URL identifies the user. When the user has
//! enabled a header token, the request must also carry
//! `Authorization: Bearer <token>`, which is hashed and compared against the
//! stored hash.

mod client;

pub use client::{PublishError, Publisher, POST_TIMEOUT, TWITTER_API_BASE};

use crate::auth::{extract_bearer_token, hash_token, TokenError};
use crate::credentials::{CredentialStore, StoreError, User};
use crate::oauth::refresh::{currently_playing_with_refresh, RefreshError};
use crate::spotify::{SpotifyApi, SpotifyError};
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_NOT_CONNECTED: &str = "not connected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTarget {
    Misskey,
    Twitter,
    Both,
}

impl PostTarget {
    /// Unknown or missing values mean both.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("misskey") => PostTarget::Misskey,
            Some("twitter") => PostTarget::Twitter,
            _ => PostTarget::Both,
        }
    }

    fn includes_misskey(self) -> bool {
        matches!(self, PostTarget::Misskey | PostTarget::Both)
    }

    fn includes_twitter(self) -> bool {
        matches!(self, PostTarget::Twitter | PostTarget::Both)
    }
}

/// Outcome of a post request. `message` holds the posted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostReport {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
}

impl PostReport {
    pub fn nothing_playing() -> Self {
        Self {
            success: false,
            message: "nothing is playing".to_string(),
            results: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("invalid token")]
    MalformedToken,
    #[error("token not found")]
    TokenNotFound,
    #[error("authorization header required")]
    MissingAuthorization,
    #[error("invalid authorization header format")]
    InvalidAuthorization,
    #[error("invalid token")]
    HeaderTokenMismatch,
    #[error("database error")]
    Store(#[source] StoreError),
    #[error("{}", refresh_message(.0))]
    Player(#[source] RefreshError),
}

fn refresh_message(err: &RefreshError) -> String {
    match err {
        RefreshError::NotConnected => "spotify not connected".to_string(),
        RefreshError::NoRefreshToken => {
            "spotify token expired and no refresh token available".to_string()
        }
        RefreshError::Refresh(_) => "failed to refresh spotify token".to_string(),
        RefreshError::Persist(_) => "failed to update spotify token".to_string(),
        RefreshError::Retry(_) => "failed to get player data after token refresh".to_string(),
        RefreshError::Spotify(SpotifyError::Api { status, .. }) => {
            format!("spotify api error: {status}")
        }
        RefreshError::Spotify(_) => "failed to get player data".to_string(),
    }
}

impl PostError {
    pub fn status(&self) -> StatusCode {
        match self {
            PostError::MalformedToken => StatusCode::BAD_REQUEST,
            PostError::TokenNotFound => StatusCode::NOT_FOUND,
            PostError::MissingAuthorization
            | PostError::InvalidAuthorization
            | PostError::HeaderTokenMismatch => StatusCode::UNAUTHORIZED,
            PostError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PostError::Player(err) => match err {
                RefreshError::NotConnected => StatusCode::BAD_REQUEST,
                RefreshError::NoRefreshToken | RefreshError::Refresh(_) => {
                    StatusCode::UNAUTHORIZED
                }
                RefreshError::Persist(_) | RefreshError::Retry(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                RefreshError::Spotify(SpotifyError::Api { .. }) => StatusCode::BAD_REQUEST,
                RefreshError::Spotify(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(Clone)]
pub struct NowPlayingPoster {
    spotify: Arc<dyn SpotifyApi>,
    store: Arc<CredentialStore>,
    publisher: Publisher,
}

impl NowPlayingPoster {
    pub fn new(
        spotify: Arc<dyn SpotifyApi>,
        store: Arc<CredentialStore>,
        publisher: Publisher,
    ) -> Self {
        Self {
            spotify,
            store,
            publisher,
        }
    }

    pub async fn post(
        &self,
        api_token: &str,
        headers: &HeaderMap,
        target: PostTarget,
    ) -> Result<PostReport, PostError> {
        let api_token = Uuid::parse_str(api_token).map_err(|_| PostError::MalformedToken)?;

        let user = self
            .store
            .get_user_by_api_token(api_token)
            .map_err(PostError::Store)?
            .ok_or(PostError::TokenNotFound)?;

        if user.api_header_token_enabled {
            verify_header_token(&user, headers)?;
        }

        let state = currently_playing_with_refresh(self.spotify.as_ref(), &self.store, &user)
            .await
            .map_err(|e| {
                warn!(user_id = %user.id, error = %e, "Failed to read Spotify player");
                PostError::Player(e)
            })?;

        let Some(playing) = state.as_ref().and_then(|s| s.now_playing()) else {
            return Ok(PostReport::nothing_playing());
        };
        let text = playing.share_text();

        let mut results = BTreeMap::new();

        if target.includes_misskey() {
            let outcome = match (
                user.misskey.is_connected(),
                user.misskey.instance_url.as_deref(),
                user.misskey.access_token.as_deref(),
            ) {
                (true, Some(instance), Some(token)) => {
                    describe(self.publisher.post_note(instance, token, &text).await)
                }
                _ => RESULT_NOT_CONNECTED.to_string(),
            };
            results.insert("misskey".to_string(), outcome);
        }

        if target.includes_twitter() {
            let outcome = match user.twitter.access_token.as_deref() {
                Some(token) if !token.is_empty() => {
                    describe(self.publisher.post_tweet(token, &text).await)
                }
                _ => RESULT_NOT_CONNECTED.to_string(),
            };
            results.insert("twitter".to_string(), outcome);
        }

        let success = results.values().any(|r| r == RESULT_SUCCESS);
        info!(user_id = %user.id, success, ?results, "Now playing posted");

        Ok(PostReport {
            success,
            message: text,
            results,
        })
    }
}

fn verify_header_token(user: &User, headers: &HeaderMap) -> Result<(), PostError> {
    let provided = extract_bearer_token(headers).map_err(|e| match e {
        TokenError::Missing => PostError::MissingAuthorization,
        TokenError::InvalidFormat | TokenError::Empty => PostError::InvalidAuthorization,
    })?;

    match user.api_header_token_hash.as_deref() {
        Some(stored) if stored == hash_token(&provided) => Ok(()),
        _ => Err(PostError::HeaderTokenMismatch),
    }
}

fn describe(result: Result<(), PublishError>) -> String {
    match result {
        Ok(()) => RESULT_SUCCESS.to_string(),
        Err(e) => format!("error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MisskeyProfile, TokenSet, TokenVault};
    use crate::spotify::fake::{api_error, playing_track, FakeSpotify};
    use axum::http::HeaderValue;

    struct Fixture {
        poster: NowPlayingPoster,
        store: Arc<CredentialStore>,
        spotify: Arc<FakeSpotify>,
        user: User,
    }

    fn fixture(publisher: Publisher) -> Fixture {
        let store = Arc::new(
            CredentialStore::new(":memory:", Arc::new(TokenVault::disabled())).unwrap(),
        );
        let user = store
            .create_or_update_user(
                "sp-1",
                &TokenSet {
                    access_token: "access".to_string(),
                    refresh_token: Some("refresh".to_string()),
                    expires_at: None,
                },
            )
            .unwrap();
        let spotify = Arc::new(FakeSpotify::default());
        let poster = NowPlayingPoster::new(spotify.clone(), Arc::clone(&store), publisher);
        Fixture {
            poster,
            store,
            spotify,
            user,
        }
    }

    fn offline_publisher() -> Publisher {
        Publisher::new(reqwest::Client::new())
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(PostTarget::parse(Some("Misskey")), PostTarget::Misskey);
        assert_eq!(PostTarget::parse(Some("twitter")), PostTarget::Twitter);
        assert_eq!(PostTarget::parse(Some("mastodon")), PostTarget::Both);
        assert_eq!(PostTarget::parse(None), PostTarget::Both);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens() {
        let f = fixture(offline_publisher());

        let err = f.poster.post("nope", &HeaderMap::new(), PostTarget::Both).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = f
            .poster
            .post(&Uuid::new_v4().to_string(), &HeaderMap::new(), PostTarget::Both)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "token not found");
    }

    #[tokio::test]
    async fn test_header_token_enforced() {
        let f = fixture(offline_publisher());
        f.store
            .set_api_header_token(f.user.id, &hash_token("secret-header"))
            .unwrap();
        let token = f.user.api_url_token.to_string();

        let err = f.poster.post(&token, &HeaderMap::new(), PostTarget::Both).await.unwrap_err();
        assert!(matches!(err, PostError::MissingAuthorization));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        let err = f.poster.post(&token, &headers, PostTarget::Both).await.unwrap_err();
        assert!(matches!(err, PostError::InvalidAuthorization));

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        let err = f.poster.post(&token, &headers, PostTarget::Both).await.unwrap_err();
        assert!(matches!(err, PostError::HeaderTokenMismatch));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        headers.insert("authorization", HeaderValue::from_static("Bearer secret-header"));
        let report = f.poster.post(&token, &headers, PostTarget::Both).await.unwrap();
        assert_eq!(report, PostReport::nothing_playing());
    }

    #[tokio::test]
    async fn test_nothing_playing() {
        let f = fixture(offline_publisher());
        let report = f
            .poster
            .post(&f.user.api_url_token.to_string(), &HeaderMap::new(), PostTarget::Both)
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.message, "nothing is playing");
    }

    #[tokio::test]
    async fn test_unlinked_targets_report_not_connected() {
        let f = fixture(offline_publisher());
        f.spotify.push_player(Ok(Some(playing_track())));

        let report = f
            .poster
            .post(&f.user.api_url_token.to_string(), &HeaderMap::new(), PostTarget::Both)
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.message, "Song / Artist\n#NowPlaying #PsrPlaying\nhttps://open.spotify.com/track/1");
        assert_eq!(report.results["misskey"], RESULT_NOT_CONNECTED);
        assert_eq!(report.results["twitter"], RESULT_NOT_CONNECTED);
    }

    #[tokio::test]
    async fn test_posts_to_selected_target_only() {
        let mut server = mockito::Server::new_async().await;
        let note = server
            .mock("POST", "/api/notes/create")
            .with_status(200)
            .create_async()
            .await;

        let f = fixture(offline_publisher());
        f.store
            .update_misskey_token(f.user.id, &server.url(), "mk", &MisskeyProfile::default(), "mk")
            .unwrap();
        f.spotify.push_player(Ok(Some(playing_track())));

        let report = f
            .poster
            .post(&f.user.api_url_token.to_string(), &HeaderMap::new(), PostTarget::Misskey)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results["misskey"], RESULT_SUCCESS);
        note.assert_async().await;
    }

    #[tokio::test]
    async fn test_partial_failure_still_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let _note = server
            .mock("POST", "/api/notes/create")
            .with_status(200)
            .create_async()
            .await;
        let _tweet = server
            .mock("POST", "/2/tweets")
            .with_status(429)
            .with_body("too many requests")
            .create_async()
            .await;

        let f = fixture(offline_publisher().with_twitter_base(server.url()));
        f.store
            .update_misskey_token(f.user.id, &server.url(), "mk", &MisskeyProfile::default(), "mk")
            .unwrap();
        f.store
            .update_twitter_token(
                f.user.id,
                &TokenSet {
                    access_token: "tw".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
                &Default::default(),
            )
            .unwrap();
        f.spotify.push_player(Ok(Some(playing_track())));

        let report = f
            .poster
            .post(&f.user.api_url_token.to_string(), &HeaderMap::new(), PostTarget::Both)
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.results["misskey"], RESULT_SUCCESS);
        assert_eq!(
            report.results["twitter"],
            "error: twitter api error: 429 - too many requests"
        );
    }

    #[tokio::test]
    async fn test_spotify_error_statuses() {
        let f = fixture(offline_publisher());
        f.spotify.push_player(Err(api_error(503)));

        let err = f
            .poster
            .post(&f.user.api_url_token.to_string(), &HeaderMap::new(), PostTarget::Both)
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "spotify api error: 503");
    }
}
