//! HTTP surface: login and linking callbacks, account settings, and
//! post-on-demand.

pub mod auth_middleware;
mod oauth;
mod post;
mod settings;

pub use auth_middleware::{authenticate, require_session, SessionIdentity, SessionRejection};

use crate::auth::SessionIssuer;
use crate::credentials::CredentialStore;
use crate::oauth::eligibility::TwitterConfig;
use crate::oauth::miauth::MiAuthFlow;
use crate::oauth::spotify::SpotifyLogin;
use crate::oauth::twitter::TwitterFlow;
use crate::oauth::OAuthSettings;
use crate::publish::{NowPlayingPoster, Publisher};
use crate::spotify::SpotifyApi;
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub issuer: Arc<SessionIssuer>,
    pub spotify: Arc<dyn SpotifyApi>,
    pub spotify_login: SpotifyLogin,
    pub miauth: MiAuthFlow,
    pub twitter: TwitterFlow,
    pub poster: NowPlayingPoster,
}

impl AppState {
    pub fn new(
        store: Arc<CredentialStore>,
        issuer: Arc<SessionIssuer>,
        spotify: Arc<dyn SpotifyApi>,
        http: reqwest::Client,
        settings: OAuthSettings,
        twitter: TwitterConfig,
    ) -> Self {
        Self {
            spotify_login: SpotifyLogin::new(
                Arc::clone(&spotify),
                Arc::clone(&store),
                Arc::clone(&issuer),
                &settings,
            ),
            miauth: MiAuthFlow::new(http.clone(), Arc::clone(&store), settings.clone()),
            twitter: TwitterFlow::new(http.clone(), Arc::clone(&store), twitter, &settings),
            poster: NowPlayingPoster::new(
                Arc::clone(&spotify),
                Arc::clone(&store),
                Publisher::new(http),
            ),
            store,
            issuer,
            spotify,
        }
    }

    /// Replaces the Twitter flow (alternate endpoints in tests).
    pub fn with_twitter_flow(mut self, twitter: TwitterFlow) -> Self {
        self.twitter = twitter;
        self
    }

    /// Replaces the outbound publisher (alternate endpoints in tests).
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.poster = NowPlayingPoster::new(
            Arc::clone(&self.spotify),
            Arc::clone(&self.store),
            publisher,
        );
        self
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// JSON errors for the settings and linking endpoints.
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    ServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[derive(Serialize)]
pub(crate) struct MessageResponse {
    message: &'static str,
}

pub(crate) fn message(message: &'static str) -> Json<MessageResponse> {
    Json(MessageResponse { message })
}

/// Build the full router. Routes behind [`require_session`] answer 401 JSON
/// without a valid session cookie.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let protected = Router::new()
        .route("/api/me", get(settings::me))
        .route("/api/logout", post(settings::logout))
        .route("/api/config", get(settings::app_config))
        .route("/api/miauth/start", post(oauth::miauth_start))
        .route("/api/miauth", delete(oauth::miauth_disconnect))
        .route("/api/twitter/start", get(oauth::twitter_start))
        .route("/api/twitter", delete(oauth::twitter_disconnect))
        .route(
            "/api/settings/header-token",
            post(settings::generate_header_token).delete(settings::disable_header_token),
        )
        .route(
            "/api/settings/api-url-token/regenerate",
            post(settings::regenerate_api_url_token),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_session,
        ));

    Router::new()
        .route("/api/auth/check", get(oauth::auth_check))
        .route("/api/auth/spotify", get(oauth::spotify_start))
        .route("/api/auth/spotify/callback", get(oauth::spotify_callback))
        .route("/api/miauth/callback", get(oauth::miauth_callback))
        .route("/api/twitter/callback", get(oauth::twitter_callback))
        .route("/api/post/:token", get(post::post_now_playing))
        .merge(protected)
        .with_state(state)
}
