//! Account endpoints for the logged-in user.

use super::auth_middleware::SessionIdentity;
use super::{message, ApiError, AppState};
use crate::auth::{generate_random_token, hash_token};
use crate::credentials::User;
use crate::oauth::eligibility::Eligibility;
use axum::{
    extract::State,
    http::header::SET_COOKIE,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Random bytes in a header token (64 hex characters).
const HEADER_TOKEN_BYTES: usize = 32;

#[derive(Serialize)]
pub struct MeResponse {
    id: String,
    spotify_user_id: String,
    spotify_display_name: Option<String>,
    spotify_image_url: Option<String>,
    misskey_connected: bool,
    misskey_instance_url: Option<String>,
    misskey_user_id: Option<String>,
    misskey_username: Option<String>,
    misskey_avatar_url: Option<String>,
    misskey_host: Option<String>,
    twitter_connected: bool,
    twitter_user_id: Option<String>,
    twitter_username: Option<String>,
    twitter_avatar_url: Option<String>,
    api_url_token: String,
    api_header_token_enabled: bool,
}

#[derive(Serialize)]
pub struct AppConfigResponse {
    twitter_available: bool,
    twitter_eligibility: Eligibility,
}

#[derive(Serialize)]
pub struct HeaderTokenResponse {
    token: String,
    message: &'static str,
}

#[derive(Serialize)]
pub struct RegenerateResponse {
    api_url_token: String,
}

fn load_user(state: &AppState, identity: &SessionIdentity) -> Result<User, ApiError> {
    state
        .store
        .get_user_by_id(identity.user_id)
        .map_err(|e| {
            error!(user_id = %identity.user_id, error = %e, "Failed to load user");
            ApiError::ServerError("failed to get user".to_string())
        })?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

/// Empty strings from legacy rows are reported as absent.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// GET /api/me
///
/// The Spotify profile is fetched live and left out if Spotify is unreachable.
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Json<MeResponse>, ApiError> {
    let user = load_user(&state, &identity)?;

    let profile = match user.spotify.access_token.as_deref() {
        Some(token) if !token.is_empty() => match state.spotify.current_user(token).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                debug!(user_id = %user.id, error = %e, "Spotify profile unavailable for /api/me");
                None
            }
        },
        _ => None,
    };

    let misskey_connected = user.misskey.is_connected();
    let twitter_connected = user.twitter.is_connected();

    Ok(Json(MeResponse {
        id: user.id.to_string(),
        spotify_user_id: user.spotify_user_id,
        spotify_display_name: profile.as_ref().and_then(|p| p.display_name.clone()),
        spotify_image_url: profile
            .as_ref()
            .and_then(|p| p.image_url())
            .map(str::to_string),
        misskey_connected,
        misskey_instance_url: present(user.misskey.instance_url),
        misskey_user_id: present(user.misskey.user_id),
        misskey_username: present(user.misskey.username),
        misskey_avatar_url: present(user.misskey.avatar_url),
        misskey_host: present(user.misskey.host),
        twitter_connected,
        twitter_user_id: present(user.twitter.user_id),
        twitter_username: present(user.twitter.username),
        twitter_avatar_url: present(user.twitter.avatar_url),
        api_url_token: user.api_url_token.to_string(),
        api_header_token_enabled: user.api_header_token_enabled,
    }))
}

/// POST /api/logout
pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    (
        [(SET_COOKIE, state.issuer.clear_cookie())],
        message("logged out"),
    )
        .into_response()
}

/// GET /api/config
pub async fn app_config(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Json<AppConfigResponse> {
    let config = state.twitter.config();

    let twitter_eligibility = match state.store.get_user_by_id(identity.user_id) {
        Ok(Some(user)) => config.check_eligibility(
            user.misskey.is_connected(),
            user.misskey.instance_url.as_deref().unwrap_or_default(),
        ),
        Ok(None) => Eligibility::denied("User not found"),
        Err(e) => {
            error!(user_id = %identity.user_id, error = %e, "Failed to load user for eligibility");
            Eligibility::denied("User not found")
        }
    };

    Json(AppConfigResponse {
        twitter_available: config.is_available(),
        twitter_eligibility,
    })
}

/// POST /api/settings/header-token
///
/// The plaintext token is returned once; only its hash is stored.
pub async fn generate_header_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Json<HeaderTokenResponse>, ApiError> {
    let token = generate_random_token(HEADER_TOKEN_BYTES);

    state
        .store
        .set_api_header_token(identity.user_id, &hash_token(&token))
        .map_err(|e| {
            error!(user_id = %identity.user_id, error = %e, "Failed to save header token");
            ApiError::ServerError("failed to save token".to_string())
        })?;

    info!(user_id = %identity.user_id, "Header token generated");

    Ok(Json(HeaderTokenResponse {
        token,
        message: "Token generated successfully. Save this token - it will not be shown again.",
    }))
}

/// DELETE /api/settings/header-token
pub async fn disable_header_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Response, ApiError> {
    state
        .store
        .disable_api_header_token(identity.user_id)
        .map_err(|e| {
            error!(user_id = %identity.user_id, error = %e, "Failed to disable header token");
            ApiError::ServerError("failed to disable token".to_string())
        })?;

    Ok(message("header token disabled").into_response())
}

/// POST /api/settings/api-url-token/regenerate
pub async fn regenerate_api_url_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Json<RegenerateResponse>, ApiError> {
    let token = state
        .store
        .regenerate_api_url_token(identity.user_id)
        .map_err(|e| {
            error!(user_id = %identity.user_id, error = %e, "Failed to regenerate API URL token");
            ApiError::ServerError("failed to regenerate token".to_string())
        })?;

    Ok(Json(RegenerateResponse {
        api_url_token: token.to_string(),
    }))
}
