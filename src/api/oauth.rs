//! Login and account-linking endpoints.
//!
//! Callbacks are reached by the browser coming back from a provider, so they
//! never answer with JSON errors: every outcome is a redirect into the UI with
//! a reason code in the query string.

use super::auth_middleware::{authenticate, SessionIdentity};
use super::{message, ApiError, AppState};
use crate::oauth::FlowError;
use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Json, Redirect, Response},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Provider callback query parameters
#[derive(Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
pub struct MiAuthCallbackParams {
    session: Option<String>,
}

#[derive(Deserialize)]
pub struct MiAuthStartRequest {
    #[serde(default)]
    instance_url: String,
}

#[derive(Serialize)]
pub struct MiAuthStartResponse {
    auth_url: String,
}

#[derive(Serialize)]
pub struct AuthCheckResponse {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spotify_user_id: Option<String>,
}

fn login_error(err: &FlowError) -> Redirect {
    Redirect::temporary(&format!("/login?error={}", err.code()))
}

fn dashboard_error(err: &FlowError) -> Redirect {
    Redirect::temporary(&format!("/dashboard?error={}", err.code()))
}

fn log_flow_error(flow: &str, err: &FlowError) {
    if err.is_retryable() {
        warn!(flow, code = err.code(), error = %err, "OAuth callback failed (retryable)");
    } else {
        info!(flow, code = err.code(), error = %err, "OAuth callback rejected");
    }
}

/// GET /api/auth/check
///
/// Never fails: an unauthenticated caller gets `{"authenticated": false}`.
pub async fn auth_check(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let body = match authenticate(&headers, &state.issuer) {
        Ok(identity) => AuthCheckResponse {
            authenticated: true,
            user_id: Some(identity.user_id.to_string()),
            spotify_user_id: Some(identity.spotify_user_id),
        },
        Err(_) => AuthCheckResponse {
            authenticated: false,
            user_id: None,
            spotify_user_id: None,
        },
    };
    Json(body).into_response()
}

/// GET /api/auth/spotify
pub async fn spotify_start(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::temporary(&state.spotify_login.authorize_url())
}

/// GET /api/auth/spotify/callback
///
/// On success sets the session cookie and lands on the dashboard.
pub async fn spotify_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state
        .spotify_login
        .callback(params.code.as_deref(), params.error.as_deref())
        .await
    {
        Ok(outcome) => (
            [(SET_COOKIE, state.issuer.session_cookie(&outcome.session_token))],
            Redirect::temporary("/dashboard"),
        )
            .into_response(),
        Err(e) => {
            log_flow_error("spotify", &e);
            login_error(&e).into_response()
        }
    }
}

/// POST /api/miauth/start
pub async fn miauth_start(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
    Json(request): Json<MiAuthStartRequest>,
) -> Result<Json<MiAuthStartResponse>, ApiError> {
    let auth_url = state
        .miauth
        .start(identity.user_id, &request.instance_url)
        .map_err(|e| match e {
            FlowError::InvalidInstance => ApiError::BadRequest(e.to_string()),
            _ => {
                error!(user_id = %identity.user_id, error = %e, "Failed to start MiAuth");
                ApiError::ServerError("failed to create session".to_string())
            }
        })?;

    Ok(Json(MiAuthStartResponse { auth_url }))
}

/// GET /api/miauth/callback
pub async fn miauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MiAuthCallbackParams>,
) -> Redirect {
    match state.miauth.callback(params.session.as_deref()).await {
        Ok(_) => Redirect::temporary("/dashboard?success=misskey_connected"),
        Err(e) => {
            log_flow_error("miauth", &e);
            dashboard_error(&e)
        }
    }
}

/// DELETE /api/miauth
pub async fn miauth_disconnect(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Response, ApiError> {
    state.store.disconnect_misskey(identity.user_id).map_err(|e| {
        error!(user_id = %identity.user_id, error = %e, "Failed to disconnect Misskey");
        ApiError::ServerError("failed to disconnect".to_string())
    })?;

    Ok(message("misskey disconnected").into_response())
}

/// GET /api/twitter/start
///
/// Redirects to Twitter, or answers 403 with the eligibility reason.
pub async fn twitter_start(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Redirect, ApiError> {
    let auth_url = state.twitter.start(identity.user_id).map_err(|e| match &e {
        FlowError::NotConfigured => ApiError::Forbidden(e.to_string()),
        FlowError::NotEligible(reason) => ApiError::Forbidden(reason.clone()),
        FlowError::UserLookup(_) | FlowError::UnknownUser => {
            error!(user_id = %identity.user_id, error = %e, "Failed to load user for Twitter link");
            ApiError::ServerError("failed to get user".to_string())
        }
        _ => {
            error!(user_id = %identity.user_id, error = %e, "Failed to start Twitter link");
            ApiError::ServerError("failed to create session".to_string())
        }
    })?;

    Ok(Redirect::temporary(&auth_url))
}

/// GET /api/twitter/callback
pub async fn twitter_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    match state
        .twitter
        .callback(
            params.code.as_deref(),
            params.state.as_deref(),
            params.error.as_deref(),
        )
        .await
    {
        Ok(_) => Redirect::temporary("/dashboard?success=twitter_connected"),
        Err(e) => {
            log_flow_error("twitter", &e);
            dashboard_error(&e)
        }
    }
}

/// DELETE /api/twitter
pub async fn twitter_disconnect(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Result<Response, ApiError> {
    state.store.disconnect_twitter(identity.user_id).map_err(|e| {
        error!(user_id = %identity.user_id, error = %e, "Failed to disconnect Twitter");
        ApiError::ServerError("failed to disconnect".to_string())
    })?;

    Ok(message("twitter disconnected").into_response())
}
