//! Refresh-on-demand for the Spotify player read.
//!
//! Tokens are not refreshed ahead of time. A read that comes back 401 triggers
//! exactly one refresh, one write of the new tokens, and one retry; whatever
//! the retry returns is final.

use crate::credentials::{CredentialStore, StoreError, TokenSet, User};
use crate::spotify::{PlayerState, SpotifyApi, SpotifyError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("spotify is not connected")]
    NotConnected,

    #[error("access token rejected and no refresh token is stored")]
    NoRefreshToken,

    #[error("token refresh failed: {0}")]
    Refresh(#[source] SpotifyError),

    #[error("failed to persist refreshed tokens: {0}")]
    Persist(#[source] StoreError),

    #[error("player request failed after refresh: {0}")]
    Retry(#[source] SpotifyError),

    #[error(transparent)]
    Spotify(SpotifyError),
}

/// Reads the player for `user`, refreshing the access token once on 401.
///
/// `Ok(None)` means nothing is playing.
pub async fn currently_playing_with_refresh(
    api: &dyn SpotifyApi,
    store: &CredentialStore,
    user: &User,
) -> Result<Option<PlayerState>, RefreshError> {
    let access_token = user
        .spotify
        .access_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(RefreshError::NotConnected)?;

    let err = match api.currently_playing(access_token).await {
        Ok(state) => return Ok(state),
        Err(e) if e.is_unauthorized() => e,
        Err(e) => return Err(RefreshError::Spotify(e)),
    };

    let refresh_token = match user.spotify.refresh_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            warn!(user_id = %user.id, error = %err, "Spotify token rejected and no refresh token stored");
            return Err(RefreshError::NoRefreshToken);
        }
    };

    let refreshed = api
        .refresh_token(refresh_token)
        .await
        .map_err(RefreshError::Refresh)?;

    // Providers that don't rotate refresh tokens omit them from the response
    let tokens = TokenSet {
        refresh_token: refreshed
            .refresh_token
            .clone()
            .or_else(|| Some(refresh_token.to_string())),
        ..refreshed
    };

    store
        .update_spotify_token(user.id, &tokens)
        .map_err(RefreshError::Persist)?;

    info!(user_id = %user.id, "Spotify access token refreshed");

    api.currently_playing(&tokens.access_token)
        .await
        .map_err(RefreshError::Retry)
}
