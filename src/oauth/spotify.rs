//! Spotify login: the only flow that creates users and sessions.

use super::{FlowError, OAuthSettings, Provider};
use crate::auth::SessionIssuer;
use crate::credentials::{CredentialStore, User};
use crate::spotify::SpotifyApi;
use std::sync::Arc;
use tracing::{info, warn};

pub const SPOTIFY_CALLBACK_PATH: &str = "/api/auth/spotify/callback";

/// A completed login: the user row and a freshly signed session token.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session_token: String,
}

#[derive(Clone)]
pub struct SpotifyLogin {
    api: Arc<dyn SpotifyApi>,
    store: Arc<CredentialStore>,
    issuer: Arc<SessionIssuer>,
    redirect_uri: String,
}

impl SpotifyLogin {
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        store: Arc<CredentialStore>,
        issuer: Arc<SessionIssuer>,
        settings: &OAuthSettings,
    ) -> Self {
        Self {
            api,
            store,
            issuer,
            redirect_uri: settings.callback_url(SPOTIFY_CALLBACK_PATH),
        }
    }

    pub fn authorize_url(&self) -> String {
        self.api.authorize_url(&self.redirect_uri)
    }

    /// Handles `GET /api/auth/spotify/callback?code=..&error=..`.
    pub async fn callback(
        &self,
        code: Option<&str>,
        error: Option<&str>,
    ) -> Result<LoginOutcome, FlowError> {
        if let Some(error) = error {
            warn!(error = %error, "Spotify authorization denied");
            return Err(FlowError::Denied(Provider::Spotify));
        }

        let code = code.filter(|c| !c.is_empty()).ok_or(FlowError::MissingCode)?;

        let tokens = self
            .api
            .exchange_code(code, &self.redirect_uri)
            .await
            .map_err(|e| {
                warn!(error = %e, "Spotify code exchange failed");
                FlowError::SpotifyExchange(e)
            })?;

        let profile = self
            .api
            .current_user(&tokens.access_token)
            .await
            .map_err(FlowError::ProfileFetch)?;

        let user = self
            .store
            .create_or_update_user(&profile.id, &tokens)
            .map_err(FlowError::UserCreation)?;

        let session_token = self.issuer.issue(user.id, &user.spotify_user_id)?;

        info!(user_id = %user.id, spotify_user_id = %user.spotify_user_id, "Spotify login completed");

        Ok(LoginOutcome {
            user,
            session_token,
        })
    }
}
