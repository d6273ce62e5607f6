//! Twitter OAuth 2.0 with PKCE.
//!
//! The verifier never leaves the server: it is stored with the random `state`
//! and only the S256 challenge goes out in the authorize URL. The callback is
//! correlated by `state` alone.

use super::eligibility::TwitterConfig;
use super::exchange;
use super::provider::ProviderConfig;
use super::{FlowError, OAuthSettings, Provider};
use crate::auth::{generate_pkce_verifier, generate_random_token, pkce_challenge};
use crate::credentials::{CredentialStore, TwitterProfile};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TWITTER_CALLBACK_PATH: &str = "/api/twitter/callback";
pub const TWITTER_API_BASE: &str = "https://api.twitter.com";
pub const PROFILE_TIMEOUT: Duration = Duration::from_secs(10);

/// Random bytes in the `state` parameter (hex encoded, so 32 characters).
const STATE_BYTES: usize = 16;

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Debug, Deserialize)]
struct MeData {
    id: String,
    username: String,
    #[serde(default)]
    profile_image_url: Option<String>,
}

#[derive(Clone)]
pub struct TwitterFlow {
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    config: TwitterConfig,
    provider: ProviderConfig,
    redirect_uri: String,
    api_base: String,
}

impl TwitterFlow {
    pub fn new(
        http: reqwest::Client,
        store: Arc<CredentialStore>,
        config: TwitterConfig,
        settings: &OAuthSettings,
    ) -> Self {
        let provider = config.provider();
        Self {
            http,
            store,
            config,
            provider,
            redirect_uri: settings.callback_url(TWITTER_CALLBACK_PATH),
            api_base: TWITTER_API_BASE.to_string(),
        }
    }

    /// Points token and profile calls elsewhere (mock servers in tests).
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.provider = self.provider.with_token_url(token_url);
        self.api_base = api_base.into();
        self
    }

    pub fn config(&self) -> &TwitterConfig {
        &self.config
    }

    /// Checks eligibility, records a PKCE handshake and returns the authorize URL.
    pub fn start(&self, user_id: Uuid) -> Result<String, FlowError> {
        if !self.config.is_available() {
            return Err(FlowError::NotConfigured);
        }

        let user = self
            .store
            .get_user_by_id(user_id)
            .map_err(FlowError::UserLookup)?
            .ok_or(FlowError::UnknownUser)?;

        let eligibility = self.config.check_eligibility(
            user.misskey.is_connected(),
            user.misskey.instance_url.as_deref().unwrap_or_default(),
        );
        if !eligibility.eligible {
            return Err(FlowError::NotEligible(eligibility.reason.unwrap_or_default()));
        }

        let verifier = generate_pkce_verifier();
        let challenge = pkce_challenge(&verifier);
        let state = generate_random_token(STATE_BYTES);

        self.store
            .create_pkce_session(user_id, &state, &verifier)
            .map_err(FlowError::SessionCreate)?;

        debug!(user_id = %user_id, "Twitter PKCE session created");

        Ok(self.provider.build_auth_url(
            &self.redirect_uri,
            &[
                ("state", state.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        ))
    }

    /// Handles `GET /api/twitter/callback?code=..&state=..&error=..`.
    pub async fn callback(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        error: Option<&str>,
    ) -> Result<TwitterProfile, FlowError> {
        if let Some(error) = error {
            warn!(error = %error, "Twitter authorization denied");
            return Err(FlowError::Denied(Provider::Twitter));
        }

        let (code, state) = match (code, state) {
            (Some(code), Some(state)) if !code.is_empty() && !state.is_empty() => (code, state),
            _ => return Err(FlowError::MissingParams),
        };

        let session = self
            .store
            .get_pkce_session(state)
            .map_err(FlowError::SessionLookup)?
            .ok_or(FlowError::SessionNotFound)?;

        let tokens = exchange::exchange_code(
            &self.http,
            &self.provider,
            code,
            &self.redirect_uri,
            Some(&session.code_verifier),
        )
        .await
        .map_err(|e| {
            warn!(user_id = %session.user_id, error = %e, "Twitter code exchange failed");
            FlowError::TokenExchange(e)
        })?;

        let profile = match self.fetch_profile(&tokens.access_token).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %session.user_id, error = %e, "Twitter profile fetch failed");
                TwitterProfile::default()
            }
        };

        self.store
            .update_twitter_token(session.user_id, &tokens, &profile)
            .map_err(FlowError::Persist)?;

        self.store
            .delete_pkce_session(state)
            .log_failure("delete_pkce_session");

        info!(user_id = %session.user_id, "Twitter account linked");

        Ok(profile)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<TwitterProfile, reqwest::Error> {
        let me: MeResponse = self
            .http
            .get(format!("{}/2/users/me?user.fields=profile_image_url", self.api_base))
            .bearer_auth(access_token)
            .timeout(PROFILE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(TwitterProfile {
            user_id: me.data.id,
            username: me.data.username,
            avatar_url: me.data.profile_image_url.unwrap_or_default(),
        })
    }
}
