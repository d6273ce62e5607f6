//! Misskey MiAuth handshake.
//!
//! MiAuth has no client registration. We mint a session id, send the user to
//! `{instance}/miauth/{session}`, and once they approve, trade the session id
//! for a token at `{instance}/api/miauth/{session}/check`. The session id in
//! the callback query string is the only correlation, so it is looked up in
//! the store to recover which user started the handshake.

use super::{host_of, FlowError, OAuthSettings};
use crate::credentials::{CredentialStore, MisskeyProfile};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MIAUTH_CALLBACK_PATH: &str = "/api/miauth/callback";

/// Permissions requested from the instance.
pub const MIAUTH_PERMISSIONS: &str = "write:notes,read:account";

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROFILE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    token: String,
    #[serde(default)]
    user: CheckUser,
}

#[derive(Debug, Default, Deserialize)]
struct CheckUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: String,
    username: String,
    #[serde(default, rename = "avatarUrl")]
    avatar_url: Option<String>,
}

/// A freshly linked Misskey account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisskeyConnection {
    pub user_id: Uuid,
    pub instance_url: String,
    pub host: String,
    pub profile: MisskeyProfile,
}

/// Trim, default to `https://` and drop trailing slashes.
pub fn normalize_instance_url(raw: &str) -> Result<String, FlowError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FlowError::InvalidInstance);
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let normalized = with_scheme.trim_end_matches('/');
    if host_of(normalized).is_empty() {
        return Err(FlowError::InvalidInstance);
    }
    Ok(normalized.to_string())
}

#[derive(Clone)]
pub struct MiAuthFlow {
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    settings: OAuthSettings,
}

impl MiAuthFlow {
    pub fn new(http: reqwest::Client, store: Arc<CredentialStore>, settings: OAuthSettings) -> Self {
        Self {
            http,
            store,
            settings,
        }
    }

    /// Records a handshake for `user_id` and returns the consent URL.
    pub fn start(&self, user_id: Uuid, instance_url: &str) -> Result<String, FlowError> {
        let instance_url = normalize_instance_url(instance_url)?;
        let session_id = Uuid::new_v4();

        self.store
            .create_miauth_session(user_id, session_id, &instance_url)
            .map_err(FlowError::SessionCreate)?;

        debug!(user_id = %user_id, instance = %instance_url, "MiAuth session created");

        Ok(format!(
            "{}/miauth/{}?name={}&callback={}&permission={}",
            instance_url,
            session_id,
            urlencoding::encode(&self.settings.app_name),
            urlencoding::encode(&self.settings.callback_url(MIAUTH_CALLBACK_PATH)),
            MIAUTH_PERMISSIONS,
        ))
    }

    /// Handles `GET /api/miauth/callback?session=..`.
    pub async fn callback(&self, session: Option<&str>) -> Result<MisskeyConnection, FlowError> {
        let raw = session
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(FlowError::MissingSession)?;
        let session_id = Uuid::parse_str(raw).map_err(|_| FlowError::InvalidSession)?;

        let session = self
            .store
            .get_miauth_session(session_id)
            .map_err(FlowError::SessionLookup)?
            .ok_or(FlowError::SessionNotFound)?;

        let check = self.check(&session.instance_url, session_id).await?;
        if !check.ok || check.token.is_empty() {
            warn!(instance = %session.instance_url, "MiAuth check did not grant a token");
            return Err(FlowError::AuthFailed);
        }

        let profile = match self.fetch_account(&session.instance_url, &check.token).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(instance = %session.instance_url, error = %e, "Misskey profile fetch failed, using check response");
                MisskeyProfile {
                    user_id: check.user.id.clone(),
                    username: check.user.username.clone(),
                    avatar_url: String::new(),
                }
            }
        };

        let host = host_of(&session.instance_url).to_string();

        self.store
            .update_misskey_token(
                session.user_id,
                &session.instance_url,
                &check.token,
                &profile,
                &host,
            )
            .map_err(FlowError::Persist)?;

        self.store
            .delete_miauth_session(session_id)
            .log_failure("delete_miauth_session");

        info!(user_id = %session.user_id, host = %host, "Misskey account linked");

        Ok(MisskeyConnection {
            user_id: session.user_id,
            instance_url: session.instance_url,
            host,
            profile,
        })
    }

    async fn check(&self, instance_url: &str, session_id: Uuid) -> Result<CheckResponse, FlowError> {
        let response = self
            .http
            .post(format!("{instance_url}/api/miauth/{session_id}/check"))
            .json(&serde_json::json!({}))
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| FlowError::MiAuthCheck(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| FlowError::MiAuthCheck(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| FlowError::MiAuthParse(e.to_string()))
    }

    async fn fetch_account(
        &self,
        instance_url: &str,
        access_token: &str,
    ) -> Result<MisskeyProfile, reqwest::Error> {
        let account: AccountResponse = self
            .http
            .post(format!("{instance_url}/api/i"))
            .json(&serde_json::json!({ "i": access_token }))
            .timeout(PROFILE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(MisskeyProfile {
            user_id: account.id,
            username: account.username,
            avatar_url: account.avatar_url.unwrap_or_default(),
        })
    }
}
