//! OAuth orchestration for the three linked providers.
//!
//! Every flow walks the same states:
//!
//! ```text
//! start ──► redirected ──► callback-received ──► token-exchanged
//!                                                     │
//!                                                     ▼
//!                                   persisted ◄── profile-fetched
//! ```
//!
//! Any step may fail into [`FlowError`], which carries a short reason code the
//! HTTP layer turns into a redirect (`/login?error=<code>` for Spotify login,
//! `/dashboard?error=<code>` for account linking).
//!
//! - [`spotify::SpotifyLogin`]: plain authorization-code login
//! - [`miauth::MiAuthFlow`]: Misskey session-id handshake
//! - [`twitter::TwitterFlow`]: authorization code with PKCE, gated by
//!   [`eligibility::TwitterConfig`]
//! - [`refresh::currently_playing_with_refresh`]: refresh-on-401 for Spotify

pub mod eligibility;
pub mod exchange;
pub mod miauth;
pub mod provider;
pub mod refresh;
pub mod spotify;
pub mod twitter;

use crate::auth::SessionError;
use crate::credentials::StoreError;
use crate::spotify::SpotifyError;
use exchange::ExchangeError;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_APP_NAME: &str = "Spotify NowPlaying";

/// Settings shared by every flow.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Public origin of this service, without a trailing slash.
    pub base_url: String,
    /// Name shown to the user on the Misskey consent screen.
    pub app_name: String,
}

impl OAuthSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Absolute callback URL for a path on this service.
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Spotify,
    Misskey,
    Twitter,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Spotify => "spotify",
            Provider::Misskey => "misskey",
            Provider::Twitter => "twitter",
        };
        f.write_str(name)
    }
}

/// Terminal failure of an OAuth flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0} authorization was denied")]
    Denied(Provider),

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("code or state missing from callback")]
    MissingParams,

    #[error("session id missing from callback")]
    MissingSession,

    #[error("session id is not a valid UUID")]
    InvalidSession,

    #[error("handshake session not found or expired")]
    SessionNotFound,

    #[error("handshake session lookup failed: {0}")]
    SessionLookup(#[source] StoreError),

    #[error("failed to create handshake session: {0}")]
    SessionCreate(#[source] StoreError),

    #[error("instance_url is required")]
    InvalidInstance,

    #[error("miauth check request failed: {0}")]
    MiAuthCheck(String),

    #[error("miauth check response could not be parsed: {0}")]
    MiAuthParse(String),

    #[error("provider did not grant a token")]
    AuthFailed,

    #[error("token exchange failed: {0}")]
    TokenExchange(#[from] ExchangeError),

    #[error("spotify token exchange failed: {0}")]
    SpotifyExchange(#[source] SpotifyError),

    #[error("failed to fetch spotify profile: {0}")]
    ProfileFetch(#[source] SpotifyError),

    #[error("Twitter integration is not available")]
    NotConfigured,

    #[error("{0}")]
    NotEligible(String),

    #[error("failed to load user: {0}")]
    UserLookup(#[source] StoreError),

    #[error("user not found")]
    UnknownUser,

    #[error("failed to create user: {0}")]
    UserCreation(#[source] StoreError),

    #[error("failed to save credentials: {0}")]
    Persist(#[source] StoreError),

    #[error("failed to issue session token: {0}")]
    Session(#[from] SessionError),
}

impl FlowError {
    /// Short reason code used in redirect query strings.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::Denied(Provider::Spotify) => "spotify_auth_denied",
            FlowError::Denied(Provider::Misskey) => "auth_failed",
            FlowError::Denied(Provider::Twitter) => "twitter_auth_denied",
            FlowError::MissingCode => "missing_code",
            FlowError::MissingParams => "missing_params",
            FlowError::MissingSession => "missing_session",
            FlowError::InvalidSession => "invalid_session",
            FlowError::SessionNotFound => "session_not_found",
            FlowError::SessionLookup(_) => "session_error",
            FlowError::SessionCreate(_) => "session_create_failed",
            FlowError::InvalidInstance => "invalid_instance",
            FlowError::MiAuthCheck(_) => "check_failed",
            FlowError::MiAuthParse(_) => "parse_failed",
            FlowError::AuthFailed => "auth_failed",
            FlowError::TokenExchange(_) | FlowError::SpotifyExchange(_) => {
                "token_exchange_failed"
            }
            FlowError::ProfileFetch(_) => "profile_fetch_failed",
            FlowError::NotConfigured => "not_available",
            FlowError::NotEligible(_) => "not_eligible",
            FlowError::UserLookup(_) | FlowError::UnknownUser => "user_lookup_failed",
            FlowError::UserCreation(_) => "user_creation_failed",
            FlowError::Persist(_) => "save_failed",
            FlowError::Session(_) => "jwt_generation_failed",
        }
    }

    /// True when the same callback could plausibly succeed if replayed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::TokenExchange(e) => e.is_retryable(),
            FlowError::SpotifyExchange(e) | FlowError::ProfileFetch(e) => e.is_retryable(),
            FlowError::MiAuthCheck(_) => true,
            _ => false,
        }
    }
}

/// Host part of a URL: scheme, path and surrounding whitespace removed.
///
/// `https://misskey.example/` and `misskey.example` both yield
/// `misskey.example`. Case is preserved.
pub fn host_of(url: &str) -> &str {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://misskey.example"), "misskey.example");
        assert_eq!(host_of("https://misskey.example/"), "misskey.example");
        assert_eq!(host_of("http://localhost:3000/api"), "localhost:3000");
        assert_eq!(host_of("  misskey.example  "), "misskey.example");
        assert_eq!(host_of(""), "");
    }

    #[test]
    fn test_settings_trim_trailing_slash() {
        let settings = OAuthSettings::new("https://np.example/");
        assert_eq!(
            settings.callback_url("/api/miauth/callback"),
            "https://np.example/api/miauth/callback"
        );
        assert_eq!(settings.app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(FlowError::Denied(Provider::Spotify).code(), "spotify_auth_denied");
        assert_eq!(FlowError::Denied(Provider::Twitter).code(), "twitter_auth_denied");
        assert_eq!(FlowError::SessionNotFound.code(), "session_not_found");
        assert_eq!(FlowError::Session(SessionError::Signing).code(), "jwt_generation_failed");
        assert!(!FlowError::MissingCode.is_retryable());
        assert!(FlowError::MiAuthCheck("timeout".into()).is_retryable());
    }
}
