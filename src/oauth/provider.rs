//! OAuth 2.0 provider endpoints and client credentials.

use serde::{Deserialize, Serialize};

pub const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SPOTIFY_SCOPES: &[&str] = &["user-read-currently-playing", "user-read-playback-state"];

pub const TWITTER_AUTH_URL: &str = "https://x.com/i/oauth2/authorize";
pub const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const TWITTER_SCOPES: &[&str] = &["tweet.read", "tweet.write", "users.read", "offline.access"];

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    pub client_id: String,

    pub client_secret: String,
}

impl ProviderConfig {
    pub fn spotify(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::new(SPOTIFY_AUTH_URL, SPOTIFY_TOKEN_URL, SPOTIFY_SCOPES, client_id, client_secret)
    }

    pub fn twitter(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::new(TWITTER_AUTH_URL, TWITTER_TOKEN_URL, TWITTER_SCOPES, client_id, client_secret)
    }

    fn new(
        auth_url: &str,
        token_url: &str,
        scopes: &[&str],
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Points the token endpoint elsewhere (mock servers in tests).
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Build authorization URL with redirect_uri and any flow-specific parameters
    /// (state, PKCE challenge) appended in order.
    pub fn build_auth_url(&self, redirect_uri: &str, extra: &[(&str, &str)]) -> String {
        let scopes = self.scopes.join(" ");
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
        );
        for (key, value) in extra {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
