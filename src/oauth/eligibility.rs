//! Who may link a Twitter account.
//!
//! Twitter posting is gated behind a feature flag and, optionally, behind
//! having a Misskey account on an approved instance. The rules are evaluated
//! in a fixed order and the first failing one supplies the reason shown to the
//! user.

use super::host_of;
use super::provider::ProviderConfig;
use serde::Serialize;

pub const REASON_DISABLED: &str = "Twitter integration is disabled";
pub const REASON_NO_CREDENTIALS: &str = "Twitter API credentials not configured";
pub const REASON_MISSKEY_REQUIRED: &str = "Misskey connection required";
pub const REASON_HOST_NOT_ALLOWED: &str = "Your Misskey instance is not in the allowed list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterConfig {
    pub enabled: bool,
    pub require_misskey: bool,
    /// Lowercased Misskey hosts. Empty means any host.
    pub allowed_hosts: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_misskey: false,
            allowed_hosts: Vec::new(),
            client_id: String::new(),
            client_secret: String::new(),
        }
    }
}

/// Result of an eligibility check, serialized as-is for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Eligibility {
    pub fn allowed() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: Some(reason.into()),
        }
    }
}

impl TwitterConfig {
    /// Reads `TWITTER_ENABLED`, `TWITTER_REQUIRE_MISSKEY`,
    /// `TWITTER_ALLOWED_HOSTS`, `TWITTER_CLIENT_ID` and `TWITTER_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TwitterConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let allowed_hosts = lookup("TWITTER_ALLOWED_HOSTS")
            .map(|raw| {
                raw.split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            // Enabled unless explicitly switched off
            enabled: lookup("TWITTER_ENABLED").as_deref() != Some("false"),
            require_misskey: lookup("TWITTER_REQUIRE_MISSKEY").as_deref() == Some("true"),
            allowed_hosts,
            client_id: lookup("TWITTER_CLIENT_ID").unwrap_or_default(),
            client_secret: lookup("TWITTER_CLIENT_SECRET").unwrap_or_default(),
        }
    }

    /// Enabled and holding client credentials.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig::twitter(&self.client_id, &self.client_secret)
    }

    /// `misskey_host` may be a bare host or a full instance URL.
    pub fn check_eligibility(&self, misskey_connected: bool, misskey_host: &str) -> Eligibility {
        if !self.enabled {
            return Eligibility::denied(REASON_DISABLED);
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Eligibility::denied(REASON_NO_CREDENTIALS);
        }

        if self.require_misskey && !misskey_connected {
            return Eligibility::denied(REASON_MISSKEY_REQUIRED);
        }

        if self.require_misskey && !self.allowed_hosts.is_empty() {
            let lowered = misskey_host.to_lowercase();
            let host = host_of(&lowered);
            if !self.allowed_hosts.iter().any(|allowed| allowed == host) {
                return Eligibility::denied(REASON_HOST_NOT_ALLOWED);
            }
        }

        Eligibility::allowed()
    }
}
