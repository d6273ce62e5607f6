//! OAuth token endpoint calls.
//!
//! Both providers authenticate the client with HTTP Basic and take a form body.
//! Covers the authorization-code grant (optionally with a PKCE verifier) and
//! the refresh-token grant.

use super::provider::ProviderConfig;
use crate::credentials::TokenSet;
use chrono::{Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Token exchange and refresh calls give up after this long.
pub const TOKEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ExchangeError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ExchangeError::Status { status, .. } => Some(*status),
            ExchangeError::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }

    /// Server-side failures and network errors may succeed on a later attempt;
    /// a rejected code or refresh token will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Status { status, .. } => *status >= 500 || *status == 429,
            ExchangeError::Transport(e) => !e.is_decode(),
        }
    }
}

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token_set(self, previous_refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            // Keep the existing refresh token if the provider did not rotate it
            refresh_token: self
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh.map(str::to_string)),
            // Out-of-range lifetimes leave the expiry unknown
            expires_at: self
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        }
    }
}

/// Exchange an authorization code for tokens.
///
/// # Arguments
/// * `http` - Shared HTTP client
/// * `provider` - Token URL and client credentials
/// * `code` - Authorization code from callback
/// * `redirect_uri` - Must match the one sent to the authorize endpoint
/// * `code_verifier` - PKCE verifier, for flows that sent a challenge
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<TokenSet, ExchangeError> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    let response = post_token_form(http, provider, &form).await?;
    Ok(response.into_token_set(None))
}

/// Trade a refresh token for a new access token.
pub async fn refresh_token(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    refresh_token: &str,
) -> Result<TokenSet, ExchangeError> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];

    let response = post_token_form(http, provider, &form).await?;
    Ok(response.into_token_set(Some(refresh_token)))
}

async fn post_token_form(
    http: &reqwest::Client,
    provider: &ProviderConfig,
    form: &[(&str, &str)],
) -> Result<TokenResponse, ExchangeError> {
    debug!(token_url = %provider.token_url, "Calling token endpoint");

    let response = http
        .post(&provider.token_url)
        .basic_auth(&provider.client_id, Some(&provider.client_secret))
        .header("Accept", "application/json")
        .form(form)
        .timeout(TOKEN_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        return Err(ExchangeError::Status { status, body });
    }

    let token_response: TokenResponse = response.json().await?;

    debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token endpoint call succeeded"
    );

    Ok(token_response)
}
