//! Spotify Web API client.

use super::player::PlayerState;
use crate::credentials::TokenSet;
use crate::oauth::exchange::{self, ExchangeError};
use crate::oauth::provider::ProviderConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com";

/// Profile and player reads give up after this long.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("spotify API error: status {status}")]
    Api { status: u16, message: String },
    #[error("spotify request failed: {0}")]
    Transport(String),
    #[error("unexpected spotify response: {0}")]
    Decode(String),
}

impl SpotifyError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SpotifyError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The access token was rejected; a refresh may fix it.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            SpotifyError::Api { status, .. } => *status >= 500 || *status == 429,
            SpotifyError::Transport(_) => true,
            SpotifyError::Decode(_) => false,
        }
    }
}

impl From<ExchangeError> for SpotifyError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Status { status, body } => SpotifyError::Api {
                status,
                message: body,
            },
            ExchangeError::Transport(e) if e.is_decode() => SpotifyError::Decode(e.to_string()),
            ExchangeError::Transport(e) => SpotifyError::Transport(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for SpotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SpotifyError::Decode(e.to_string())
        } else {
            SpotifyError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub images: Vec<SpotifyImage>,
}

impl SpotifyProfile {
    /// First image is the largest one Spotify returns.
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(|i| i.url.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotifyImage {
    pub url: String,
}

/// The subset of the Spotify API this service talks to.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Authorization URL the browser is sent to for login.
    fn authorize_url(&self, redirect_uri: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> Result<TokenSet, SpotifyError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, SpotifyError>;

    /// `Ok(None)` when nothing is playing (HTTP 204).
    async fn currently_playing(&self, access_token: &str)
        -> Result<Option<PlayerState>, SpotifyError>;

    async fn current_user(&self, access_token: &str) -> Result<SpotifyProfile, SpotifyError>;
}

/// HTTP implementation of [`SpotifyApi`].
#[derive(Clone, Debug)]
pub struct SpotifyClient {
    http: reqwest::Client,
    provider: ProviderConfig,
    api_base: String,
}

impl SpotifyClient {
    pub fn new(http: reqwest::Client, provider: ProviderConfig) -> Self {
        Self {
            http,
            provider,
            api_base: SPOTIFY_API_BASE.to_string(),
        }
    }

    /// Points API reads elsewhere (mock servers in tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn get(&self, path: &str, access_token: &str) -> Result<reqwest::Response, SpotifyError> {
        let response = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(access_token)
            .header("Accept-Language", "ja")
            .timeout(READ_TIMEOUT)
            .send()
            .await?;
        Ok(response)
    }
}

async fn api_error(response: reqwest::Response) -> SpotifyError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    SpotifyError::Api { status, message }
}

#[async_trait]
impl SpotifyApi for SpotifyClient {
    fn authorize_url(&self, redirect_uri: &str) -> String {
        self.provider.build_auth_url(redirect_uri, &[])
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, SpotifyError> {
        Ok(exchange::exchange_code(&self.http, &self.provider, code, redirect_uri, None).await?)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, SpotifyError> {
        Ok(exchange::refresh_token(&self.http, &self.provider, refresh_token).await?)
    }

    async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<PlayerState>, SpotifyError> {
        let response = self.get("/v1/me/player?market=JP", access_token).await?;

        match response.status().as_u16() {
            200 => Ok(Some(response.json().await?)),
            204 => Ok(None),
            _ => Err(api_error(response).await),
        }
    }

    async fn current_user(&self, access_token: &str) -> Result<SpotifyProfile, SpotifyError> {
        let response = self.get("/v1/me", access_token).await?;

        if response.status().as_u16() != 200 {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }
}
