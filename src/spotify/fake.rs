//! Scripted in-memory [`SpotifyApi`] for unit tests.

use super::{PlayerState, SpotifyApi, SpotifyError, SpotifyProfile};
use crate::credentials::TokenSet;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeSpotify {
    pub profile: SpotifyProfile,
    pub exchange_status: Option<u16>,
    pub profile_status: Option<u16>,
    pub tokens: Option<TokenSet>,
    /// Responses for successive `currently_playing` calls.
    pub player: Mutex<VecDeque<Result<Option<PlayerState>, SpotifyError>>>,
    pub refresh_status: Option<u16>,
    pub refreshed_tokens: Option<TokenSet>,
    /// Access tokens seen by `currently_playing`, in order.
    pub player_calls: Mutex<Vec<String>>,
    /// Refresh tokens seen by `refresh_token`, in order.
    pub refresh_calls: Mutex<Vec<String>>,
}

impl FakeSpotify {
    pub fn with_profile(id: &str) -> Self {
        Self {
            profile: SpotifyProfile {
                id: id.to_string(),
                display_name: Some("Listener".to_string()),
                images: Vec::new(),
            },
            ..Default::default()
        }
    }

    pub fn push_player(&self, response: Result<Option<PlayerState>, SpotifyError>) {
        self.player.lock().unwrap().push_back(response);
    }

    pub fn player_calls(&self) -> Vec<String> {
        self.player_calls.lock().unwrap().clone()
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().unwrap().clone()
    }
}

pub fn api_error(status: u16) -> SpotifyError {
    SpotifyError::Api {
        status,
        message: format!("status {status}"),
    }
}

pub fn playing_track() -> PlayerState {
    serde_json::from_value(serde_json::json!({
        "currently_playing_type": "track",
        "item": {
            "name": "Song",
            "artists": [{"name": "Artist"}],
            "external_urls": {"spotify": "https://open.spotify.com/track/1"}
        }
    }))
    .unwrap()
}

#[async_trait]
impl SpotifyApi for FakeSpotify {
    fn authorize_url(&self, redirect_uri: &str) -> String {
        format!("https://accounts.spotify.test/authorize?redirect_uri={redirect_uri}")
    }

    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenSet, SpotifyError> {
        if let Some(status) = self.exchange_status {
            return Err(api_error(status));
        }
        Ok(self.tokens.clone().unwrap_or_else(|| TokenSet {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
        }))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, SpotifyError> {
        self.refresh_calls.lock().unwrap().push(refresh_token.to_string());
        if let Some(status) = self.refresh_status {
            return Err(api_error(status));
        }
        Ok(self.refreshed_tokens.clone().unwrap_or_else(|| TokenSet {
            access_token: "refreshed-access".to_string(),
            refresh_token: Some(refresh_token.to_string()),
            expires_at: None,
        }))
    }

    async fn currently_playing(
        &self,
        access_token: &str,
    ) -> Result<Option<PlayerState>, SpotifyError> {
        self.player_calls.lock().unwrap().push(access_token.to_string());
        self.player.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }

    async fn current_user(&self, _access_token: &str) -> Result<SpotifyProfile, SpotifyError> {
        match self.profile_status {
            Some(status) => Err(api_error(status)),
            None => Ok(self.profile.clone()),
        }
    }
}
