//! Spotify: login, token refresh, and currently-playing reads.

mod client;
mod player;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{
    SpotifyApi, SpotifyClient, SpotifyError, SpotifyImage, SpotifyProfile, READ_TIMEOUT,
    SPOTIFY_API_BASE,
};
pub use player::{NowPlaying, PlayerState, PlayingItem};
