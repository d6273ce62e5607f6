// Session tokens, bearer parsing, random secrets and PKCE
pub mod auth;

// Encrypted credential store and handshake sessions
pub mod credentials;

// Spotify Web API client
pub mod spotify;

// OAuth flows, eligibility and refresh-on-demand
pub mod oauth;

// Posting to Misskey and Twitter
pub mod publish;

// HTTP API
pub mod api;

// File and environment configuration
pub mod config;
