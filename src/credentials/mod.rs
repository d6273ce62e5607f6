//! Encrypted storage for linked accounts and OAuth handshake sessions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                   │
//! │  - users (Spotify/Misskey/Twitter)      │
//! │  - MiAuth + PKCE handshake sessions     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenVault                        │
//! │  - AES-256-GCM, nonce per token         │
//! │  - pass-through when no key is set      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use nowplaying::credentials::{CredentialStore, TokenSet, TokenVault};
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let vault = Arc::new(TokenVault::from_env());
//! let store = CredentialStore::new("nowplaying.db", vault)?;
//!
//! let tokens = TokenSet {
//!     access_token: "spotify_access_token".to_string(),
//!     refresh_token: Some("spotify_refresh_token".to_string()),
//!     expires_at: Some(Utc::now() + Duration::hours(1)),
//! };
//! let user = store.create_or_update_user("spotify-user", &tokens)?;
//! println!("capability token: {}", user.api_url_token);
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - Provider access and refresh tokens are encrypted at rest
//! - The API header token is stored only as a SHA-256 hash
//! - The encryption key lives in memory only (from env var)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

mod encryption;
mod sessions;
mod storage;

pub use encryption::{parse_key, CipherError, TokenCipher, TokenVault, KEY_SIZE, NONCE_SIZE};
pub use sessions::{run_session_cleanup, SweepStats};
pub use storage::{CredentialStore, DEFAULT_SESSION_TTL_SECONDS};

/// OAuth tokens returned by a provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    pub expires_at: Option<DateTime<Utc>>,
}

/// Spotify link. Present on every user, tokens may be missing on legacy rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpotifyLink {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MisskeyLink {
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub host: Option<String>,
}

impl MisskeyLink {
    /// A Misskey account counts as linked when both instance and token are known.
    pub fn is_connected(&self) -> bool {
        self.instance_url.as_deref().is_some_and(|s| !s.is_empty())
            && self.access_token.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TwitterLink {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl TwitterLink {
    pub fn is_connected(&self) -> bool {
        self.access_token.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A linked account, keyed by Spotify identity. Tokens are already decrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub spotify_user_id: String,
    pub spotify: SpotifyLink,
    pub misskey: MisskeyLink,
    pub twitter: TwitterLink,
    /// Capability token used in the post-on-demand URL
    pub api_url_token: Uuid,
    /// SHA-256 hex of the optional header token, never the plaintext
    pub api_header_token_hash: Option<String>,
    pub api_header_token_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields captured when a Misskey account is linked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MisskeyProfile {
    pub user_id: String,
    pub username: String,
    pub avatar_url: String,
}

/// Profile fields captured when a Twitter account is linked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TwitterProfile {
    pub user_id: String,
    pub username: String,
    pub avatar_url: String,
}

/// Pending MiAuth handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MiAuthSession {
    pub id: i64,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub instance_url: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Pending Twitter PKCE handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkceSession {
    pub id: i64,
    pub user_id: Uuid,
    pub state: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("token cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Outcome of a cleanup step whose failure must not fail the caller.
///
/// Session deletes after a successful callback and the periodic sweep are
/// best-effort: a leftover row expires on its own. The type keeps that choice
/// visible at the call site instead of hiding it behind a discarded `Result`.
#[must_use]
#[derive(Debug)]
pub enum BestEffort<T> {
    Done(T),
    Failed(StoreError),
}

impl<T> BestEffort<T> {
    pub fn from_result(result: Result<T, StoreError>) -> Self {
        match result {
            Ok(value) => BestEffort::Done(value),
            Err(e) => BestEffort::Failed(e),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            BestEffort::Failed(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done(_))
    }

    /// Logs a failure at warn level and returns the value if there was one.
    pub fn log_failure(self, operation: &str) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            BestEffort::Failed(e) => {
                warn!(operation, error = %e, "Best-effort store operation failed");
                None
            }
        }
    }
}
