//! Signed session tokens (HS256 JWT) carried in an HttpOnly cookie.
//!
//! A session asserts "this browser belongs to user X, Spotify user Y" until
//! `exp`. There is no server-side session table; logging out only clears the
//! cookie.

use axum::http::{header::COOKIE, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Development-only signing secret used when `JWT_SECRET` is unset.
pub const DEFAULT_JWT_SECRET: &str = "default-secret-change-in-production";

pub const DEFAULT_COOKIE_NAME: &str = "session_token";

pub const DEFAULT_SESSION_HOURS: i64 = 24 * 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session cookie not present")]
    Missing,
    #[error("invalid session token")]
    Invalid,
    #[error("session token expired")]
    Expired,
    #[error("failed to sign session token")]
    Signing,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub secret: String,
    pub token_duration: Duration,
    pub cookie_name: String,
    /// Adds `Secure` to the cookie. On in production only so local http works.
    pub secure_cookie: bool,
}

impl SessionConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            token_duration: Duration::hours(DEFAULT_SESSION_HOURS),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: false,
        }
    }

    /// Reads `JWT_SECRET` and `ENV`.
    ///
    /// Falls back to [`DEFAULT_JWT_SECRET`] with a warning when no secret is
    /// configured.
    pub fn from_env() -> Self {
        let secret = match std::env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!(
                    "JWT_SECRET is not set, signing sessions with the built-in development secret. \
                     Set JWT_SECRET before deploying."
                );
                DEFAULT_JWT_SECRET.to_string()
            }
        };

        let mut config = Self::new(secret);
        config.secure_cookie = std::env::var("ENV").is_ok_and(|v| v == "production");
        config
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.token_duration = duration;
        self
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret == DEFAULT_JWT_SECRET
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("token_duration", &self.token_duration)
            .field("cookie_name", &self.cookie_name)
            .field("secure_cookie", &self.secure_cookie)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub spotify_user_id: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// Issues and validates session tokens and builds the matching cookies.
#[derive(Clone)]
pub struct SessionIssuer {
    config: SessionConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionIssuer {
    pub fn new(config: SessionConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf"]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Signs a token that expires `token_duration` from now.
    pub fn issue(&self, user_id: Uuid, spotify_user_id: &str) -> Result<String, SessionError> {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id,
            spotify_user_id: spotify_user_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.config.token_duration).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| SessionError::Signing)
    }

    /// Verifies signature and time bounds.
    ///
    /// # Returns
    /// * `Ok(SessionClaims)` - Signature valid and not expired
    /// * `Err(SessionError::Expired)` - Signature valid but `exp` has passed
    /// * `Err(SessionError::Invalid)` - Anything else (bad signature, wrong
    ///   algorithm, malformed token, not yet valid)
    pub fn validate(&self, token: &str) -> Result<SessionClaims, SessionError> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid,
            })
    }

    /// `Set-Cookie` value carrying a freshly issued token.
    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie(token, self.config.token_duration.num_seconds())
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.config.cookie_name, value, max_age
        );
        if self.config.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Reads the session token from the request's `Cookie` headers.
    pub fn read_cookie(&self, headers: &HeaderMap) -> Result<String, SessionError> {
        let prefix = format!("{}=", self.config.cookie_name);

        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|cookie| cookie.trim().strip_prefix(prefix.as_str()))
            .find(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(SessionError::Missing)
    }
}
