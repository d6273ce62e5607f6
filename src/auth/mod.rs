//! Session tokens, bearer header parsing, and secret helpers.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use thiserror::Error;

pub mod secrets;
pub mod session;

#[cfg(test)]
mod tests;

pub use secrets::{generate_pkce_verifier, generate_random_token, hash_token, pkce_challenge};
pub use session::{SessionClaims, SessionConfig, SessionError, SessionIssuer};

/// Reads `Authorization: Bearer <token>`.
///
/// The scheme is case-insensitive and whitespace around the token is dropped.
/// A header that is present but carries no token counts as
/// [`TokenError::Empty`], which callers treat like a malformed header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    let (scheme, token) = value.split_once(' ').ok_or(TokenError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::InvalidFormat);
    }

    match token.trim() {
        "" => Err(TokenError::Empty),
        token => Ok(token.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("authorization header required")]
    Missing,
    #[error("invalid authorization header format")]
    InvalidFormat,
    #[error("bearer token is empty")]
    Empty,
}
