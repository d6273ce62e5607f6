//! Random tokens, hashing, and PKCE (RFC 7636, S256 only).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Bytes of entropy in a PKCE verifier (hex-encoded to 64 characters).
const PKCE_VERIFIER_BYTES: usize = 32;

/// Returns `n` random bytes from the OS CSPRNG, hex-encoded (`2n` characters).
pub fn generate_random_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of the input as 64 lowercase hex characters.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// 64-character verifier, within the 43..=128 range the RFC allows.
pub fn generate_pkce_verifier() -> String {
    generate_random_token(PKCE_VERIFIER_BYTES)
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
