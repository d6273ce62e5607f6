//! AES-256-GCM encryption for stored provider tokens.
//!
//! Each token is sealed separately with a fresh 96-bit nonce. The stored form is
//! `base64(nonce || ciphertext)` using the standard alphabet, so a single column
//! holds everything needed to open it again.
//!
//! [`TokenCipher`] is the raw primitive. [`TokenVault`] is what the store holds:
//! it owns the optional key, builds the cipher once, and applies the
//! pass-through and legacy-plaintext rules.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::warn;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
pub const NONCE_SIZE: usize = 12;

/// Environment variable holding the token encryption key
pub const KEY_ENV_VAR: &str = "TOKEN_ENCRYPTION_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("encryption key must be {KEY_SIZE} bytes, got {0} bytes")]
    InvalidKey(usize),
    #[error("ciphertext is malformed or too short")]
    InvalidCiphertext,
    #[error("decryption failed (wrong key or corrupted data)")]
    Decryption,
    #[error("encryption failed")]
    Encryption,
}

/// AES-256-GCM cipher bound to a single 32-byte key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from raw key bytes.
    ///
    /// # Returns
    /// * `Ok(TokenCipher)` - Key is exactly 32 bytes
    /// * `Err(CipherError::InvalidKey)` - Any other length
    pub fn from_key(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKey(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey(key.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypts a token with a random nonce.
    ///
    /// Empty input maps to empty output so that "no token" survives a round trip.
    /// Two calls with the same plaintext produce different outputs.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(BASE64.encode(out))
    }

    /// Decrypts a value produced by [`TokenCipher::encrypt`].
    ///
    /// # Returns
    /// * `Ok(String)` - Plaintext (empty for empty input)
    /// * `Err(CipherError::InvalidCiphertext)` - Not base64, or shorter than a nonce
    /// * `Err(CipherError::Decryption)` - Authentication failed (wrong key or tampered)
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let data = BASE64
            .decode(ciphertext)
            .map_err(|_| CipherError::InvalidCiphertext)?;
        if data.len() < NONCE_SIZE {
            return Err(CipherError::InvalidCiphertext);
        }

        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Decryption)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

/// Interprets a configured key.
///
/// Accepts either exactly 32 raw bytes or base64 that decodes to 32 bytes.
/// Raw bytes win when the string itself is 32 bytes long.
pub fn parse_key(raw: &str) -> Result<Vec<u8>, CipherError> {
    if raw.len() == KEY_SIZE {
        return Ok(raw.as_bytes().to_vec());
    }

    match BASE64.decode(raw.trim()) {
        Ok(bytes) if bytes.len() == KEY_SIZE => Ok(bytes),
        Ok(bytes) => Err(CipherError::InvalidKey(bytes.len())),
        Err(_) => Err(CipherError::InvalidKey(raw.len())),
    }
}

/// Token encryption with an optional key.
///
/// - No key configured: tokens pass through unchanged in both directions.
/// - Key configured: tokens are encrypted on write. On read, a value that fails
///   to decrypt is returned unchanged so rows written before encryption was
///   enabled keep working. A corrupted ciphertext is therefore indistinguishable
///   from legacy plaintext and will be handed to the provider as-is.
///
/// The cipher is built lazily on first use and reused afterwards.
pub struct TokenVault {
    key: Option<String>,
    cipher: OnceLock<Result<TokenCipher, CipherError>>,
}

impl TokenVault {
    /// Creates a vault from an optional key string. Empty strings count as unset.
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()),
            cipher: OnceLock::new(),
        }
    }

    /// Reads the key from `TOKEN_ENCRYPTION_KEY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(KEY_ENV_VAR).ok())
    }

    /// Vault that never encrypts.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Vault around an already constructed cipher.
    pub fn with_cipher(cipher: TokenCipher) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Ok(cipher));
        Self {
            key: Some(String::new()),
            cipher: cell,
        }
    }

    /// Whether tokens written through this vault are encrypted.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Checks the configured key eagerly so a bad key fails at startup
    /// instead of on the first login.
    pub fn validate(&self) -> Result<(), CipherError> {
        self.cipher().map(|_| ())
    }

    fn cipher(&self) -> Result<Option<&TokenCipher>, CipherError> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let built = self
            .cipher
            .get_or_init(|| parse_key(key).and_then(|bytes| TokenCipher::from_key(&bytes)));
        match built {
            Ok(cipher) => Ok(Some(cipher)),
            Err(e) => Err(e.clone()),
        }
    }

    /// Encrypts a token for storage (identity when no key is configured).
    pub fn encrypt_token(&self, plaintext: &str) -> Result<String, CipherError> {
        match self.cipher()? {
            Some(cipher) => cipher.encrypt(plaintext),
            None => Ok(plaintext.to_string()),
        }
    }

    /// Decrypts a stored token, falling back to the stored value when it
    /// does not decrypt.
    pub fn decrypt_token(&self, stored: &str) -> Result<String, CipherError> {
        let Some(cipher) = self.cipher()? else {
            return Ok(stored.to_string());
        };
        match cipher.decrypt(stored) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                warn!(error = %e, "Stored token did not decrypt, treating it as legacy plaintext");
                Ok(stored.to_string())
            }
        }
    }

    pub fn encrypt_optional(&self, value: Option<&str>) -> Result<Option<String>, CipherError> {
        value.map(|v| self.encrypt_token(v)).transpose()
    }

    pub fn decrypt_optional(&self, value: Option<String>) -> Result<Option<String>, CipherError> {
        value.map(|v| self.decrypt_token(&v)).transpose()
    }
}

impl std::fmt::Debug for TokenVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVault")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
