//! SQLite-backed user store.
//!
//! Holds one row per linked Spotify identity plus the Misskey and Twitter links
//! hanging off it. Provider tokens go through the [`TokenVault`] on the way in
//! and out; callers only ever see plaintext.

use super::{
    MisskeyLink, MisskeyProfile, SpotifyLink, StoreError, TokenSet, TokenVault, TwitterLink,
    TwitterProfile, User,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Default lifetime of a MiAuth or PKCE handshake row.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 600;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    spotify_user_id TEXT NOT NULL UNIQUE,
    spotify_access_token TEXT,
    spotify_refresh_token TEXT,
    spotify_token_expires_at TEXT,
    misskey_instance_url TEXT,
    misskey_access_token TEXT,
    misskey_user_id TEXT,
    misskey_username TEXT,
    misskey_avatar_url TEXT,
    misskey_host TEXT,
    twitter_access_token TEXT,
    twitter_refresh_token TEXT,
    twitter_token_expires_at TEXT,
    twitter_user_id TEXT,
    twitter_username TEXT,
    twitter_avatar_url TEXT,
    api_url_token TEXT NOT NULL UNIQUE,
    api_header_token_hash TEXT,
    api_header_token_enabled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((api_header_token_enabled = 1) = (api_header_token_hash IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS miauth_sessions (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    session_id TEXT NOT NULL UNIQUE,
    instance_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_miauth_sessions_expires_at ON miauth_sessions(expires_at);

CREATE TABLE IF NOT EXISTS twitter_pkce_sessions (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    state TEXT NOT NULL UNIQUE,
    code_verifier TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_twitter_pkce_sessions_expires_at ON twitter_pkce_sessions(expires_at);
"#;

const USER_COLUMNS: &str = "id, spotify_user_id, \
    spotify_access_token, spotify_refresh_token, spotify_token_expires_at, \
    misskey_instance_url, misskey_access_token, misskey_user_id, misskey_username, \
    misskey_avatar_url, misskey_host, \
    twitter_access_token, twitter_refresh_token, twitter_token_expires_at, \
    twitter_user_id, twitter_username, twitter_avatar_url, \
    api_url_token, api_header_token_hash, api_header_token_enabled, \
    created_at, updated_at";

/// Encrypted account storage backed by SQLite.
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex; every operation is a single statement
///   (or a statement plus a read of the row it wrote) under one lock
/// - No in-process cache, reads always hit the database
pub struct CredentialStore {
    conn: Mutex<Connection>,
    vault: Arc<TokenVault>,
    session_ttl: Duration,
}

impl CredentialStore {
    /// Creates or opens a store and applies the schema.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    /// * `vault` - Token encryption shared with the rest of the process
    pub fn new<P: AsRef<Path>>(db_path: P, vault: Arc<TokenVault>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            vault,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECONDS),
        })
    }

    /// Overrides how long new handshake sessions stay valid.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    pub(super) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Inserts a user for a new Spotify identity or refreshes the Spotify
    /// tokens of an existing one.
    ///
    /// The id and capability token are only generated on first insert; an
    /// existing row keeps both.
    pub fn create_or_update_user(
        &self,
        spotify_user_id: &str,
        tokens: &TokenSet,
    ) -> Result<User, StoreError> {
        let access = self.vault.encrypt_token(&tokens.access_token)?;
        let refresh = self.vault.encrypt_optional(tokens.refresh_token.as_deref())?;
        let expires_at = tokens.expires_at.map(format_ts);
        let now = format_ts(Utc::now());

        let conn = self.conn()?;
        let raw = conn.query_row(
            &format!(
                r#"
                INSERT INTO users (
                    id, spotify_user_id,
                    spotify_access_token, spotify_refresh_token, spotify_token_expires_at,
                    api_url_token, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(spotify_user_id) DO UPDATE SET
                    spotify_access_token = excluded.spotify_access_token,
                    spotify_refresh_token = excluded.spotify_refresh_token,
                    spotify_token_expires_at = excluded.spotify_token_expires_at,
                    updated_at = excluded.updated_at
                RETURNING {USER_COLUMNS}
                "#
            ),
            params![
                Uuid::new_v4().to_string(),
                spotify_user_id,
                access,
                refresh,
                expires_at,
                Uuid::new_v4().to_string(),
                now,
            ],
            RawUser::from_row,
        )?;
        drop(conn);

        let user = raw.into_user(&self.vault)?;
        debug!(user_id = %user.id, "Upserted user");
        Ok(user)
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.find_user("id", &id.to_string())
    }

    pub fn get_user_by_spotify_id(&self, spotify_user_id: &str) -> Result<Option<User>, StoreError> {
        self.find_user("spotify_user_id", spotify_user_id)
    }

    /// Looks a user up by the capability token embedded in the post URL.
    pub fn get_user_by_api_token(&self, api_token: Uuid) -> Result<Option<User>, StoreError> {
        self.find_user("api_url_token", &api_token.to_string())
    }

    fn find_user(&self, column: &'static str, value: &str) -> Result<Option<User>, StoreError> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
                params![value],
                RawUser::from_row,
            )
            .optional()?
        };
        raw.map(|r| r.into_user(&self.vault)).transpose()
    }

    /// Replaces the Spotify tokens after a refresh.
    pub fn update_spotify_token(&self, user_id: Uuid, tokens: &TokenSet) -> Result<(), StoreError> {
        let access = self.vault.encrypt_token(&tokens.access_token)?;
        let refresh = self.vault.encrypt_optional(tokens.refresh_token.as_deref())?;

        self.update_user(
            user_id,
            r#"UPDATE users SET
                spotify_access_token = ?2,
                spotify_refresh_token = ?3,
                spotify_token_expires_at = ?4,
                updated_at = ?5
            WHERE id = ?1"#,
            params![
                user_id.to_string(),
                access,
                refresh,
                tokens.expires_at.map(format_ts),
                format_ts(Utc::now()),
            ],
        )
    }

    /// Links (or relinks) a Misskey account.
    pub fn update_misskey_token(
        &self,
        user_id: Uuid,
        instance_url: &str,
        access_token: &str,
        profile: &MisskeyProfile,
        host: &str,
    ) -> Result<(), StoreError> {
        let access = self.vault.encrypt_token(access_token)?;

        self.update_user(
            user_id,
            r#"UPDATE users SET
                misskey_instance_url = ?2,
                misskey_access_token = ?3,
                misskey_user_id = ?4,
                misskey_username = ?5,
                misskey_avatar_url = ?6,
                misskey_host = ?7,
                updated_at = ?8
            WHERE id = ?1"#,
            params![
                user_id.to_string(),
                instance_url,
                access,
                profile.user_id,
                profile.username,
                profile.avatar_url,
                host,
                format_ts(Utc::now()),
            ],
        )
    }

    /// Links (or relinks) a Twitter account.
    pub fn update_twitter_token(
        &self,
        user_id: Uuid,
        tokens: &TokenSet,
        profile: &TwitterProfile,
    ) -> Result<(), StoreError> {
        let access = self.vault.encrypt_token(&tokens.access_token)?;
        let refresh = self.vault.encrypt_optional(tokens.refresh_token.as_deref())?;

        self.update_user(
            user_id,
            r#"UPDATE users SET
                twitter_access_token = ?2,
                twitter_refresh_token = ?3,
                twitter_token_expires_at = ?4,
                twitter_user_id = ?5,
                twitter_username = ?6,
                twitter_avatar_url = ?7,
                updated_at = ?8
            WHERE id = ?1"#,
            params![
                user_id.to_string(),
                access,
                refresh,
                tokens.expires_at.map(format_ts),
                profile.user_id,
                profile.username,
                profile.avatar_url,
                format_ts(Utc::now()),
            ],
        )
    }

    /// Issues a fresh capability token, invalidating the previous URL.
    pub fn regenerate_api_url_token(&self, user_id: Uuid) -> Result<Uuid, StoreError> {
        let token = Uuid::new_v4();
        self.update_user(
            user_id,
            "UPDATE users SET api_url_token = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id.to_string(), token.to_string(), format_ts(Utc::now())],
        )?;
        Ok(token)
    }

    /// Stores the hash of a new header token and enables the check.
    pub fn set_api_header_token(&self, user_id: Uuid, token_hash: &str) -> Result<(), StoreError> {
        self.update_user(
            user_id,
            r#"UPDATE users SET
                api_header_token_hash = ?2,
                api_header_token_enabled = 1,
                updated_at = ?3
            WHERE id = ?1"#,
            params![user_id.to_string(), token_hash, format_ts(Utc::now())],
        )
    }

    pub fn disable_api_header_token(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.update_user(
            user_id,
            r#"UPDATE users SET
                api_header_token_hash = NULL,
                api_header_token_enabled = 0,
                updated_at = ?2
            WHERE id = ?1"#,
            params![user_id.to_string(), format_ts(Utc::now())],
        )
    }

    /// Clears the Misskey instance and token. Profile fields are kept for display.
    pub fn disconnect_misskey(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.update_user(
            user_id,
            r#"UPDATE users SET
                misskey_instance_url = NULL,
                misskey_access_token = NULL,
                updated_at = ?2
            WHERE id = ?1"#,
            params![user_id.to_string(), format_ts(Utc::now())],
        )
    }

    pub fn disconnect_twitter(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.update_user(
            user_id,
            r#"UPDATE users SET
                twitter_access_token = NULL,
                twitter_refresh_token = NULL,
                twitter_token_expires_at = NULL,
                updated_at = ?2
            WHERE id = ?1"#,
            params![user_id.to_string(), format_ts(Utc::now())],
        )
    }

    fn update_user(
        &self,
        user_id: Uuid,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), StoreError> {
        let rows = self.conn()?.execute(sql, params)?;
        if rows == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }
}

/// Row as stored, before decryption and parsing.
struct RawUser {
    id: String,
    spotify_user_id: String,
    spotify_access_token: Option<String>,
    spotify_refresh_token: Option<String>,
    spotify_token_expires_at: Option<String>,
    misskey_instance_url: Option<String>,
    misskey_access_token: Option<String>,
    misskey_user_id: Option<String>,
    misskey_username: Option<String>,
    misskey_avatar_url: Option<String>,
    misskey_host: Option<String>,
    twitter_access_token: Option<String>,
    twitter_refresh_token: Option<String>,
    twitter_token_expires_at: Option<String>,
    twitter_user_id: Option<String>,
    twitter_username: Option<String>,
    twitter_avatar_url: Option<String>,
    api_url_token: String,
    api_header_token_hash: Option<String>,
    api_header_token_enabled: bool,
    created_at: String,
    updated_at: String,
}

impl RawUser {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            spotify_user_id: row.get(1)?,
            spotify_access_token: row.get(2)?,
            spotify_refresh_token: row.get(3)?,
            spotify_token_expires_at: row.get(4)?,
            misskey_instance_url: row.get(5)?,
            misskey_access_token: row.get(6)?,
            misskey_user_id: row.get(7)?,
            misskey_username: row.get(8)?,
            misskey_avatar_url: row.get(9)?,
            misskey_host: row.get(10)?,
            twitter_access_token: row.get(11)?,
            twitter_refresh_token: row.get(12)?,
            twitter_token_expires_at: row.get(13)?,
            twitter_user_id: row.get(14)?,
            twitter_username: row.get(15)?,
            twitter_avatar_url: row.get(16)?,
            api_url_token: row.get(17)?,
            api_header_token_hash: row.get(18)?,
            api_header_token_enabled: row.get(19)?,
            created_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }

    fn into_user(self, vault: &TokenVault) -> Result<User, StoreError> {
        Ok(User {
            id: parse_uuid("id", &self.id)?,
            spotify_user_id: self.spotify_user_id,
            spotify: SpotifyLink {
                access_token: vault.decrypt_optional(self.spotify_access_token)?,
                refresh_token: vault.decrypt_optional(self.spotify_refresh_token)?,
                token_expires_at: parse_optional_ts(
                    "spotify_token_expires_at",
                    self.spotify_token_expires_at,
                )?,
            },
            misskey: MisskeyLink {
                instance_url: self.misskey_instance_url,
                access_token: vault.decrypt_optional(self.misskey_access_token)?,
                user_id: self.misskey_user_id,
                username: self.misskey_username,
                avatar_url: self.misskey_avatar_url,
                host: self.misskey_host,
            },
            twitter: TwitterLink {
                access_token: vault.decrypt_optional(self.twitter_access_token)?,
                refresh_token: vault.decrypt_optional(self.twitter_refresh_token)?,
                token_expires_at: parse_optional_ts(
                    "twitter_token_expires_at",
                    self.twitter_token_expires_at,
                )?,
                user_id: self.twitter_user_id,
                username: self.twitter_username,
                avatar_url: self.twitter_avatar_url,
            },
            api_url_token: parse_uuid("api_url_token", &self.api_url_token)?,
            api_header_token_hash: self.api_header_token_hash,
            api_header_token_enabled: self.api_header_token_enabled,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

/// Fixed-width UTC timestamps so that string comparison in SQL orders correctly.
pub(super) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column,
            value: value.to_string(),
        })
}

fn parse_optional_ts(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub(super) fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt {
        column,
        value: value.to_string(),
    })
}
