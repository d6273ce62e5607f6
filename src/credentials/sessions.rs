//! Short-lived OAuth handshake sessions.
//!
//! A MiAuth session is keyed by the session id handed to the Misskey instance,
//! a PKCE session by the `state` parameter sent to Twitter. Both are written at
//! flow start, read once at callback, and deleted after use. Rows that are never
//! consumed are removed by [`run_session_cleanup`].

use super::storage::{format_ts, parse_ts, parse_uuid};
use super::{BestEffort, CredentialStore, MiAuthSession, PkceSession, StoreError};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Rows removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub miauth_sessions: usize,
    pub pkce_sessions: usize,
}

impl SweepStats {
    pub fn total(&self) -> usize {
        self.miauth_sessions + self.pkce_sessions
    }
}

impl CredentialStore {
    pub fn create_miauth_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        instance_url: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.conn()?.execute(
            r#"
            INSERT INTO miauth_sessions (user_id, session_id, instance_url, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user_id.to_string(),
                session_id.to_string(),
                instance_url,
                format_ts(now),
                format_ts(now + self.session_ttl()),
            ],
        )?;
        Ok(())
    }

    /// Returns the session only while it has not expired.
    pub fn get_miauth_session(&self, session_id: Uuid) -> Result<Option<MiAuthSession>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT id, user_id, session_id, instance_url, created_at, expires_at
                FROM miauth_sessions
                WHERE session_id = ?1 AND expires_at > ?2
                "#,
                params![session_id.to_string(), format_ts(Utc::now())],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, user_id, session_id, instance_url, created_at, expires_at)| {
            Ok(MiAuthSession {
                id,
                user_id: parse_uuid("user_id", &user_id)?,
                session_id: parse_uuid("session_id", &session_id)?,
                instance_url,
                created_at: parse_ts("created_at", &created_at)?,
                expires_at: parse_ts("expires_at", &expires_at)?,
            })
        })
        .transpose()
    }

    /// Removes a consumed session. `Done(false)` means it was already gone.
    pub fn delete_miauth_session(&self, session_id: Uuid) -> BestEffort<bool> {
        BestEffort::from_result(self.delete_where(
            "DELETE FROM miauth_sessions WHERE session_id = ?1",
            &session_id.to_string(),
        ))
    }

    pub fn create_pkce_session(
        &self,
        user_id: Uuid,
        state: &str,
        code_verifier: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.conn()?.execute(
            r#"
            INSERT INTO twitter_pkce_sessions (user_id, state, code_verifier, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                user_id.to_string(),
                state,
                code_verifier,
                format_ts(now),
                format_ts(now + self.session_ttl()),
            ],
        )?;
        Ok(())
    }

    /// Returns the session only while it has not expired.
    pub fn get_pkce_session(&self, state: &str) -> Result<Option<PkceSession>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT id, user_id, state, code_verifier, created_at, expires_at
                FROM twitter_pkce_sessions
                WHERE state = ?1 AND expires_at > ?2
                "#,
                params![state, format_ts(Utc::now())],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, user_id, state, code_verifier, created_at, expires_at)| {
            Ok(PkceSession {
                id,
                user_id: parse_uuid("user_id", &user_id)?,
                state,
                code_verifier,
                created_at: parse_ts("created_at", &created_at)?,
                expires_at: parse_ts("expires_at", &expires_at)?,
            })
        })
        .transpose()
    }

    pub fn delete_pkce_session(&self, state: &str) -> BestEffort<bool> {
        BestEffort::from_result(
            self.delete_where("DELETE FROM twitter_pkce_sessions WHERE state = ?1", state),
        )
    }

    fn delete_where(&self, sql: &str, key: &str) -> Result<bool, StoreError> {
        let rows = self.conn()?.execute(sql, params![key])?;
        Ok(rows > 0)
    }

    /// Deletes every expired handshake row. Safe to run repeatedly.
    pub fn cleanup_expired_sessions(&self) -> BestEffort<SweepStats> {
        BestEffort::from_result(self.sweep())
    }

    fn sweep(&self) -> Result<SweepStats, StoreError> {
        let now = format_ts(Utc::now());
        let conn = self.conn()?;
        let miauth_sessions = conn.execute(
            "DELETE FROM miauth_sessions WHERE expires_at < ?1",
            params![now],
        )?;
        let pkce_sessions = conn.execute(
            "DELETE FROM twitter_pkce_sessions WHERE expires_at < ?1",
            params![now],
        )?;
        Ok(SweepStats {
            miauth_sessions,
            pkce_sessions,
        })
    }
}

/// Background task to periodically remove expired handshake sessions
pub async fn run_session_cleanup(store: Arc<CredentialStore>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        if let Some(stats) = store.cleanup_expired_sessions().log_failure("session cleanup") {
            if stats.total() > 0 {
                info!(
                    miauth_sessions = stats.miauth_sessions,
                    pkce_sessions = stats.pkce_sessions,
                    "Removed expired handshake sessions"
                );
            } else {
                debug!("Handshake session cleanup complete, nothing expired");
            }
        }
    }
}
