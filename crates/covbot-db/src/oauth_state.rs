use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{OptionalExtension, params};
use tracing::{debug, warn};

use covbot_types::time;

use crate::columns::timestamp;
use crate::{Database, Result};

impl Database {
    pub fn insert_oauth_state(&self, state: &str, expire_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO oauth_states (state, expire_at) VALUES (?1, ?2)",
                params![state, time::to_storage(&expire_at)],
            )?;
            Ok(())
        })
    }

    /// Delete the token and report whether it was still valid at `now`.
    /// Unknown tokens leave the table untouched.
    pub fn consume_oauth_state(&self, state: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_tx(|tx| {
            let expire_at = tx
                .query_row(
                    "SELECT state, expire_at FROM oauth_states WHERE state = ?1",
                    params![state],
                    |row| timestamp(row, 1),
                )
                .optional()?;

            let Some(expire_at) = expire_at else {
                return Ok(false);
            };

            tx.execute("DELETE FROM oauth_states WHERE state = ?1", params![state])?;
            Ok(expire_at > now)
        })
    }

    pub fn purge_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM oauth_states WHERE expire_at <= ?1",
                params![time::to_storage(&now)],
            )?;
            Ok(removed)
        })
    }

    pub fn oauth_state_exists(&self, state: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM oauth_states WHERE state = ?1",
                    params![state],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }
}

/// One-time CSRF tokens for the OAuth install round trip.
#[derive(Clone)]
pub struct OAuthStateStore {
    db: Arc<Database>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Generate and persist a fresh token valid for the configured TTL.
    pub fn issue(&self) -> Result<String> {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);

        self.db.insert_oauth_state(&state, Utc::now() + self.ttl)?;
        debug!("issued oauth state");
        Ok(state)
    }

    /// True exactly once per issued token, and only before it expires.
    pub fn consume(&self, state: &str) -> Result<bool> {
        let valid = self.db.consume_oauth_state(state, Utc::now())?;
        if !valid {
            warn!("rejected unknown or expired oauth state");
        }
        Ok(valid)
    }

    pub fn purge_expired(&self) -> Result<usize> {
        self.db.purge_expired_oauth_states(Utc::now())
    }
}
