use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use covbot_types::models::{DeliveryState, DeliveryStatus};
use covbot_types::time;

use crate::columns::{parsed, timestamp};
use crate::{Database, Result};

const STATUS_COLUMNS: &str =
    "id, subscription_id, pull_request_id, channel, status, message_ts, created_at, updated_at";

/// What the caller should do with the chat platform for a claimed pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    Post,
    /// `channel` is the id Slack returned when the message was posted.
    Update { channel: String, message_ts: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryClaim {
    pub status_id: i64,
    /// The status row did not exist before this claim.
    pub created: bool,
    pub action: DeliveryAction,
}

impl Database {
    /// Get-or-create the status row for (subscription, pull request) and decide
    /// between a fresh post and an in-place update.
    ///
    /// Only a pre-existing successful row with a message handle is updated.
    /// Fresh rows, failed rows and rows whose post never completed are posted.
    pub fn claim_delivery(
        &self,
        subscription_id: i64,
        pull_request_id: &str,
        channel: &str,
    ) -> Result<DeliveryClaim> {
        self.with_tx(|tx| {
            let now = time::to_storage(&Utc::now());
            let created = tx.execute(
                "INSERT INTO delivery_statuses
                    (subscription_id, pull_request_id, channel, status, message_ts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'success', NULL, ?4, ?4)
                 ON CONFLICT (subscription_id, pull_request_id) DO NOTHING",
                params![subscription_id, pull_request_id, channel, now],
            )? > 0;

            let (status_id, state, posted_channel, message_ts): (
                i64,
                DeliveryState,
                String,
                Option<String>,
            ) = tx.query_row(
                "SELECT id, status, channel, message_ts FROM delivery_statuses
                 WHERE subscription_id = ?1 AND pull_request_id = ?2",
                params![subscription_id, pull_request_id],
                |row| Ok((row.get(0)?, parsed(row, 1)?, row.get(2)?, row.get(3)?)),
            )?;

            let action = match (created, state, message_ts) {
                (false, DeliveryState::Success, Some(message_ts)) => DeliveryAction::Update {
                    channel: posted_channel,
                    message_ts,
                },
                _ => DeliveryAction::Post,
            };

            Ok(DeliveryClaim {
                status_id,
                created,
                action,
            })
        })
    }

    /// Stores the message handle and the channel id Slack resolved it to, so
    /// updates target the id even when the subscription names `#channel`.
    pub fn record_delivery_success(
        &self,
        status_id: i64,
        channel: &str,
        message_ts: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE delivery_statuses
                 SET status = 'success', channel = ?2, message_ts = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![status_id, channel, message_ts, time::to_storage(&Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Marks the pair failed. The previous message handle is kept for audit
    /// but the next claim will post afresh.
    pub fn record_delivery_error(&self, status_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE delivery_statuses SET status = 'error', updated_at = ?2 WHERE id = ?1",
                params![status_id, time::to_storage(&Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn get_delivery_status(
        &self,
        subscription_id: i64,
        pull_request_id: &str,
    ) -> Result<Option<DeliveryStatus>> {
        self.with_conn(|conn| {
            let status = conn
                .query_row(
                    &format!(
                        "SELECT {STATUS_COLUMNS} FROM delivery_statuses
                         WHERE subscription_id = ?1 AND pull_request_id = ?2"
                    ),
                    params![subscription_id, pull_request_id],
                    status_from_row,
                )
                .optional()?;
            Ok(status)
        })
    }

    pub fn list_delivery_statuses(&self, pull_request_id: &str) -> Result<Vec<DeliveryStatus>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM delivery_statuses
                 WHERE pull_request_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![pull_request_id], status_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryStatus> {
    Ok(DeliveryStatus {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        pull_request_id: row.get(2)?,
        channel: row.get(3)?,
        status: parsed(row, 4)?,
        message_ts: row.get(5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}
