//! One-way move from the old per-repository notification rows to
//! per-channel subscriptions.
//!
//! Each legacy row fans out into one subscription per channel in its JSON
//! list, and its delivery statuses follow the matching subscription. A row
//! is stamped with `migrated_at` in the same transaction, so running the
//! migration again only picks up rows added since.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use covbot_types::models::{DeliveryState, TenantScope};
use covbot_types::time;

use crate::columns::timestamp;
use crate::{Database, Result, subscriptions};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LegacyMigrationReport {
    /// Legacy rows stamped as migrated by this run.
    pub notifications: usize,
    pub subscriptions_created: usize,
    pub statuses_carried: usize,
    /// Statuses without a pull id or channel, which cannot be keyed.
    pub statuses_dropped: usize,
    /// Rows whose installation no longer exists. Left unstamped.
    pub orphaned: usize,
    /// Rows whose channel list is null or not a JSON string array. Left unstamped.
    pub malformed: usize,
}

struct LegacyNotification {
    id: i64,
    installation_id: i64,
    owner: Option<String>,
    repo: Option<String>,
    channels: String,
    created_at: DateTime<Utc>,
}

struct LegacyStatus {
    channel: Option<String>,
    pullid: Option<String>,
    status: String,
    message_ts: Option<String>,
    created_at: String,
    updated_at: String,
}

impl Database {
    pub fn migrate_legacy_notifications(&self) -> Result<LegacyMigrationReport> {
        let report = self.with_tx(|tx| {
            let pending = pending_notifications(tx)?;
            let mut report = LegacyMigrationReport::default();

            for legacy in pending {
                let Some(scope) = installation_scope(tx, legacy.installation_id)? else {
                    warn!(
                        legacy_id = legacy.id,
                        installation_id = legacy.installation_id,
                        "legacy notification has no installation, leaving it in place"
                    );
                    report.orphaned += 1;
                    continue;
                };

                let channels = match serde_json::from_str::<Vec<String>>(&legacy.channels) {
                    Ok(channels) => channels,
                    Err(e) => {
                        warn!(
                            legacy_id = legacy.id,
                            "legacy notification has an unreadable channel list, leaving it in place: {}",
                            e
                        );
                        report.malformed += 1;
                        continue;
                    }
                };

                migrate_one(tx, &legacy, &scope, &channels, &mut report)?;

                tx.execute(
                    "UPDATE legacy_notifications SET migrated_at = ?2 WHERE id = ?1",
                    params![legacy.id, time::to_storage(&Utc::now())],
                )?;
                report.notifications += 1;
            }

            Ok(report)
        })?;

        if report.notifications > 0 || report.orphaned > 0 || report.malformed > 0 {
            info!(
                notifications = report.notifications,
                subscriptions = report.subscriptions_created,
                statuses = report.statuses_carried,
                dropped = report.statuses_dropped,
                orphaned = report.orphaned,
                malformed = report.malformed,
                "legacy notifications migrated"
            );
        }
        Ok(report)
    }
}

fn pending_notifications(conn: &Connection) -> Result<Vec<LegacyNotification>> {
    let mut stmt = conn.prepare(
        "SELECT id, installation_id, owner, repo, channels, created_at
         FROM legacy_notifications WHERE migrated_at IS NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LegacyNotification {
                id: row.get(0)?,
                installation_id: row.get(1)?,
                owner: row.get(2)?,
                repo: row.get(3)?,
                channels: row.get(4)?,
                created_at: timestamp(row, 5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn installation_scope(conn: &Connection, installation_id: i64) -> Result<Option<TenantScope>> {
    let scope = conn
        .query_row(
            "SELECT enterprise_id, team_id, is_enterprise_install FROM installations WHERE id = ?1",
            params![installation_id],
            |row| {
                Ok(TenantScope {
                    enterprise_id: row.get(0)?,
                    team_id: row.get(1)?,
                    is_enterprise_install: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(scope)
}

fn migrate_one(
    conn: &Connection,
    legacy: &LegacyNotification,
    scope: &TenantScope,
    channels: &[String],
    report: &mut LegacyMigrationReport,
) -> Result<()> {
    let (Some(owner), Some(repo)) = (legacy.owner.as_deref(), legacy.repo.as_deref()) else {
        warn!(legacy_id = legacy.id, "legacy notification without owner/repo, nothing to migrate");
        return Ok(());
    };

    for channel in channels {
        if subscriptions::insert_subscription(
            conn,
            scope,
            owner,
            repo,
            channel,
            &[],
            legacy.created_at,
        )? {
            report.subscriptions_created += 1;
        }
    }

    for status in legacy_statuses(conn, legacy.id)? {
        let (Some(channel), Some(pullid)) = (status.channel.as_deref(), status.pullid.as_deref())
        else {
            report.statuses_dropped += 1;
            continue;
        };

        let subscription_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM subscriptions
                 WHERE enterprise_id = ?1 AND team_id = ?2 AND owner = ?3 AND repo = ?4 AND channel = ?5",
                params![
                    scope.lookup_enterprise_id().unwrap_or(""),
                    scope.lookup_team_id().unwrap_or(""),
                    owner,
                    repo,
                    channel
                ],
                |r| r.get(0),
            )
            .optional()?;
        let Some(subscription_id) = subscription_id else {
            report.statuses_dropped += 1;
            continue;
        };

        let state = status
            .status
            .parse::<DeliveryState>()
            .unwrap_or(DeliveryState::Error);
        let carried = conn.execute(
            "INSERT INTO delivery_statuses
                (subscription_id, pull_request_id, channel, status, message_ts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (subscription_id, pull_request_id) DO NOTHING",
            params![
                subscription_id,
                pullid,
                channel,
                state.as_str(),
                status.message_ts,
                status.created_at,
                status.updated_at
            ],
        )?;
        report.statuses_carried += carried;
    }

    Ok(())
}

fn legacy_statuses(conn: &Connection, notification_id: i64) -> Result<Vec<LegacyStatus>> {
    let mut stmt = conn.prepare(
        "SELECT channel, pullid, status, message_ts, created_at, updated_at
         FROM legacy_notification_statuses WHERE notification_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![notification_id], |row| {
            Ok(LegacyStatus {
                channel: row.get(0)?,
                pullid: row.get(1)?,
                status: row.get(2)?,
                message_ts: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
