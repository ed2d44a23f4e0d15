use std::sync::Arc;

use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use covbot_types::models::{Bot, Installation, TenantScope};
use covbot_types::time;

use crate::columns::{non_blank, opt_timestamp, timestamp};
use crate::error::is_unique_violation;
use crate::{Database, DbError, Result, subscriptions};

const INSTALLATION_COLUMNS: &[&str] = &[
    "client_id",
    "app_id",
    "enterprise_id",
    "enterprise_name",
    "enterprise_url",
    "team_id",
    "team_name",
    "bot_token",
    "bot_refresh_token",
    "bot_token_expires_at",
    "bot_id",
    "bot_user_id",
    "bot_scopes",
    "user_id",
    "user_token",
    "user_refresh_token",
    "user_token_expires_at",
    "user_scopes",
    "incoming_webhook_url",
    "incoming_webhook_channel",
    "incoming_webhook_channel_id",
    "incoming_webhook_configuration_url",
    "is_enterprise_install",
    "token_type",
    "installed_at",
];

const BOT_COLUMNS: &[&str] = &[
    "client_id",
    "app_id",
    "enterprise_id",
    "enterprise_name",
    "team_id",
    "team_name",
    "bot_token",
    "bot_refresh_token",
    "bot_token_expires_at",
    "bot_id",
    "bot_user_id",
    "bot_scopes",
    "is_enterprise_install",
    "installed_at",
];

/// Rows removed by a workspace uninstall.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TenantRemoval {
    pub installations: usize,
    pub bots: usize,
    pub subscriptions: usize,
}

/// OAuth credential persistence for one Slack app (`client_id`).
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
    client_id: String,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>, client_id: impl Into<String>) -> Self {
        Self {
            db,
            client_id: client_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Upsert keyed by (client, enterprise, team, installed_at), then upsert
    /// the bot projection. Both writes share one transaction.
    pub fn save_installation(&self, installation: &Installation) -> Result<()> {
        self.db.with_tx(|tx| {
            upsert_installation(tx, &self.client_id, installation)?;
            if let Some(bot) = installation.to_bot() {
                upsert_bot(tx, &self.client_id, &bot)?;
            }
            Ok(())
        })?;

        info!(
            scope = %installation.scope(),
            user_id = %installation.user_id,
            "saved installation"
        );
        Ok(())
    }

    pub fn save_bot(&self, bot: &Bot) -> Result<()> {
        self.db.with_conn(|conn| upsert_bot(conn, &self.client_id, bot))
    }

    /// Latest bot for the scope. Enterprise installs ignore the team id.
    pub fn find_bot(&self, scope: &TenantScope) -> Result<Option<Bot>> {
        let sql = format!(
            "SELECT {} FROM bots
             WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3
             ORDER BY installed_at DESC LIMIT 1",
            BOT_COLUMNS.join(", ")
        );
        self.db.with_conn(|conn| {
            let bot = conn
                .query_row(
                    &sql,
                    params![
                        self.client_id,
                        scope.lookup_enterprise_id(),
                        scope.lookup_team_id()
                    ],
                    bot_from_row,
                )
                .optional()?;
            Ok(bot)
        })
    }

    /// Latest installation for the scope, optionally narrowed to one user.
    ///
    /// A user's own row may carry only user credentials, so when `user_id` is
    /// given the bot fields are replaced by those of the tenant's newest row
    /// that has a bot token.
    pub fn find_installation(
        &self,
        scope: &TenantScope,
        user_id: Option<&str>,
    ) -> Result<Option<Installation>> {
        let enterprise_id = scope.lookup_enterprise_id();
        let team_id = scope.lookup_team_id();

        self.db.with_conn(|conn| {
            let row = match user_id {
                None => latest_installation(conn, &self.client_id, enterprise_id, team_id, "")?,
                Some(user_id) => {
                    let sql = installation_select("AND user_id = ?4");
                    conn.query_row(
                        &sql,
                        params![self.client_id, enterprise_id, team_id, user_id],
                        installation_from_row,
                    )
                    .optional()?
                }
            };

            let Some(mut installation) = row else {
                return Ok(None);
            };

            if user_id.is_some() {
                let latest_bot = latest_installation(
                    conn,
                    &self.client_id,
                    enterprise_id,
                    team_id,
                    "AND bot_token IS NOT NULL",
                )?;
                if let Some(latest_bot) = latest_bot {
                    installation.backfill_bot_credentials(&latest_bot);
                }
            }

            Ok(Some(installation))
        })
    }

    /// Workspace uninstall: drop credentials and every subscription of the tenant.
    /// Delivery statuses follow their subscriptions by cascade.
    pub fn delete_tenant(&self, scope: &TenantScope) -> Result<TenantRemoval> {
        let enterprise_id = scope.lookup_enterprise_id();
        let team_id = scope.lookup_team_id();

        let removal = self.db.with_tx(|tx| {
            let installations = tx.execute(
                "DELETE FROM installations WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3",
                params![self.client_id, enterprise_id, team_id],
            )?;
            let bots = tx.execute(
                "DELETE FROM bots WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3",
                params![self.client_id, enterprise_id, team_id],
            )?;
            let subscriptions = subscriptions::delete_for_tenant(tx, scope)?;
            Ok(TenantRemoval {
                installations,
                bots,
                subscriptions,
            })
        })?;

        info!(
            %scope,
            installations = removal.installations,
            bots = removal.bots,
            subscriptions = removal.subscriptions,
            "removed tenant data"
        );
        Ok(removal)
    }
}

fn installation_select(extra_filter: &str) -> String {
    format!(
        "SELECT {} FROM installations
         WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3 {}
         ORDER BY installed_at DESC LIMIT 1",
        INSTALLATION_COLUMNS.join(", "),
        extra_filter
    )
}

fn latest_installation(
    conn: &Connection,
    client_id: &str,
    enterprise_id: Option<&str>,
    team_id: Option<&str>,
    extra_filter: &str,
) -> Result<Option<Installation>> {
    let sql = installation_select(extra_filter);
    let row = conn
        .query_row(
            &sql,
            params![client_id, enterprise_id, team_id],
            installation_from_row,
        )
        .optional()?;
    Ok(row)
}

fn upsert_installation(conn: &Connection, client_id: &str, i: &Installation) -> Result<()> {
    let enterprise_id = non_blank(i.enterprise_id.as_deref());
    let team_id = non_blank(i.team_id.as_deref());
    let bot_token_expires_at = i.bot_token_expires_at.as_ref().map(time::to_storage);
    let user_token_expires_at = i.user_token_expires_at.as_ref().map(time::to_storage);
    let installed_at = time::to_storage(&i.installed_at);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM installations
             WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3 AND installed_at = ?4",
            params![client_id, enterprise_id, team_id, installed_at],
            |r| r.get(0),
        )
        .optional()?;

    let mut values: Vec<&dyn ToSql> = vec![
        &client_id,
        &i.app_id,
        &enterprise_id,
        &i.enterprise_name,
        &i.enterprise_url,
        &team_id,
        &i.team_name,
        &i.bot_token,
        &i.bot_refresh_token,
        &bot_token_expires_at,
        &i.bot_id,
        &i.bot_user_id,
        &i.bot_scopes,
        &i.user_id,
        &i.user_token,
        &i.user_refresh_token,
        &user_token_expires_at,
        &i.user_scopes,
        &i.incoming_webhook_url,
        &i.incoming_webhook_channel,
        &i.incoming_webhook_channel_id,
        &i.incoming_webhook_configuration_url,
        &i.is_enterprise_install,
        &i.token_type,
        &installed_at,
    ];

    let result = match existing {
        Some(ref id) => {
            debug!(id, "overwriting installation row in place");
            values.push(id);
            conn.execute(&update_sql("installations", INSTALLATION_COLUMNS), values.as_slice())
        }
        None => conn.execute(&insert_sql("installations", INSTALLATION_COLUMNS), values.as_slice()),
    };

    result.map(|_| ()).map_err(|e| {
        if is_unique_violation(&e) {
            DbError::AlreadyInstalled {
                scope: i.scope().to_string(),
            }
        } else {
            e.into()
        }
    })
}

fn upsert_bot(conn: &Connection, client_id: &str, b: &Bot) -> Result<()> {
    let enterprise_id = non_blank(b.enterprise_id.as_deref());
    let team_id = non_blank(b.team_id.as_deref());
    let bot_token_expires_at = b.bot_token_expires_at.as_ref().map(time::to_storage);
    let installed_at = time::to_storage(&b.installed_at);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM bots
             WHERE client_id = ?1 AND enterprise_id IS ?2 AND team_id IS ?3 AND installed_at = ?4",
            params![client_id, enterprise_id, team_id, installed_at],
            |r| r.get(0),
        )
        .optional()?;

    let mut values: Vec<&dyn ToSql> = vec![
        &client_id,
        &b.app_id,
        &enterprise_id,
        &b.enterprise_name,
        &team_id,
        &b.team_name,
        &b.bot_token,
        &b.bot_refresh_token,
        &bot_token_expires_at,
        &b.bot_id,
        &b.bot_user_id,
        &b.bot_scopes,
        &b.is_enterprise_install,
        &installed_at,
    ];

    match existing {
        Some(ref id) => {
            values.push(id);
            conn.execute(&update_sql("bots", BOT_COLUMNS), values.as_slice())?;
        }
        None => {
            conn.execute(&insert_sql("bots", BOT_COLUMNS), values.as_slice())?;
        }
    }
    Ok(())
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// `UPDATE` setting every column; the row id binds to the last placeholder.
fn update_sql(table: &str, columns: &[&str]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE id = ?{}",
        table,
        assignments.join(", "),
        columns.len() + 1
    )
}

// Column indexes follow INSTALLATION_COLUMNS; index 0 is client_id.
fn installation_from_row(row: &Row<'_>) -> rusqlite::Result<Installation> {
    Ok(Installation {
        app_id: row.get(1)?,
        enterprise_id: row.get(2)?,
        enterprise_name: row.get(3)?,
        enterprise_url: row.get(4)?,
        team_id: row.get(5)?,
        team_name: row.get(6)?,
        bot_token: row.get(7)?,
        bot_refresh_token: row.get(8)?,
        bot_token_expires_at: opt_timestamp(row, 9)?,
        bot_id: row.get(10)?,
        bot_user_id: row.get(11)?,
        bot_scopes: row.get(12)?,
        user_id: row.get(13)?,
        user_token: row.get(14)?,
        user_refresh_token: row.get(15)?,
        user_token_expires_at: opt_timestamp(row, 16)?,
        user_scopes: row.get(17)?,
        incoming_webhook_url: row.get(18)?,
        incoming_webhook_channel: row.get(19)?,
        incoming_webhook_channel_id: row.get(20)?,
        incoming_webhook_configuration_url: row.get(21)?,
        is_enterprise_install: row.get(22)?,
        token_type: row.get(23)?,
        installed_at: timestamp(row, 24)?,
    })
}

// Column indexes follow BOT_COLUMNS.
fn bot_from_row(row: &Row<'_>) -> rusqlite::Result<Bot> {
    Ok(Bot {
        app_id: row.get(1)?,
        enterprise_id: row.get(2)?,
        enterprise_name: row.get(3)?,
        team_id: row.get(4)?,
        team_name: row.get(5)?,
        bot_token: row.get(6)?,
        bot_refresh_token: row.get(7)?,
        bot_token_expires_at: opt_timestamp(row, 8)?,
        bot_id: row.get(9)?,
        bot_user_id: row.get(10)?,
        bot_scopes: row.get(11)?,
        is_enterprise_install: row.get(12)?,
        installed_at: timestamp(row, 13)?,
    })
}
