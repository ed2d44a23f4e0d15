use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE installations (
                id                                  INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id                           TEXT NOT NULL,
                app_id                              TEXT NOT NULL,
                enterprise_id                       TEXT,
                enterprise_name                     TEXT,
                enterprise_url                      TEXT,
                team_id                             TEXT,
                team_name                           TEXT,
                bot_token                           TEXT UNIQUE,
                bot_refresh_token                   TEXT,
                bot_token_expires_at                TEXT,
                bot_id                              TEXT,
                bot_user_id                         TEXT,
                bot_scopes                          TEXT,
                user_id                             TEXT NOT NULL,
                user_token                          TEXT,
                user_refresh_token                  TEXT,
                user_token_expires_at               TEXT,
                user_scopes                         TEXT,
                incoming_webhook_url                TEXT,
                incoming_webhook_channel            TEXT,
                incoming_webhook_channel_id         TEXT,
                incoming_webhook_configuration_url  TEXT,
                is_enterprise_install               INTEGER NOT NULL DEFAULT 0,
                token_type                          TEXT,
                installed_at                        TEXT NOT NULL
            );

            CREATE INDEX idx_installations_lookup
                ON installations (client_id, enterprise_id, team_id, user_id, installed_at);

            CREATE TABLE bots (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id               TEXT NOT NULL,
                app_id                  TEXT NOT NULL,
                enterprise_id           TEXT,
                enterprise_name         TEXT,
                team_id                 TEXT,
                team_name               TEXT,
                bot_token               TEXT NOT NULL,
                bot_refresh_token       TEXT,
                bot_token_expires_at    TEXT,
                bot_id                  TEXT,
                bot_user_id             TEXT,
                bot_scopes              TEXT,
                is_enterprise_install   INTEGER NOT NULL DEFAULT 0,
                installed_at            TEXT NOT NULL
            );

            CREATE INDEX idx_bots_lookup
                ON bots (client_id, enterprise_id, team_id, installed_at);

            CREATE TABLE oauth_states (
                state      TEXT PRIMARY KEY,
                expire_at  TEXT NOT NULL
            );

            -- Tenant columns use '' for absent so the unique key works.
            CREATE TABLE subscriptions (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                enterprise_id  TEXT NOT NULL DEFAULT '',
                team_id        TEXT NOT NULL DEFAULT '',
                owner          TEXT NOT NULL,
                repo           TEXT NOT NULL,
                channel        TEXT NOT NULL,
                filters        TEXT NOT NULL DEFAULT '[]',
                created_at     TEXT NOT NULL,
                UNIQUE (enterprise_id, team_id, owner, repo, channel)
            );

            CREATE INDEX idx_subscriptions_repo
                ON subscriptions (owner, repo);

            CREATE TABLE delivery_statuses (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id  INTEGER NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
                pull_request_id  TEXT NOT NULL,
                channel          TEXT NOT NULL,
                status           TEXT NOT NULL DEFAULT 'success'
                                 CHECK (status IN ('success', 'error')),
                message_ts       TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                UNIQUE (subscription_id, pull_request_id)
            );

            -- Pre-subscription layout: one row per (installation, owner, repo)
            -- holding a JSON array of channels. Read only by the legacy migration.
            CREATE TABLE legacy_notifications (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                installation_id  INTEGER NOT NULL,
                owner            TEXT,
                repo             TEXT,
                channels         TEXT NOT NULL DEFAULT '[]',
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                migrated_at      TEXT
            );

            CREATE TABLE legacy_notification_statuses (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                notification_id  INTEGER NOT NULL
                                 REFERENCES legacy_notifications(id) ON DELETE CASCADE,
                channel          TEXT,
                pullid           TEXT,
                status           TEXT NOT NULL DEFAULT 'success',
                message_ts       TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete (schema v{})", SCHEMA_VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
