use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use covbot_types::models::{NotificationFilter, Subscription, TenantScope};
use covbot_types::time;

use crate::columns::{json, timestamp};
use crate::{Database, Result};

const SUBSCRIPTION_COLUMNS: &str = "id, enterprise_id, team_id, owner, repo, channel, filters, created_at";

#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeOutcome {
    Created(Subscription),
    AlreadySubscribed(Subscription),
}

impl SubscribeOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Created(s) | Self::AlreadySubscribed(s) => s,
        }
    }
}

impl Database {
    /// Idempotent: a repeat of an existing (tenant, owner, repo, channel)
    /// returns the stored row untouched.
    pub fn subscribe(
        &self,
        scope: &TenantScope,
        owner: &str,
        repo: &str,
        channel: &str,
        filters: &[NotificationFilter],
    ) -> Result<SubscribeOutcome> {
        let outcome = self.with_tx(|tx| {
            let created = insert_subscription(tx, scope, owner, repo, channel, filters, Utc::now())?;
            let subscription = select_subscription(tx, scope, owner, repo, channel)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            Ok(if created {
                SubscribeOutcome::Created(subscription)
            } else {
                SubscribeOutcome::AlreadySubscribed(subscription)
            })
        })?;

        if let SubscribeOutcome::Created(s) = &outcome {
            info!(id = s.id, %scope, owner, repo, channel, "subscription created");
        }
        Ok(outcome)
    }

    pub fn find_subscription(
        &self,
        scope: &TenantScope,
        owner: &str,
        repo: &str,
        channel: &str,
    ) -> Result<Option<Subscription>> {
        self.with_conn(|conn| select_subscription(conn, scope, owner, repo, channel))
    }

    /// Returns false when there was nothing to remove.
    pub fn unsubscribe(
        &self,
        scope: &TenantScope,
        owner: &str,
        repo: &str,
        channel: &str,
    ) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM subscriptions
                 WHERE enterprise_id = ?1 AND team_id = ?2 AND owner = ?3 AND repo = ?4 AND channel = ?5",
                params![tenant_enterprise(scope), tenant_team(scope), owner, repo, channel],
            )?)
        })?;

        if removed > 0 {
            info!(%scope, owner, repo, channel, "subscription removed");
        }
        Ok(removed > 0)
    }

    /// Every subscription to a repository across all tenants, oldest first.
    pub fn list_subscribers(&self, owner: &str, repo: &str) -> Result<Vec<Subscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE owner = ?1 AND repo = ?2 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![owner, repo], subscription_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    #[cfg(test)]
    pub(crate) fn list_tenant_subscriptions(&self, scope: &TenantScope) -> Result<Vec<Subscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE enterprise_id = ?1 AND team_id = ?2 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(
                    params![tenant_enterprise(scope), tenant_team(scope)],
                    subscription_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

/// Insert unless the natural key exists. Returns whether a row was created.
pub(crate) fn insert_subscription(
    conn: &Connection,
    scope: &TenantScope,
    owner: &str,
    repo: &str,
    channel: &str,
    filters: &[NotificationFilter],
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO subscriptions (enterprise_id, team_id, owner, repo, channel, filters, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (enterprise_id, team_id, owner, repo, channel) DO NOTHING",
        params![
            tenant_enterprise(scope),
            tenant_team(scope),
            owner,
            repo,
            channel,
            serde_json::to_string(filters)?,
            time::to_storage(&created_at),
        ],
    )?;
    Ok(inserted > 0)
}

pub(crate) fn delete_for_tenant(conn: &Connection, scope: &TenantScope) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM subscriptions WHERE enterprise_id = ?1 AND team_id = ?2",
        params![tenant_enterprise(scope), tenant_team(scope)],
    )?)
}

fn select_subscription(
    conn: &Connection,
    scope: &TenantScope,
    owner: &str,
    repo: &str,
    channel: &str,
) -> Result<Option<Subscription>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                 WHERE enterprise_id = ?1 AND team_id = ?2 AND owner = ?3 AND repo = ?4 AND channel = ?5"
            ),
            params![tenant_enterprise(scope), tenant_team(scope), owner, repo, channel],
            subscription_from_row,
        )
        .optional()?;
    Ok(row)
}

fn tenant_enterprise(scope: &TenantScope) -> &str {
    scope.lookup_enterprise_id().unwrap_or("")
}

fn tenant_team(scope: &TenantScope) -> &str {
    scope.lookup_team_id().unwrap_or("")
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let enterprise_id: String = row.get(1)?;
    let team_id: String = row.get(2)?;
    let is_enterprise_install = !enterprise_id.is_empty() && team_id.is_empty();

    Ok(Subscription {
        id: row.get(0)?,
        scope: TenantScope {
            enterprise_id: Some(enterprise_id).filter(|v| !v.is_empty()),
            team_id: Some(team_id).filter(|v| !v.is_empty()),
            is_enterprise_install,
        },
        owner: row.get(3)?,
        repo: row.get(4)?,
        channel: row.get(5)?,
        filters: json(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let scope = TenantScope::team("T1");
        let filters = vec![NotificationFilter::Branch("main".into())];

        let first = db.subscribe(&scope, "acme", "widgets", "C1", &filters).unwrap();
        assert!(matches!(first, SubscribeOutcome::Created(_)));
        assert_eq!(first.subscription().filters, filters);

        let second = db.subscribe(&scope, "acme", "widgets", "C1", &[]).unwrap();
        assert!(matches!(second, SubscribeOutcome::AlreadySubscribed(_)));
        assert_eq!(second.subscription().id, first.subscription().id);
        assert_eq!(second.subscription().filters, filters);

        assert_eq!(db.list_subscribers("acme", "widgets").unwrap().len(), 1);
    }

    #[test]
    fn subscribers_span_tenants_and_channels() {
        let db = Database::open_in_memory().unwrap();
        db.subscribe(&TenantScope::team("T1"), "acme", "widgets", "C1", &[]).unwrap();
        db.subscribe(&TenantScope::team("T1"), "acme", "widgets", "C2", &[]).unwrap();
        db.subscribe(&TenantScope::enterprise("E1"), "acme", "widgets", "C1", &[]).unwrap();
        db.subscribe(&TenantScope::team("T1"), "acme", "gadgets", "C1", &[]).unwrap();

        let subscribers = db.list_subscribers("acme", "widgets").unwrap();
        assert_eq!(subscribers.len(), 3);
        assert_eq!(subscribers[2].scope, TenantScope::enterprise("E1"));

        assert_eq!(db.list_tenant_subscriptions(&TenantScope::team("T1")).unwrap().len(), 3);
        assert!(db.list_subscribers("acme", "nothing").unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_reports_whether_anything_was_removed() {
        let db = Database::open_in_memory().unwrap();
        let scope = TenantScope::team("T1");
        db.subscribe(&scope, "acme", "widgets", "C1", &[]).unwrap();

        assert!(db.unsubscribe(&scope, "acme", "widgets", "C1").unwrap());
        assert!(!db.unsubscribe(&scope, "acme", "widgets", "C1").unwrap());
        assert!(db.find_subscription(&scope, "acme", "widgets", "C1").unwrap().is_none());
    }

    #[test]
    fn enterprise_install_ignores_team_id() {
        let db = Database::open_in_memory().unwrap();
        let with_team = TenantScope {
            enterprise_id: Some("E1".into()),
            team_id: Some("T9".into()),
            is_enterprise_install: true,
        };
        db.subscribe(&with_team, "acme", "widgets", "C1", &[]).unwrap();

        let found = db
            .find_subscription(&TenantScope::enterprise("E1"), "acme", "widgets", "C1")
            .unwrap();
        assert!(found.is_some());
    }
}
