use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{zoned, zoned_opt};

// -- Tenants --

/// The enterprise/team scope an installation belongs to.
///
/// Enterprise-wide installs are not team-scoped: `lookup_team_id` drops the
/// team id for them so every lookup collapses onto the same rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    #[serde(default)]
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub is_enterprise_install: bool,
}

impl TenantScope {
    pub fn team(team_id: impl Into<String>) -> Self {
        Self {
            enterprise_id: None,
            team_id: Some(team_id.into()),
            is_enterprise_install: false,
        }
    }

    pub fn enterprise(enterprise_id: impl Into<String>) -> Self {
        Self {
            enterprise_id: Some(enterprise_id.into()),
            team_id: None,
            is_enterprise_install: true,
        }
    }

    pub fn lookup_enterprise_id(&self) -> Option<&str> {
        non_empty(self.enterprise_id.as_deref())
    }

    pub fn lookup_team_id(&self) -> Option<&str> {
        if self.is_enterprise_install {
            None
        } else {
            non_empty(self.team_id.as_deref())
        }
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enterprise={} team={}",
            self.lookup_enterprise_id().unwrap_or("-"),
            self.lookup_team_id().unwrap_or("-")
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// -- Code hosting services --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Github,
    Gitlab,
    Bitbucket,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Bitbucket => "bitbucket",
        }
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gh" | "github" => Ok(Self::Github),
            "gl" | "gitlab" => Ok(Self::Gitlab),
            "bb" | "bitbucket" => Ok(Self::Bitbucket),
            _ => Err("Invalid service. valid services are: github, bitbucket, gitlab".to_string()),
        }
    }
}

// -- Credentials --

/// A persisted OAuth credential set for one tenant.
///
/// Several rows may exist per tenant as tokens rotate and users re-install;
/// readers always want the newest by `installed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub app_id: String,
    #[serde(default)]
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub enterprise_name: Option<String>,
    #[serde(default)]
    pub enterprise_url: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub bot_refresh_token: Option<String>,
    #[serde(default, with = "zoned_opt")]
    pub bot_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub bot_user_id: Option<String>,
    #[serde(default)]
    pub bot_scopes: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default)]
    pub user_refresh_token: Option<String>,
    #[serde(default, with = "zoned_opt")]
    pub user_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_scopes: Option<String>,
    #[serde(default)]
    pub incoming_webhook_url: Option<String>,
    #[serde(default)]
    pub incoming_webhook_channel: Option<String>,
    #[serde(default)]
    pub incoming_webhook_channel_id: Option<String>,
    #[serde(default)]
    pub incoming_webhook_configuration_url: Option<String>,
    #[serde(default)]
    pub is_enterprise_install: bool,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(with = "zoned")]
    pub installed_at: DateTime<Utc>,
}

impl Installation {
    pub fn scope(&self) -> TenantScope {
        TenantScope {
            enterprise_id: self.enterprise_id.clone(),
            team_id: self.team_id.clone(),
            is_enterprise_install: self.is_enterprise_install,
        }
    }

    /// The bot half of this installation, if it carries a bot token.
    pub fn to_bot(&self) -> Option<Bot> {
        let bot_token = self.bot_token.clone()?;
        Some(Bot {
            app_id: self.app_id.clone(),
            enterprise_id: self.enterprise_id.clone(),
            enterprise_name: self.enterprise_name.clone(),
            team_id: self.team_id.clone(),
            team_name: self.team_name.clone(),
            bot_token,
            bot_refresh_token: self.bot_refresh_token.clone(),
            bot_token_expires_at: self.bot_token_expires_at,
            bot_id: self.bot_id.clone(),
            bot_user_id: self.bot_user_id.clone(),
            bot_scopes: self.bot_scopes.clone(),
            is_enterprise_install: self.is_enterprise_install,
            installed_at: self.installed_at,
        })
    }

    /// Overwrite the bot credential fields with those of another row.
    pub fn backfill_bot_credentials(&mut self, from: &Installation) {
        self.bot_token = from.bot_token.clone();
        self.bot_refresh_token = from.bot_refresh_token.clone();
        self.bot_token_expires_at = from.bot_token_expires_at;
        self.bot_id = from.bot_id.clone();
        self.bot_user_id = from.bot_user_id.clone();
        self.bot_scopes = from.bot_scopes.clone();
    }
}

/// Denormalized bot credentials, resolved independently of any user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub app_id: String,
    #[serde(default)]
    pub enterprise_id: Option<String>,
    #[serde(default)]
    pub enterprise_name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub team_name: Option<String>,
    pub bot_token: String,
    #[serde(default)]
    pub bot_refresh_token: Option<String>,
    #[serde(default, with = "zoned_opt")]
    pub bot_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub bot_user_id: Option<String>,
    #[serde(default)]
    pub bot_scopes: Option<String>,
    #[serde(default)]
    pub is_enterprise_install: bool,
    #[serde(with = "zoned")]
    pub installed_at: DateTime<Utc>,
}

// -- Subscriptions --

/// Predicates the event source applies before it calls us. Stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NotificationFilter {
    Author(String),
    Branch(String),
    Reviewer(String),
}

/// "Notify this channel about this repository."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub scope: TenantScope,
    pub owner: String,
    pub repo: String,
    pub channel: String,
    pub filters: Vec<NotificationFilter>,
    pub created_at: DateTime<Utc>,
}

// -- Delivery --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Success,
    Error,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown delivery state: {other}")),
        }
    }
}

/// Last delivered message for one (subscription, pull request) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub id: i64,
    pub subscription_id: i64,
    pub pull_request_id: String,
    pub channel: String,
    pub status: DeliveryState,
    pub message_ts: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
