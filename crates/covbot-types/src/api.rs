use serde::{Deserialize, Serialize};

use crate::models::{NotificationFilter, TenantScope};

// -- Comparison webhook --

/// Body of `POST /notify`. Fields are optional so a missing one becomes a
/// 400 with a readable message instead of a decoder rejection.
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub comparison: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyResponse {
    pub detail: String,
    pub subscribers: usize,
    pub posted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

// -- Subscriptions --

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub service: String,
    pub owner: String,
    pub repository: String,
    pub channel: String,
    /// Stored with the subscription; the event source applies them.
    #[serde(default)]
    pub filters: Vec<NotificationFilter>,
    #[serde(default)]
    pub confirm_private: bool,
    /// Reporting-service token of the requesting user, for private repositories.
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(flatten)]
    pub scope: TenantScope,
    pub owner: String,
    pub repository: String,
    pub channel: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// -- Slack OAuth --

#[derive(Debug, Deserialize)]
pub struct OAuthRedirectQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// -- Slack events --

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        #[serde(default)]
        enterprise_id: Option<String>,
        #[serde(default)]
        is_enterprise_install: bool,
        event: SlackEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    AppUninstalled,
    #[serde(other)]
    Other,
}
