//! Slack Web API client: messaging, channel listing and the OAuth v2
//! code exchange.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use covbot_types::blocks::Block;
use covbot_types::models::Installation;

use crate::chat::{ChannelInfo, ChatPlatform, PostedMessage};

const CHANNEL_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConversationsListResponse {
    ok: bool,
    #[serde(default)]
    channels: Vec<Conversation>,
    response_metadata: Option<ResponseMetadata>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Conversation {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    url: Option<String>,
    bot_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OAuthAccessResponse {
    ok: bool,
    error: Option<String>,
    app_id: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    bot_user_id: Option<String>,
    team: Option<NamedEntity>,
    enterprise: Option<NamedEntity>,
    #[serde(default)]
    is_enterprise_install: bool,
    authed_user: Option<AuthedUser>,
    incoming_webhook: Option<IncomingWebhook>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedEntity {
    id: String,
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthedUser {
    id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IncomingWebhook {
    url: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    configuration_url: Option<String>,
}

/// App credentials and scopes for the "Add to Slack" flow.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub user_scopes: Vec<String>,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
}

impl OAuthSettings {
    /// Where to send the installing user, carrying the CSRF `state`.
    pub fn authorize_redirect(&self, state: &str) -> Result<Url> {
        let scopes = self.scopes.join(",");
        let user_scopes = self.user_scopes.join(",");
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", scopes.as_str()),
            ("user_scope", user_scopes.as_str()),
            ("state", state),
        ];
        if let Some(redirect_uri) = &self.redirect_uri {
            params.push(("redirect_uri", redirect_uri.as_str()));
        }
        Url::parse_with_params(&self.authorize_url, &params)
            .with_context(|| format!("invalid slack authorize url {}", self.authorize_url))
    }
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
}

impl SlackClient {
    pub fn new(api_base: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("covbot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Trade an authorization code for tokens and assemble the installation
    /// record, resolving the bot id through `auth.test`.
    pub async fn exchange_code(&self, settings: &OAuthSettings, code: &str) -> Result<Installation> {
        let mut form = vec![
            ("code", code),
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
        ];
        if let Some(redirect_uri) = &settings.redirect_uri {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }

        let response: OAuthAccessResponse = send_json(
            "oauth.v2.access",
            self.http.post(self.url("oauth.v2.access")).form(&form),
        )
        .await?;
        ensure_ok("oauth.v2.access", response.ok, response.error.clone())?;

        let installed_at = Utc::now();
        let authed_user = response
            .authed_user
            .ok_or_else(|| anyhow!("slack oauth.v2.access response missing authed_user"))?;

        let (bot_id, enterprise_url) = match response.access_token.as_deref() {
            Some(bot_token) => {
                let auth = self.auth_test(bot_token).await?;
                let enterprise_url = if response.is_enterprise_install {
                    auth.url
                } else {
                    None
                };
                (auth.bot_id, enterprise_url)
            }
            None => (None, None),
        };

        let webhook = response.incoming_webhook;
        Ok(Installation {
            app_id: response
                .app_id
                .ok_or_else(|| anyhow!("slack oauth.v2.access response missing app_id"))?,
            enterprise_id: response.enterprise.as_ref().map(|e| e.id.clone()),
            enterprise_name: response.enterprise.and_then(|e| e.name),
            enterprise_url,
            team_id: response.team.as_ref().map(|t| t.id.clone()),
            team_name: response.team.and_then(|t| t.name),
            bot_token: response.access_token,
            bot_refresh_token: response.refresh_token,
            bot_token_expires_at: expiry(installed_at, response.expires_in),
            bot_id,
            bot_user_id: response.bot_user_id,
            bot_scopes: response.scope,
            user_id: authed_user.id,
            user_token: authed_user.access_token,
            user_refresh_token: authed_user.refresh_token,
            user_token_expires_at: expiry(installed_at, authed_user.expires_in),
            user_scopes: authed_user.scope,
            incoming_webhook_url: webhook.as_ref().and_then(|w| w.url.clone()),
            incoming_webhook_channel: webhook.as_ref().and_then(|w| w.channel.clone()),
            incoming_webhook_channel_id: webhook.as_ref().and_then(|w| w.channel_id.clone()),
            incoming_webhook_configuration_url: webhook.and_then(|w| w.configuration_url),
            is_enterprise_install: response.is_enterprise_install,
            token_type: response.token_type,
            installed_at,
        })
    }

    async fn auth_test(&self, token: &str) -> Result<AuthTestResponse> {
        let response: AuthTestResponse = send_json(
            "auth.test",
            self.http.post(self.url("auth.test")).bearer_auth(token),
        )
        .await?;
        ensure_ok("auth.test", response.ok, response.error.clone())?;
        Ok(response)
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
        blocks: &[Block],
    ) -> Result<PostedMessage> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "blocks": blocks,
        });
        let response: ChatMessageResponse = send_json(
            "chat.postMessage",
            self.http
                .post(self.url("chat.postMessage"))
                .bearer_auth(token)
                .json(&payload),
        )
        .await?;
        ensure_ok("chat.postMessage", response.ok, response.error)?;

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    async fn update_message(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: &[Block],
    ) -> Result<PostedMessage> {
        let payload = json!({
            "channel": channel,
            "ts": ts,
            "text": text,
            "blocks": blocks,
        });
        let response: ChatMessageResponse = send_json(
            "chat.update",
            self.http
                .post(self.url("chat.update"))
                .bearer_auth(token)
                .json(&payload),
        )
        .await?;
        ensure_ok("chat.update", response.ok, response.error)?;

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response.ts.unwrap_or_else(|| ts.to_string()),
        })
    }

    async fn list_channels(&self, token: &str) -> Result<Vec<ChannelInfo>> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;
        let limit = CHANNEL_PAGE_SIZE.to_string();

        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", limit.as_str()),
            ];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }

            let page: ConversationsListResponse = send_json(
                "conversations.list",
                self.http
                    .get(self.url("conversations.list"))
                    .bearer_auth(token)
                    .query(&query),
            )
            .await?;
            ensure_ok("conversations.list", page.ok, page.error)?;

            channels.extend(page.channels.into_iter().map(|c| ChannelInfo {
                id: c.id,
                name: c.name,
            }));

            match page.response_metadata.map(|m| m.next_cursor) {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(count = channels.len(), "listed slack channels");
        Ok(channels)
    }
}

async fn send_json<T: DeserializeOwned>(method: &str, request: reqwest::RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .with_context(|| format!("slack api {method} request failed"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!(
            "slack api {method} failed with status {}: {}",
            status.as_u16(),
            truncate(&body, 400)
        );
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("failed to decode slack {method}"))
}

fn ensure_ok(method: &str, ok: bool, error: Option<String>) -> Result<()> {
    if !ok {
        bail!(
            "slack {method} failed: {}",
            error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

fn expiry(from: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| from + chrono::Duration::seconds(secs))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
