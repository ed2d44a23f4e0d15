use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use covbot_db::{CredentialStore, Database, OAuthStateStore};
use covbot_integrations::{
    ChannelInfo, ChatPlatform, OAuthSettings, PostedMessage, ReportingApi, RepositoryInfo,
    SlackClient,
};
use covbot_notify::{DeliveryEngine, EngineOptions, NotificationService};
use covbot_types::blocks::Block;
use covbot_types::models::{Installation, Service};

use crate::state::{AppState, AppStateInner};

pub const INTERNAL_TOKEN: &str = "internal-token";
pub const SIGNING_SECRET: &str = "signing-secret";

#[derive(Default)]
pub struct CountingChat {
    posts: AtomicUsize,
    updates: AtomicUsize,
}

impl CountingChat {
    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatPlatform for CountingChat {
    async fn post_message(
        &self,
        _token: &str,
        channel: &str,
        _text: &str,
        _blocks: &[Block],
    ) -> Result<PostedMessage> {
        let n = self.posts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PostedMessage {
            channel: channel.to_string(),
            ts: format!("1700000000.{n:06}"),
        })
    }

    async fn update_message(
        &self,
        _token: &str,
        channel: &str,
        ts: &str,
        _text: &str,
        _blocks: &[Block],
    ) -> Result<PostedMessage> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(PostedMessage {
            channel: channel.to_string(),
            ts: ts.to_string(),
        })
    }

    async fn list_channels(&self, _token: &str) -> Result<Vec<ChannelInfo>> {
        Ok(vec![ChannelInfo {
            id: "C1".into(),
            name: "general".into(),
        }])
    }
}

/// `acme/widgets` is public, `acme/secret` private, everything else unknown.
pub struct StaticReporting {
    repos: HashMap<&'static str, bool>,
}

impl Default for StaticReporting {
    fn default() -> Self {
        Self {
            repos: HashMap::from([("acme/widgets", false), ("acme/secret", true)]),
        }
    }
}

#[async_trait]
impl ReportingApi for StaticReporting {
    async fn repository(
        &self,
        _service: Service,
        owner: &str,
        repo: &str,
        _token: Option<&str>,
    ) -> Result<Option<RepositoryInfo>> {
        Ok(self
            .repos
            .get(format!("{owner}/{repo}").as_str())
            .map(|private| RepositoryInfo {
                name: repo.to_string(),
                private: *private,
                active: Some(true),
            }))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub chat: Arc<CountingChat>,
}

impl TestApp {
    pub fn new() -> Self {
        // Nothing listens on the discard port; only oauth tests talk to Slack.
        Self::with_slack("http://127.0.0.1:9")
    }

    pub fn with_slack(api_base: &str) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let credentials = CredentialStore::new(db.clone(), "client-1");
        let chat = Arc::new(CountingChat::default());
        let engine = DeliveryEngine::new(
            db.clone(),
            credentials.clone(),
            chat.clone(),
            EngineOptions::default(),
        );
        let notifications =
            NotificationService::new(db.clone(), Arc::new(StaticReporting::default()));

        let state = Arc::new(AppStateInner {
            credentials,
            oauth_states: OAuthStateStore::new(db.clone(), Duration::seconds(120)),
            engine,
            notifications,
            slack: SlackClient::new(api_base, 2_000).unwrap(),
            oauth: OAuthSettings {
                client_id: "client-1".into(),
                client_secret: "client-secret".into(),
                scopes: vec!["commands".into(), "chat:write".into()],
                user_scopes: vec![],
                redirect_uri: None,
                authorize_url: "https://slack.com/oauth/v2/authorize".into(),
            },
            internal_token: INTERNAL_TOKEN.into(),
            signing_secret: SIGNING_SECRET.into(),
            db,
        });

        Self { state, chat }
    }

    pub fn install_bot(&self, team: &str) {
        self.state
            .credentials
            .save_installation(&installation(team))
            .unwrap();
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        self.send(Request::get(path).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, path: &str, token: Option<&str>, body: Value) -> Response<Body> {
        self.send_json(Method::POST, path, token, body).await
    }

    pub async fn delete_json(&self, path: &str, token: Option<&str>, body: Value) -> Response<Body> {
        self.send_json(Method::DELETE, path, token, body).await
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        crate::router(self.state.clone()).oneshot(req).await.unwrap()
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Value,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }
}

pub fn installation(team: &str) -> Installation {
    Installation {
        app_id: "A1".into(),
        enterprise_id: None,
        enterprise_name: None,
        enterprise_url: None,
        team_id: Some(team.into()),
        team_name: Some("Acme".into()),
        bot_token: Some(format!("xoxb-{team}")),
        bot_refresh_token: None,
        bot_token_expires_at: None,
        bot_id: Some("B1".into()),
        bot_user_id: Some("UBOT".into()),
        bot_scopes: Some("commands,chat:write".into()),
        user_id: "U1".into(),
        user_token: None,
        user_refresh_token: None,
        user_token_expires_at: None,
        user_scopes: None,
        incoming_webhook_url: None,
        incoming_webhook_channel: None,
        incoming_webhook_channel_id: None,
        incoming_webhook_configuration_url: None,
        is_enterprise_install: false,
        token_type: Some("bot".into()),
        installed_at: Utc::now(),
    }
}

pub async fn read_bytes(res: Response<Body>) -> Vec<u8> {
    res.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn read_json(res: Response<Body>) -> Value {
    serde_json::from_slice(&read_bytes(res).await).unwrap()
}

pub async fn read_text(res: Response<Body>) -> String {
    String::from_utf8(read_bytes(res).await).unwrap()
}
