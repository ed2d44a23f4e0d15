//! Fan-out of one comparison event to every subscribed channel.
//!
//! Each (subscription, pull request) pair owns at most one live Slack
//! message. The first successful delivery posts it; later events for the
//! same pull request edit it in place, unless the previous attempt failed,
//! in which case a fresh message is posted and its handle replaces the old.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use covbot_db::{CredentialStore, Database, DeliveryAction};
use covbot_integrations::{ChannelInfo, ChatPlatform};
use covbot_types::comparison::Comparison;
use covbot_types::models::{Subscription, TenantScope};

use crate::error::EngineError;
use crate::locks::KeyedLocks;
use crate::render::{RenderedMessage, render_comparison};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Upper bound on chat calls in flight for one event.
    pub concurrency: usize,
    /// List each tenant's channels first and fail deliveries to channels
    /// that no longer exist without calling Slack.
    pub verify_channels: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            verify_channels: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscribers: usize,
    pub posted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.posted + self.updated + self.failed
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Posted => self.posted += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Posted,
    Updated,
    Failed,
}

struct Job {
    subscription: Subscription,
    token: Arc<str>,
    channel_exists: bool,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    db: Arc<Database>,
    credentials: CredentialStore,
    chat: Arc<dyn ChatPlatform>,
    locks: KeyedLocks<(i64, String)>,
    options: EngineOptions,
}

impl DeliveryEngine {
    pub fn new(
        db: Arc<Database>,
        credentials: CredentialStore,
        chat: Arc<dyn ChatPlatform>,
        options: EngineOptions,
    ) -> Self {
        Self {
            db,
            credentials,
            chat,
            locks: KeyedLocks::new(),
            options,
        }
    }

    /// Deliver one comparison to every subscriber of `owner/repo`.
    ///
    /// Per-channel failures are recorded and counted, never returned. Only
    /// a bad request or an unavailable store fails the whole event.
    pub async fn deliver_comparison(
        &self,
        owner: &str,
        repo: &str,
        payload: &Value,
    ) -> Result<DeliveryReport, EngineError> {
        let owner = required(owner, "owner")?;
        let repo = required(repo, "repository")?;
        if payload.is_null() {
            return Err(EngineError::MissingField("comparison"));
        }
        let comparison: Comparison = serde_json::from_value(payload.clone())?;

        let subscribers = self.db.list_subscribers(owner, repo)?;
        let mut report = DeliveryReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };
        if subscribers.is_empty() {
            debug!(owner, repo, "no subscribers");
            return Ok(report);
        }

        let reference = comparison.reference();
        let Some(pull_id) = reference.pull_request_id().map(str::to_owned) else {
            warn!(owner, repo, ?reference, "comparison has no pull request reference, skipping");
            report.skipped = subscribers.len();
            return Ok(report);
        };

        let message = Arc::new(render_comparison(owner, repo, &comparison));
        let jobs = self.plan(subscribers, &mut report).await?;

        let outcomes: Vec<Result<Outcome, EngineError>> = stream::iter(jobs)
            .map(|job| {
                let message = message.clone();
                let pull_id = pull_id.as_str();
                async move { self.deliver_one(job, pull_id, &message).await }
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome?);
        }

        info!(
            owner,
            repo,
            pull_id = %pull_id,
            posted = report.posted,
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            "comparison delivered"
        );
        Ok(report)
    }

    /// Resolve each tenant's bot once and pair every subscription with it.
    async fn plan(
        &self,
        subscribers: Vec<Subscription>,
        report: &mut DeliveryReport,
    ) -> Result<Vec<Job>, EngineError> {
        let mut by_tenant: HashMap<TenantScope, Vec<Subscription>> = HashMap::new();
        for subscription in subscribers {
            by_tenant
                .entry(subscription.scope.clone())
                .or_default()
                .push(subscription);
        }

        let mut jobs = Vec::new();
        for (scope, subscriptions) in by_tenant {
            let Some(bot) = self.credentials.find_bot(&scope)? else {
                warn!(%scope, count = subscriptions.len(), "no bot installation for tenant, skipping");
                report.skipped += subscriptions.len();
                continue;
            };
            let token: Arc<str> = Arc::from(bot.bot_token);

            let channels = if self.options.verify_channels {
                self.known_channels(&scope, &token).await
            } else {
                None
            };

            for subscription in subscriptions {
                let channel_exists = channels
                    .as_ref()
                    .is_none_or(|known| known.iter().any(|c| c.matches(&subscription.channel)));
                jobs.push(Job {
                    subscription,
                    token: token.clone(),
                    channel_exists,
                });
            }
        }
        Ok(jobs)
    }

    /// `None` when the listing itself failed; deliveries then go ahead
    /// unchecked and Slack reports missing channels on its own.
    async fn known_channels(&self, scope: &TenantScope, token: &str) -> Option<Vec<ChannelInfo>> {
        match self.chat.list_channels(token).await {
            Ok(channels) => Some(channels),
            Err(e) => {
                warn!(%scope, "failed to list channels: {e:#}");
                None
            }
        }
    }

    async fn deliver_one(
        &self,
        job: Job,
        pull_id: &str,
        message: &RenderedMessage,
    ) -> Result<Outcome, EngineError> {
        let subscription = &job.subscription;
        let channel = subscription.channel.as_str();
        let _guard = self.locks.lock((subscription.id, pull_id.to_string())).await;

        let claim = self.db.claim_delivery(subscription.id, pull_id, channel)?;

        if !job.channel_exists {
            warn!(
                subscription_id = subscription.id,
                channel, "channel does not exist in workspace"
            );
            self.db.record_delivery_error(claim.status_id)?;
            return Ok(Outcome::Failed);
        }

        let (result, outcome) = match &claim.action {
            DeliveryAction::Post => (
                self.chat
                    .post_message(&job.token, channel, &message.text, &message.blocks)
                    .await,
                Outcome::Posted,
            ),
            DeliveryAction::Update {
                channel: posted_channel,
                message_ts,
            } => (
                self.chat
                    .update_message(
                        &job.token,
                        posted_channel,
                        message_ts,
                        &message.text,
                        &message.blocks,
                    )
                    .await,
                Outcome::Updated,
            ),
        };

        match result {
            Ok(posted) => {
                self.db
                    .record_delivery_success(claim.status_id, &posted.channel, &posted.ts)?;
                debug!(channel, pull_id, ts = %posted.ts, ?outcome, "delivered");
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    subscription_id = subscription.id,
                    channel,
                    pull_id,
                    "delivery failed: {e:#}"
                );
                self.db.record_delivery_error(claim.status_id)?;
                Ok(Outcome::Failed)
            }
        }
    }
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        Err(EngineError::MissingField(field))
    } else {
        Ok(value)
    }
}
