//! Enabling and disabling repository notifications for a channel.

use std::sync::Arc;

use tracing::info;

use covbot_db::{Database, SubscribeOutcome};
use covbot_integrations::ReportingApi;
use covbot_types::models::{NotificationFilter, Service, TenantScope};

use crate::error::NotifyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled { repo: String },
    AlreadyEnabled { repo: String },
    /// Private repository and the caller has not confirmed yet.
    ConfirmationRequired { repo: String },
}

impl EnableOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Enabled { repo } => format!("Notifications enabled for {repo} in this channel 📳"),
            Self::AlreadyEnabled { repo } => {
                format!("Notification already enabled for {repo} in this channel 👀")
            }
            Self::ConfirmationRequired { repo } => format!(
                "{repo} is a private repository. Confirm to turn notifications on for it in this channel."
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled { repo: String },
    NotEnabled { repo: String },
}

impl DisableOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Disabled { repo } => format!("Notifications disabled for {repo} in this channel 📴"),
            Self::NotEnabled { repo } => {
                format!("Notification is not enabled for {repo} in this channel 👀")
            }
        }
    }
}

/// What the command layer needs to opt a channel in.
#[derive(Debug, Clone)]
pub struct EnableRequest<'a> {
    pub scope: &'a TenantScope,
    pub service: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
    pub channel: &'a str,
    pub filters: &'a [NotificationFilter],
    pub confirm_private: bool,
    /// The requesting user's reporting-service token, if they have one.
    pub access_token: Option<&'a str>,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
    reporting: Arc<dyn ReportingApi>,
}

impl NotificationService {
    pub fn new(db: Arc<Database>, reporting: Arc<dyn ReportingApi>) -> Self {
        Self { db, reporting }
    }

    pub async fn configure_notification(
        &self,
        request: EnableRequest<'_>,
    ) -> Result<EnableOutcome, NotifyError> {
        let repo_name = request.repo.to_string();

        if self
            .db
            .find_subscription(request.scope, request.owner, request.repo, request.channel)?
            .is_some()
        {
            return Ok(EnableOutcome::AlreadyEnabled { repo: repo_name });
        }

        let service: Service = request.service.parse().map_err(NotifyError::InvalidService)?;
        let repository = self
            .reporting
            .repository(service, request.owner, request.repo, request.access_token)
            .await
            .map_err(NotifyError::Reporting)?
            .ok_or_else(|| NotifyError::RepositoryNotFound {
                owner: request.owner.to_string(),
                repo: request.repo.to_string(),
            })?;

        if repository.private && !request.confirm_private {
            return Ok(EnableOutcome::ConfirmationRequired { repo: repo_name });
        }

        let outcome = self.db.subscribe(
            request.scope,
            request.owner,
            request.repo,
            request.channel,
            request.filters,
        )?;

        Ok(match outcome {
            SubscribeOutcome::Created(subscription) => {
                info!(
                    id = subscription.id,
                    service = service.as_str(),
                    private = repository.private,
                    "notifications enabled"
                );
                EnableOutcome::Enabled { repo: repo_name }
            }
            SubscribeOutcome::AlreadySubscribed(_) => EnableOutcome::AlreadyEnabled { repo: repo_name },
        })
    }

    pub fn disable_notification(
        &self,
        scope: &TenantScope,
        owner: &str,
        repo: &str,
        channel: &str,
    ) -> Result<DisableOutcome, NotifyError> {
        let repo_name = repo.to_string();
        if self.db.unsubscribe(scope, owner, repo, channel)? {
            Ok(DisableOutcome::Disabled { repo: repo_name })
        } else {
            Ok(DisableOutcome::NotEnabled { repo: repo_name })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use async_trait::async_trait;

    use covbot_integrations::RepositoryInfo;

    #[derive(Default)]
    struct FakeReporting {
        repos: HashMap<(Service, String, String), bool>,
        calls: AtomicUsize,
    }

    impl FakeReporting {
        fn with(mut self, service: Service, owner: &str, repo: &str, private: bool) -> Self {
            self.repos
                .insert((service, owner.to_string(), repo.to_string()), private);
            self
        }
    }

    #[async_trait]
    impl ReportingApi for FakeReporting {
        async fn repository(
            &self,
            service: Service,
            owner: &str,
            repo: &str,
            _token: Option<&str>,
        ) -> Result<Option<RepositoryInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .repos
                .get(&(service, owner.to_string(), repo.to_string()))
                .map(|private| RepositoryInfo {
                    name: repo.to_string(),
                    private: *private,
                    active: Some(true),
                }))
        }
    }

    fn service(reporting: FakeReporting) -> (NotificationService, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (NotificationService::new(db.clone(), Arc::new(reporting)), db)
    }

    fn request<'a>(scope: &'a TenantScope, repo: &'a str) -> EnableRequest<'a> {
        EnableRequest {
            scope,
            service: "gh",
            owner: "acme",
            repo,
            channel: "C1",
            filters: &[],
            confirm_private: false,
            access_token: None,
        }
    }

    #[tokio::test]
    async fn enable_then_enable_again() {
        let (svc, db) = service(FakeReporting::default().with(Service::Github, "acme", "widgets", false));
        let scope = TenantScope::team("T1");

        let first = svc.configure_notification(request(&scope, "widgets")).await.unwrap();
        assert_eq!(first, EnableOutcome::Enabled { repo: "widgets".into() });
        assert_eq!(first.message(), "Notifications enabled for widgets in this channel 📳");

        let second = svc.configure_notification(request(&scope, "widgets")).await.unwrap();
        assert_eq!(second, EnableOutcome::AlreadyEnabled { repo: "widgets".into() });
        assert_eq!(db.list_subscribers("acme", "widgets").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn private_repositories_need_confirmation() {
        let (svc, db) = service(FakeReporting::default().with(Service::Github, "acme", "secret", true));
        let scope = TenantScope::team("T1");

        let outcome = svc.configure_notification(request(&scope, "secret")).await.unwrap();
        assert_eq!(outcome, EnableOutcome::ConfirmationRequired { repo: "secret".into() });
        assert!(db.list_subscribers("acme", "secret").unwrap().is_empty());

        let confirmed = EnableRequest {
            confirm_private: true,
            ..request(&scope, "secret")
        };
        let outcome = svc.configure_notification(confirmed).await.unwrap();
        assert_eq!(outcome, EnableOutcome::Enabled { repo: "secret".into() });
    }

    #[tokio::test]
    async fn unknown_repository_and_service_are_errors() {
        let (svc, _db) = service(FakeReporting::default());
        let scope = TenantScope::team("T1");

        let err = svc.configure_notification(request(&scope, "ghost")).await.unwrap_err();
        assert!(matches!(err, NotifyError::RepositoryNotFound { .. }));

        let bad_service = EnableRequest {
            service: "svn",
            ..request(&scope, "ghost")
        };
        let err = svc.configure_notification(bad_service).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid service. valid services are: github, bitbucket, gitlab"
        );
    }

    #[tokio::test]
    async fn disable_reports_whether_it_was_enabled() {
        let (svc, _db) = service(FakeReporting::default().with(Service::Github, "acme", "widgets", false));
        let scope = TenantScope::team("T1");
        svc.configure_notification(request(&scope, "widgets")).await.unwrap();

        let outcome = svc.disable_notification(&scope, "acme", "widgets", "C1").unwrap();
        assert_eq!(outcome.message(), "Notifications disabled for widgets in this channel 📴");

        let outcome = svc.disable_notification(&scope, "acme", "widgets", "C1").unwrap();
        assert_eq!(outcome, DisableOutcome::NotEnabled { repo: "widgets".into() });
    }
}
