//! Client for the coverage reporting REST API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use covbot_types::models::Service;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub active: Option<bool>,
}

#[async_trait]
pub trait ReportingApi: Send + Sync {
    /// `None` when the repository does not exist or is not visible with
    /// the given token.
    async fn repository(
        &self,
        service: Service,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<Option<RepositoryInfo>>;
}

#[derive(Clone)]
pub struct CodecovClient {
    http: reqwest::Client,
    api_base: String,
}

impl CodecovClient {
    pub fn new(api_base: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("covbot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create reporting api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReportingApi for CodecovClient {
    async fn repository(
        &self,
        service: Service,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<Option<RepositoryInfo>> {
        let url = format!(
            "{}/api/v2/{}/{}/repos/{}/",
            self.api_base,
            service.as_str(),
            owner,
            repo
        );
        let mut request = self.http.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("reporting api request to {url} failed"))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(service = service.as_str(), owner, repo, "repository not found");
                Ok(None)
            }
            status if status.is_success() => {
                let info = response
                    .json::<RepositoryInfo>()
                    .await
                    .context("failed to decode repository response")?;
                Ok(Some(info))
            }
            status => bail!("reporting api returned status {} for {url}", status.as_u16()),
        }
    }
}
