use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

/// Values shipped in `.env.example` that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "changeme", "your-secret-here", "xxx"];

const DEFAULT_AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,

    pub slack_client_id: String,
    pub slack_client_secret: String,
    pub slack_signing_secret: String,
    pub slack_scopes: Vec<String>,
    pub slack_user_scopes: Vec<String>,
    pub slack_redirect_uri: Option<String>,
    pub slack_api_base: String,
    pub slack_authorize_url: String,

    pub internal_token: String,
    pub codecov_api_base: String,

    pub oauth_state_ttl_secs: i64,
    pub notify_concurrency: usize,
    pub notify_verify_channels: bool,
    pub http_timeout_ms: u64,
    pub state_cleanup_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            host: or("COVBOT_HOST", "0.0.0.0"),
            port: parsed(&get, "COVBOT_PORT", 3000)?,
            db_path: or("COVBOT_DB_PATH", "covbot.db").into(),

            slack_client_id: required(&get, "SLACK_CLIENT_ID")?,
            slack_client_secret: required(&get, "SLACK_CLIENT_SECRET")?,
            slack_signing_secret: required(&get, "SLACK_SIGNING_SECRET")?,
            slack_scopes: scope_list(&or("SLACK_SCOPES", "commands")),
            slack_user_scopes: scope_list(&or("SLACK_USER_SCOPES", "search:read")),
            slack_redirect_uri: get("SLACK_REDIRECT_URI"),
            slack_api_base: or("SLACK_API_BASE", "https://slack.com/api"),
            slack_authorize_url: or("SLACK_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),

            internal_token: required(&get, "CODECOV_INTERNAL_TOKEN")?,
            codecov_api_base: or("CODECOV_API_BASE", "https://api.codecov.io"),

            oauth_state_ttl_secs: parsed(&get, "OAUTH_STATE_TTL_SECS", 120)?,
            notify_concurrency: parsed::<usize>(&get, "NOTIFY_CONCURRENCY", 8)?.max(1),
            notify_verify_channels: parsed(&get, "NOTIFY_VERIFY_CHANNELS", true)?,
            http_timeout_ms: parsed(&get, "HTTP_TIMEOUT_MS", 10_000)?,
            state_cleanup_interval_secs: parsed::<u64>(&get, "STATE_CLEANUP_INTERVAL_SECS", 600)?
                .max(1),
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match get(key) {
        Some(value) if !PLACEHOLDER_SECRETS.contains(&value.to_ascii_lowercase().as_str()) => {
            Ok(value)
        }
        Some(_) => bail!("{key} is still a placeholder value"),
        None => bail!("{key} is not set"),
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

fn scope_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const SECRETS: &[(&str, &str)] = &[
        ("SLACK_CLIENT_ID", "111.222"),
        ("SLACK_CLIENT_SECRET", "s3cret"),
        ("SLACK_SIGNING_SECRET", "signing"),
        ("CODECOV_INTERNAL_TOKEN", "internal"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(SECRETS)).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("covbot.db"));
        assert_eq!(config.slack_scopes, vec!["commands"]);
        assert_eq!(config.slack_user_scopes, vec!["search:read"]);
        assert_eq!(config.slack_redirect_uri, None);
        assert_eq!(config.oauth_state_ttl_secs, 120);
        assert_eq!(config.notify_concurrency, 8);
        assert!(config.notify_verify_channels);
        assert_eq!(config.state_cleanup_interval_secs, 600);
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = SECRETS.to_vec();
        pairs.extend([
            ("COVBOT_PORT", "8080"),
            ("SLACK_SCOPES", "commands, chat:write ,channels:read"),
            ("NOTIFY_VERIFY_CHANNELS", "false"),
            ("NOTIFY_CONCURRENCY", "0"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.slack_scopes, vec!["commands", "chat:write", "channels:read"]);
        assert!(!config.notify_verify_channels);
        assert_eq!(config.notify_concurrency, 1);
    }

    #[test]
    fn missing_or_placeholder_secrets_abort() {
        let err = Config::from_lookup(lookup(&SECRETS[1..])).unwrap_err();
        assert!(err.to_string().contains("SLACK_CLIENT_ID"));

        let mut pairs = SECRETS[..3].to_vec();
        pairs.push(("CODECOV_INTERNAL_TOKEN", "change-me"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let mut pairs = SECRETS.to_vec();
        pairs.push(("COVBOT_PORT", "eighty"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
