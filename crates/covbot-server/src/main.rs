mod cleanup;
mod config;

use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use covbot_api::AppStateInner;
use covbot_db::{CredentialStore, Database, OAuthStateStore};
use covbot_integrations::{CodecovClient, OAuthSettings, SlackClient};
use covbot_notify::{DeliveryEngine, EngineOptions, NotificationService};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "covbot=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e:#}");
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let report = db.migrate_legacy_notifications()?;
    if report.orphaned > 0 || report.malformed > 0 {
        warn!(
            orphaned = report.orphaned,
            malformed = report.malformed,
            "Some legacy notifications could not be migrated and were left in place"
        );
    }

    // External clients
    let slack = SlackClient::new(&config.slack_api_base, config.http_timeout_ms)?;
    let codecov = CodecovClient::new(&config.codecov_api_base, config.http_timeout_ms)?;

    // Shared state
    let credentials = CredentialStore::new(db.clone(), config.slack_client_id.clone());
    let oauth_states = OAuthStateStore::new(
        db.clone(),
        chrono::Duration::seconds(config.oauth_state_ttl_secs),
    );
    let engine = DeliveryEngine::new(
        db.clone(),
        credentials.clone(),
        Arc::new(slack.clone()),
        EngineOptions {
            concurrency: config.notify_concurrency,
            verify_channels: config.notify_verify_channels,
        },
    );
    let notifications = NotificationService::new(db.clone(), Arc::new(codecov));

    tokio::spawn(cleanup::run_cleanup_loop(
        oauth_states.clone(),
        config.state_cleanup_interval_secs,
    ));

    let state = Arc::new(AppStateInner {
        db,
        credentials,
        oauth_states,
        engine,
        notifications,
        slack,
        oauth: OAuthSettings {
            client_id: config.slack_client_id.clone(),
            client_secret: config.slack_client_secret.clone(),
            scopes: config.slack_scopes.clone(),
            user_scopes: config.slack_user_scopes.clone(),
            redirect_uri: config.slack_redirect_uri.clone(),
            authorize_url: config.slack_authorize_url.clone(),
        },
        internal_token: config.internal_token.clone(),
        signing_secret: config.slack_signing_secret.clone(),
    });

    let app = covbot_api::router(state).layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Covbot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
