use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, info, warn};

use covbot_integrations::signature;
use covbot_types::api::{SlackEnvelope, SlackEvent};
use covbot_types::models::TenantScope;

use crate::error::ApiError;
use crate::state::AppState;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Slack Events API endpoint. Only the URL handshake and workspace
/// uninstalls are acted on; everything else is acknowledged.
pub async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    signature::verify(
        &state.signing_secret,
        header_str(&headers, TIMESTAMP_HEADER),
        header_str(&headers, SIGNATURE_HEADER),
        &body,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!("rejected slack event: {}", e);
        ApiError::Unauthorized("Invalid request signature.".into())
    })?;

    let envelope: SlackEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid event payload: {e}")))?;

    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            Ok(Json(json!({ "challenge": challenge })).into_response())
        }
        SlackEnvelope::EventCallback {
            team_id,
            enterprise_id,
            is_enterprise_install,
            event: SlackEvent::AppUninstalled,
        } => {
            let scope = TenantScope {
                enterprise_id,
                team_id,
                is_enterprise_install,
            };
            let removal = state.credentials.delete_tenant(&scope)?;
            info!(%scope, subscriptions = removal.subscriptions, "app uninstalled");
            Ok(StatusCode::OK.into_response())
        }
        _ => {
            debug!("ignored slack event");
            Ok(StatusCode::OK.into_response())
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
