use axum::{Json, extract::State};

use covbot_notify::EnableRequest;
use covbot_types::api::{MessageResponse, SubscribeRequest, UnsubscribeRequest};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let outcome = state
        .notifications
        .configure_notification(EnableRequest {
            scope: &req.scope,
            service: &req.service,
            owner: &req.owner,
            repo: &req.repository,
            channel: &req.channel,
            filters: &req.filters,
            confirm_private: req.confirm_private,
            access_token: req.access_token.as_deref(),
        })
        .await?;

    Ok(Json(MessageResponse {
        message: outcome.message(),
    }))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let outcome = state.notifications.disable_notification(
        &req.scope,
        &req.owner,
        &req.repository,
        &req.channel,
    )?;

    Ok(Json(MessageResponse {
        message: outcome.message(),
    }))
}
