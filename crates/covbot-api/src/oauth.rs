use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{error, info, warn};

use covbot_types::api::OAuthRedirectQuery;

use crate::error::ApiError;
use crate::state::AppState;

pub const INSTALL_PATH: &str = "/slack/install";

/// "Add to Slack": issue a CSRF state and send the user to Slack.
pub async fn install(State(state): State<AppState>) -> Result<Response, ApiError> {
    let csrf = state.oauth_states.issue()?;
    let url = state
        .oauth
        .authorize_redirect(&csrf)
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    Ok((StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response())
}

pub async fn oauth_redirect(
    State(state): State<AppState>,
    Query(query): Query<OAuthRedirectQuery>,
) -> Result<Response, ApiError> {
    if let Some(reason) = query.error.as_deref() {
        info!(reason, "slack authorization was not granted");
        return Ok(Redirect::to(INSTALL_PATH).into_response());
    }

    let csrf = query.state.as_deref().unwrap_or_default();
    if csrf.is_empty() || !state.oauth_states.consume(csrf)? {
        return Err(ApiError::BadRequest(
            "The installation link has expired, please reinstall the app.".into(),
        ));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing authorization code".into()))?;

    let installation = state
        .slack
        .exchange_code(&state.oauth, &code)
        .await
        .map_err(|e| {
            error!("slack code exchange failed: {:#}", e);
            ApiError::Upstream("Slack rejected the installation, please reinstall the app.".into())
        })?;

    if let Err(e) = state.credentials.save_installation(&installation) {
        warn!(scope = %installation.scope(), "installation not saved: {}", e);
        return Err(e.into());
    }

    let team = installation
        .team_name
        .clone()
        .or_else(|| installation.enterprise_name.clone())
        .unwrap_or_else(|| "your workspace".to_string());
    Ok((
        StatusCode::OK,
        format!("Codecov has been installed to {team}. You can close this window."),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::{StatusCode, header};
    use httpmock::prelude::*;
    use serde_json::json;

    use covbot_types::models::TenantScope;

    use crate::test_support::{TestApp, read_json, read_text};

    fn mock_slack(server: &MockServer, bot_token: &str) {
        server.mock(|when, then| {
            when.method(POST).path("/oauth.v2.access");
            then.status(200).json_body(json!({
                "ok": true,
                "app_id": "A1",
                "access_token": bot_token,
                "token_type": "bot",
                "scope": "commands,chat:write",
                "bot_user_id": "UBOT",
                "team": {"id": "T1", "name": "Acme"},
                "is_enterprise_install": false,
                "authed_user": {"id": "U1"}
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/auth.test");
            then.status(200).json_body(json!({"ok": true, "bot_id": "B1"}));
        });
    }

    #[tokio::test]
    async fn install_redirects_with_fresh_state() {
        let app = TestApp::new();
        let res = app.get("/slack/install").await;
        assert_eq!(res.status(), StatusCode::FOUND);

        let location = res.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("https://slack.com/oauth/v2/authorize?"));
        let state = location
            .split('&')
            .find_map(|kv| kv.strip_prefix("state="))
            .unwrap();
        assert!(app.state.db.oauth_state_exists(state).unwrap());
    }

    #[tokio::test]
    async fn callback_saves_installation_once() {
        let server = MockServer::start();
        mock_slack(&server, "xoxb-new");
        let app = TestApp::with_slack(&server.base_url());

        let state = app.state.oauth_states.issue().unwrap();
        let res = app
            .get(&format!("/slack/oauth_redirect?code=abc&state={state}"))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(read_text(res).await.contains("Acme"));

        let bot = app
            .state
            .credentials
            .find_bot(&TenantScope::team("T1"))
            .unwrap()
            .unwrap();
        assert_eq!(bot.bot_token, "xoxb-new");
        assert_eq!(bot.bot_id.as_deref(), Some("B1"));

        // The state is single use.
        let res = app
            .get(&format!("/slack/oauth_redirect?code=abc&state={state}"))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(res).await["detail"].as_str().unwrap().contains("reinstall"));
    }

    #[tokio::test]
    async fn unknown_state_is_rejected_before_calling_slack() {
        let server = MockServer::start();
        let exchange = server.mock(|when, then| {
            when.method(POST).path("/oauth.v2.access");
            then.status(500);
        });
        let app = TestApp::with_slack(&server.base_url());

        let res = app.get("/slack/oauth_redirect?code=abc&state=forged").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        exchange.assert_calls(0);
    }

    #[tokio::test]
    async fn denied_authorization_goes_back_to_install() {
        let app = TestApp::new();
        let res = app.get("/slack/oauth_redirect?error=access_denied").await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[header::LOCATION], "/slack/install");
    }

    #[tokio::test]
    async fn rejected_code_is_a_bad_gateway() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth.v2.access");
            then.status(200).json_body(json!({"ok": false, "error": "invalid_code"}));
        });
        let app = TestApp::with_slack(&server.base_url());

        let state = app.state.oauth_states.issue().unwrap();
        let res = app
            .get(&format!("/slack/oauth_redirect?code=bad&state={state}"))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn bot_token_held_by_another_tenant_conflicts() {
        let server = MockServer::start();
        mock_slack(&server, "xoxb-T9");
        let app = TestApp::with_slack(&server.base_url());
        app.install_bot("T9");

        let state = app.state.oauth_states.issue().unwrap();
        let res = app
            .get(&format!("/slack/oauth_redirect?code=abc&state={state}"))
            .await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }
}
