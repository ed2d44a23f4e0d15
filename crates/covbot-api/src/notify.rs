use axum::{Json, extract::State};
use tracing::info;

use covbot_types::api::{NotifyRequest, NotifyResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Comparison webhook from the reporting service.
pub async fn notify(
    State(state): State<AppState>,
    Json(req): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let (Some(owner), Some(repo), Some(comparison)) = (
        non_empty(req.owner),
        non_empty(req.repository),
        req.comparison.filter(|c| !c.is_null()),
    ) else {
        return Err(ApiError::BadRequest(
            "owner, repository and comparison are required".into(),
        ));
    };

    let report = state
        .engine
        .deliver_comparison(&owner, &repo, &comparison)
        .await?;

    let detail = if report.subscribers == 0 {
        info!(%owner, %repo, "no notifications configured");
        "No notifications found".to_string()
    } else {
        format!(
            "Delivered to {} of {} channels",
            report.posted + report.updated,
            report.subscribers
        )
    };

    Ok(Json(NotifyResponse {
        detail,
        subscribers: report.subscribers,
        posted: report.posted,
        updated: report.updated,
        failed: report.failed,
        skipped: report.skipped,
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use covbot_types::models::TenantScope;

    use crate::test_support::{INTERNAL_TOKEN, TestApp, read_json};

    fn comparison(pull: u64) -> serde_json::Value {
        json!({
            "url": format!("https://app.codecov.io/gh/acme/widgets/pull/{pull}"),
            "head_commit": { "commitid": "1234567890abcdef", "ci_passed": true },
            "head_totals_c": 85.5,
            "base_totals_c": 84.0
        })
    }

    #[tokio::test]
    async fn missing_fields_are_a_bad_request() {
        let app = TestApp::new();
        let res = app
            .post_json("/notify", Some(INTERNAL_TOKEN), json!({ "owner": "acme", "repository": "widgets" }))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(read_json(res).await["detail"].as_str().unwrap().contains("required"));
    }

    #[tokio::test]
    async fn no_subscribers_is_benign() {
        let app = TestApp::new();
        let res = app
            .post_json(
                "/notify",
                Some(INTERNAL_TOKEN),
                json!({ "owner": "acme", "repository": "widgets", "comparison": comparison(1) }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = read_json(res).await;
        assert_eq!(body["detail"], "No notifications found");
        assert_eq!(body["subscribers"], 0);
    }

    #[tokio::test]
    async fn posts_then_updates() {
        let app = TestApp::new();
        app.install_bot("T1");
        app.state
            .db
            .subscribe(&TenantScope::team("T1"), "acme", "widgets", "C1", &[])
            .unwrap();
        let body = json!({ "owner": "acme", "repository": "widgets", "comparison": comparison(42) });

        let res = app.post_json("/notify", Some(INTERNAL_TOKEN), body.clone()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let first = read_json(res).await;
        assert_eq!(first["posted"], 1);
        assert_eq!(first["detail"], "Delivered to 1 of 1 channels");

        let res = app.post_json("/notify", Some(INTERNAL_TOKEN), body).await;
        let second = read_json(res).await;
        assert_eq!(second["updated"], 1);
        assert_eq!(second["posted"], 0);

        assert_eq!(app.chat.posts(), 1);
        assert_eq!(app.chat.updates(), 1);
    }

    #[tokio::test]
    async fn malformed_comparison_is_a_bad_request() {
        let app = TestApp::new();
        let res = app
            .post_json(
                "/notify",
                Some(INTERNAL_TOKEN),
                json!({ "owner": "acme", "repository": "widgets", "comparison": { "head_totals_c": "n/a" } }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
