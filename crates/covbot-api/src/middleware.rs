use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Only the reporting service, holding the internal token, may call
/// the internal routes.
pub async fn require_internal_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Authentication credentials were not provided.".into()))?;

    if !constant_time_eq(token.trim().as_bytes(), state.internal_token.as_bytes()) {
        return Err(ApiError::Unauthorized("Invalid token.".into()));
    }

    Ok(next.run(req).await)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{TestApp, read_json};

    #[tokio::test]
    async fn internal_routes_require_bearer() {
        let app = TestApp::new();

        let res = app.post_json("/notify", None, json!({})).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = read_json(res).await;
        assert_eq!(body["detail"], "Authentication credentials were not provided.");

        let res = app.post_json("/notify", Some("wrong"), json!({})).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_json(res).await["detail"], "Invalid token.");
    }

    #[tokio::test]
    async fn public_routes_are_open() {
        let app = TestApp::new();
        let res = app.get("/health").await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
