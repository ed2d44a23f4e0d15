pub const LIVENESS_MESSAGE: &str = "Codecov Slack App is live!";

pub async fn health() -> &'static str {
    LIVENESS_MESSAGE
}
