pub mod error;
pub mod events;
pub mod health;
pub mod middleware;
pub mod notify;
pub mod oauth;
pub mod state;
pub mod subscriptions;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Every covbot route. Layers such as tracing are added by the binary.
pub fn router(state: AppState) -> Router {
    let internal_routes = Router::new()
        .route("/notify", post(notify::notify))
        .route(
            "/subscriptions",
            post(subscriptions::subscribe).delete(subscriptions::unsubscribe),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_internal_token,
        ));

    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/slack/install", get(oauth::install))
        .route("/slack/oauth_redirect", get(oauth::oauth_redirect))
        .route("/slack/events", post(events::slack_events));

    Router::new()
        .merge(internal_routes)
        .merge(public_routes)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support;
