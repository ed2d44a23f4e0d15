use std::sync::Arc;

use covbot_db::{CredentialStore, Database, OAuthStateStore};
use covbot_integrations::{OAuthSettings, SlackClient};
use covbot_notify::{DeliveryEngine, NotificationService};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub credentials: CredentialStore,
    pub oauth_states: OAuthStateStore,
    pub engine: DeliveryEngine,
    pub notifications: NotificationService,
    pub slack: SlackClient,
    pub oauth: OAuthSettings,
    /// Bearer token the reporting service presents on internal routes.
    pub internal_token: String,
    pub signing_secret: String,
}
