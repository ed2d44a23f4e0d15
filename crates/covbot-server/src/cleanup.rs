use std::time::Duration;

use tracing::{info, warn};

use covbot_db::OAuthStateStore;

/// Background task that purges OAuth states past their expiry.
pub async fn run_cleanup_loop(states: OAuthStateStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match states.purge_expired() {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: purged {} expired oauth states", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {}", e);
            }
        }
    }
}
