use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::repo::RefreshTokenStore;

/// Periodically deletes expired and revoked refresh tokens. Lookups already
/// ignore such rows, so this only keeps the table small.
pub fn spawn_refresh_token_sweep(
    store: Arc<dyn RefreshTokenStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => debug!("refresh token sweep: nothing to purge"),
                Ok(n) => info!(purged = n, "refresh token sweep"),
                Err(e) => warn!(error = %e, "refresh token sweep failed"),
            }
        }
    })
}
