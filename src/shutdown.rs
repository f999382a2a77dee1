//! Graceful shutdown (spec §4.8): once a shutdown signal arrives, stop
//! accepting new state changes and give connected peers a fixed window to
//! leave on their own before forcing every remaining connection closed.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::registry::Registry;

/// Waits up to `drain` for every peer to disconnect on its own, polling
/// periodically, then force-disconnects whatever is left.
pub async fn drain(registry: Arc<Registry>, drain: Duration) {
    let remaining = registry.peer_count().await;
    if remaining == 0 {
        return;
    }
    info!("shutdown: draining {remaining} connected peer(s) for up to {drain:?}");
    registry.broadcast_disconnect().await;

    let deadline = tokio::time::Instant::now() + drain;
    let poll_interval = Duration::from_millis(200);
    while tokio::time::Instant::now() < deadline {
        if registry.peer_count().await == 0 {
            info!("shutdown: all peers disconnected, drain complete");
            return;
        }
        tokio::time::sleep(poll_interval).await;
    }

    let stragglers = registry.peer_count().await;
    if stragglers > 0 {
        warn!("shutdown: forcing close of {stragglers} peer(s) still connected after drain deadline");
        registry.disconnect_all().await;
    }
}
