//! Idle-link keepalive

use obd_transport::AdapterTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Ping the adapter every `interval` until aborted or the link drops
///
/// Goes through the transport's exchange lock, so a ping can never land in
/// the middle of a caller's request and response.
pub(crate) fn spawn_keepalive(
    link: Arc<AdapterTransport>,
    command: String,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !link.is_connected() {
                debug!("Keepalive stopping, {} is down", link.label());
                break;
            }
            match link.transact(&command, timeout).await {
                Ok(response) => trace!("Keepalive {:?}", response),
                Err(e) => {
                    debug!("Keepalive failed: {}", e);
                    break;
                }
            }
        }
    })
}
