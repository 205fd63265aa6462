//! Heartbeat service
//!
//! One interval loop for the whole hub: each tick culls silent subscribers,
//! pings the live ones with pending-ack metadata, and redelivers due
//! unacked events. Long-running task, spawned by the server state.

use tokio_util::sync::CancellationToken;

use crate::hub::EventHub;

pub struct HeartbeatService;

impl HeartbeatService {
    /// Spawn the heartbeat loop; it stops when the token cancels
    pub fn spawn(hub: EventHub, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = hub.config().heartbeat_interval;
        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Heartbeat service started");
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh hub
            // doesn't count a missed heartbeat against brand-new clients.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Heartbeat service shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        hub.heartbeat_tick();
                    }
                }
            }
        })
    }
}
