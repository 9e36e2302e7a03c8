//! Periodic liveness sweep for the relay daemon.
//!
//! The sweep task ticks on a fixed 50 ms period and asks the registry to
//! demote devices that have been silent past the offline timeout. The
//! sweep only demotes; devices come back online exclusively via explicit
//! login/reading events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel closure ends the task cleanly

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::RegistryHandle;

/// Fixed sweep period.
pub const DEVICE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Spawns the liveness sweep task.
///
/// Each tick sends one fire-and-forget sweep command; the work per tick
/// is bounded (six devices) and missed ticks are skipped rather than
/// compounded. The task stops when the shutdown token is cancelled or
/// the registry goes away.
///
/// # Arguments
///
/// * `registry` - Handle to the device registry
/// * `cancel_token` - Token for graceful shutdown
///
/// # Returns
///
/// A join handle for the spawned task.
pub fn spawn_sweep_task(
    registry: RegistryHandle,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(DEVICE_CHECK_INTERVAL);
        // Never compound: a late tick must not burst-schedule the backlog
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = DEVICE_CHECK_INTERVAL.as_millis() as u64,
            "Liveness sweep started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Liveness sweep shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if !registry.is_connected() {
                        debug!("Liveness sweep stopping: registry channel closed");
                        break;
                    }
                    registry.sweep().await;
                }
            }
        }

        debug!("Liveness sweep task completed");
    })
}
