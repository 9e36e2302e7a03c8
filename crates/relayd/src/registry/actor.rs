//! Registry actor - owns the device table and processes commands.
//!
//! The `RegistryActor` is the single owner of device state in the system.
//! It receives commands via an mpsc channel and publishes events via
//! broadcast. Because all mutations happen inside one task, no locking is
//! needed and no broadcast can observe a half-applied update.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use relay_core::{stats, DeviceId, DeviceTable};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// Liveness window: a device silent this long is demoted on the next sweep.
pub const DEVICE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// The registry actor - owns all device state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to the broadcaster.
///
/// # Ownership
///
/// The actor owns the `DeviceTable` and the one-shot `terminated` guard
/// for the final-statistics flush. The offline timeout is injectable so
/// tests do not have to wait out the 10 s production window.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// The six-device table, fixed cardinality for the process lifetime
    table: DeviceTable,

    /// Sweep demotion window
    offline_timeout: chrono::Duration,

    /// One-shot guard: final statistics already flushed
    terminated: bool,

    /// Event publisher for fan-out to connected clients
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor with the production offline timeout.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self::with_offline_timeout(receiver, event_publisher, DEVICE_TIMEOUT)
    }

    /// Creates a registry actor with a custom offline timeout.
    pub fn with_offline_timeout(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        offline_timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            table: DeviceTable::new(Utc::now()),
            offline_timeout: chrono::Duration::milliseconds(offline_timeout.as_millis() as i64),
            terminated: false,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Login {
                device_id,
                respond_to,
            } => {
                let result = self.handle_login(device_id);
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Logout {
                device_id,
                respond_to,
            } => {
                let result = self.handle_logout(device_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Reading {
                device_id,
                level,
                average,
                respond_to,
            } => {
                let result = self.handle_reading(device_id, level, average);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.table.snapshot());
            }
            RegistryCommand::Sweep => {
                self.handle_sweep();
            }
            RegistryCommand::StartSignal {
                device_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_start_signal(device_id));
            }
            RegistryCommand::FinishStatistics { respond_to } => {
                let _ = respond_to.send(self.handle_finish_statistics());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles a device login: implicit reset, mark online, broadcast.
    fn handle_login(&mut self, device_id: u32) -> Result<(), RegistryError> {
        let id = self.validate(device_id)?;

        self.table.apply_login(id, Utc::now());
        info!(device = %id, "Device logged in");

        self.publish_snapshot();
        Ok(())
    }

    /// Handles a device logout: offline immediately, broadcast.
    fn handle_logout(&mut self, device_id: u32) -> Result<(), RegistryError> {
        let id = self.validate(device_id)?;

        self.table.apply_logout(id);
        info!(device = %id, "Device logged out");

        self.publish_snapshot();
        Ok(())
    }

    /// Handles a reading: level, verbatim average, watermarks, broadcast.
    fn handle_reading(
        &mut self,
        device_id: u32,
        level: f64,
        average: f64,
    ) -> Result<(), RegistryError> {
        let id = self.validate(device_id)?;

        self.table.apply_reading(id, level, average, Utc::now());
        debug!(device = %id, level, average, "Reading applied");

        self.publish_snapshot();
        Ok(())
    }

    /// Handles a liveness sweep tick.
    ///
    /// Demotes silent devices; if any flipped, publishes ONE snapshot
    /// covering all six devices (full-snapshot protocol, not deltas).
    fn handle_sweep(&mut self) {
        if self.table.sweep(Utc::now(), self.offline_timeout) {
            debug!("Sweep demoted at least one device");
            self.publish_snapshot();
        }
    }

    /// Handles a start-signal request.
    ///
    /// Only the admin device may trigger the synchronized start, and only
    /// while the monitoring session is still live. Everything else is
    /// silently ignored.
    fn handle_start_signal(&mut self, device_id: u32) -> bool {
        if self.terminated {
            debug!(device_id, "Start signal ignored: monitoring terminated");
            return false;
        }

        match DeviceId::new(device_id) {
            Ok(id) if id.is_admin() => {
                info!("Broadcasting synchronized start signal");
                let _ = self.event_publisher.send(RegistryEvent::StartMonitor);
                true
            }
            _ => {
                debug!(device_id, "Start signal ignored: not the admin device");
                false
            }
        }
    }

    /// Handles the one-shot final-statistics flush.
    ///
    /// First invocation computes rounded (max, avg, min) for all six
    /// devices from current table values and publishes a single
    /// `end_statistics` event. Repeats are no-ops.
    fn handle_finish_statistics(&mut self) -> bool {
        if self.terminated {
            debug!("Final statistics already flushed");
            return false;
        }
        self.terminated = true;

        let records = stats::final_statistics(&self.table);
        info!("Flushing final statistics");
        let _ = self
            .event_publisher
            .send(RegistryEvent::EndStatistics(records));
        true
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Validates a raw wire id, logging rejections at debug.
    fn validate(&self, device_id: u32) -> Result<DeviceId, RegistryError> {
        DeviceId::new(device_id).map_err(|e| {
            debug!(device_id, "Rejected event for out-of-range device id");
            RegistryError::Domain(e)
        })
    }

    /// Publishes a full-table snapshot event (ignored if no subscribers).
    fn publish_snapshot(&self) {
        let _ = self
            .event_publisher
            .send(RegistryEvent::Snapshot(self.table.snapshot()));
    }
}
