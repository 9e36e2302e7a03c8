//! Device registry using the actor pattern.
//!
//! The registry is the central state manager for the six provisioned
//! devices. It receives commands via a tokio mpsc channel and maintains
//! the canonical source of truth for device telemetry.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │    Sessions     │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RegistryEvent       │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    login/logout/volume     DeviceTable              All connected
//!    events                  (single writer)          clients
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEVICE_TIMEOUT};
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the `RegistryActor` on a tokio task
/// 3. Returns a `RegistryHandle` for client use
///
/// The periodic liveness sweep is spawned separately (see
/// [`crate::sweep::spawn_sweep_task`]) so it can be tied to the shutdown
/// token.
pub fn spawn_registry() -> RegistryHandle {
    spawn_registry_with_timeout(DEVICE_TIMEOUT)
}

/// Spawn the registry actor with a custom offline timeout.
///
/// Used by tests to avoid waiting out the production 10 s window.
pub fn spawn_registry_with_timeout(offline_timeout: Duration) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::with_offline_timeout(cmd_rx, event_tx.clone(), offline_timeout);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
