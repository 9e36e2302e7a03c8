//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for the broadcaster
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use relay_core::{DeviceRecord, DeviceStats, DomainError};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Mutating commands carry a oneshot reply channel so callers can observe
/// rejection (out-of-range ids) without the actor ever blocking. `Sweep`
/// is fire-and-forget: the periodic task does not care about the outcome.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Mark a device logged in (implicit reset, then online).
    ///
    /// # Errors
    /// - `RegistryError::Domain` if the id is outside 1..=6
    Login {
        /// Raw device id from the wire
        device_id: u32,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Mark a device logged out. Watermarks are untouched.
    ///
    /// # Errors
    /// - `RegistryError::Domain` if the id is outside 1..=6
    Logout {
        /// Raw device id from the wire
        device_id: u32,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Apply a level reading with its producer-supplied running average.
    ///
    /// # Errors
    /// - `RegistryError::Domain` if the id is outside 1..=6
    Reading {
        /// Raw device id from the wire
        device_id: u32,
        /// Reported level
        level: f64,
        /// Producer-supplied running average, stored verbatim
        average: f64,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Get an immutable copy of all six device records.
    Snapshot {
        /// Channel to send the records
        respond_to: oneshot::Sender<Vec<DeviceRecord>>,
    },

    /// Demote devices that have been silent past the offline timeout.
    ///
    /// Fire-and-forget, sent by the periodic sweep task. Publishes one
    /// full-snapshot event if any device flipped.
    Sweep,

    /// Request the synchronized start signal.
    ///
    /// Honored only for the admin device while statistics have not been
    /// flushed; replies whether the signal was published.
    StartSignal {
        /// Raw device id of the requester
        device_id: u32,
        /// Channel to send whether the signal was published
        respond_to: oneshot::Sender<bool>,
    },

    /// Flush final statistics to all listeners. One-shot.
    ///
    /// Replies whether this invocation performed the flush (repeat
    /// invocations are no-ops and reply `false`).
    FinishStatistics {
        /// Channel to send whether this call flushed
        respond_to: oneshot::Sender<bool>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Domain rule violated (out-of-range device id).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The command or response channel was closed before completion.
    ///
    /// This typically indicates the actor was shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry for fan-out to connected clients.
///
/// Events are published in the order the actor processed the triggering
/// commands; the broadcaster preserves that order per recipient.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// The device table changed: full six-record snapshot.
    ///
    /// Always the whole table, never a delta.
    Snapshot(Vec<DeviceRecord>),

    /// Synchronized start signal from the admin device.
    StartMonitor,

    /// Final statistics, flushed exactly once per process.
    EndStatistics(Vec<DeviceStats>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::Domain(DomainError::DeviceOutOfRange { id: 9, max: 6 });
        assert_eq!(err.to_string(), "device id out of range: 9 (expected 1..=6)");

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "registry channel closed");
    }

    #[test]
    fn test_registry_event_is_clone() {
        let event = RegistryEvent::Snapshot(Vec::new());
        let _cloned = event.clone();

        let event = RegistryEvent::StartMonitor;
        let _cloned = event.clone();
    }

    #[tokio::test]
    async fn test_command_oneshot_pattern() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();

        tokio::spawn(async move {
            tx.send(Ok(())).ok();
        });

        let result = rx.await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<(), RegistryError>>();
        drop(tx);

        let result = rx.await;
        assert!(result.is_err());
    }
}
