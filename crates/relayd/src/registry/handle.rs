//! Client interface for interacting with the `RegistryActor`.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and subscribing to registry events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};

use relay_core::DeviceRecord;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Mark a device logged in.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Domain` if the id is outside 1..=6
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn login(&self, device_id: u32) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Login {
                device_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Mark a device logged out.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Domain` if the id is outside 1..=6
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn logout(&self, device_id: u32) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Logout {
                device_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Apply a reading with its producer-supplied running average.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Domain` if the id is outside 1..=6
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn reading(
        &self,
        device_id: u32,
        level: f64,
        average: f64,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Reading {
                device_id,
                level,
                average,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Get an immutable copy of all six device records.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn snapshot(&self) -> Vec<DeviceRecord> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Trigger a liveness sweep.
    ///
    /// Fire-and-forget: the periodic sweep task does not wait for the
    /// outcome, and send errors are ignored (the actor may be gone).
    pub async fn sweep(&self) {
        let _ = self.sender.send(RegistryCommand::Sweep).await;
    }

    /// Request the synchronized start signal.
    ///
    /// Returns whether the signal was actually published (admin device,
    /// monitoring still live). Returns `false` if the actor has shut down.
    pub async fn start_signal(&self, device_id: u32) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::StartSignal {
                device_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Flush final statistics to all listeners. Idempotent.
    ///
    /// Returns whether this call performed the flush. Returns `false` if
    /// the actor has shut down.
    pub async fn finish_statistics(&self) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::FinishStatistics { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Subscribe to registry events.
    ///
    /// Returns a broadcast receiver that will receive all events
    /// (snapshots, start signal, final statistics) published by the actor.
    ///
    /// This is a synchronous operation - it doesn't communicate with the
    /// actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_login_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Login {
                device_id,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(device_id, 3);
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle.login(3).await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_login_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.login(3).await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_reading_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Reading {
                device_id,
                level,
                average,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(device_id, 2);
                assert_eq!(level, 55.0);
                assert_eq!(average, 55.0);
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle.reading(2, 55.0, 55.0).await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.snapshot().await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_fire_and_forget() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            matches!(rx.recv().await, Some(RegistryCommand::Sweep))
        });

        handle.sweep().await;
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.sweep().await;
    }

    #[tokio::test]
    async fn test_start_signal_false_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(!handle.start_signal(1).await);
    }

    #[tokio::test]
    async fn test_finish_statistics_false_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(!handle.finish_statistics().await);
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();
        assert!(handle.is_connected());

        drop(rx);
        // Need to send to detect closure
        handle.sweep().await;
        assert!(!handle.is_connected());
    }
}
