//! TCP server for the relay daemon.
//!
//! The server:
//! - Listens on a fixed TCP port for persistent client connections
//! - Spawns a ConnectionHandler for each client on the drain tracker
//! - Fans registry events out to every connected client
//! - Drains all captured connections under a deadline on shutdown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         ▲
//!         │ fan-out (per-recipient tasks)
//! ┌───────┴─────────┐
//! │   broadcaster   │◀── RegistryEvent
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{
    send_line, ConnectionError, ConnectionHandler, Subscriber, SubscriberWriter, SubscribersMap,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use relay_protocol::ServerMessage;

use crate::registry::{RegistryEvent, RegistryHandle};
use crate::shutdown::{ShutdownCoordinator, CLOSE_TIMEOUT};

/// Default listen port
pub const DEFAULT_PORT: u16 = 7070;

/// TCP server for the relay daemon.
///
/// Manages client connections, event fan-out, and the shutdown drain.
pub struct RelayServer {
    /// Handle to the device registry
    registry: RegistryHandle,

    /// Shutdown coordinator shared with every component
    shutdown: Arc<ShutdownCoordinator>,

    /// Connection counter for generating session ids
    connection_counter: AtomicU64,

    /// Session-set of open connections
    subscribers: SubscribersMap,

    /// Drain barrier over connection tasks
    tracker: TaskTracker,
}

impl RelayServer {
    /// Creates a new relay server.
    ///
    /// # Arguments
    ///
    /// * `registry` - Handle to the device registry
    /// * `shutdown` - Shared shutdown coordinator
    pub fn new(registry: RegistryHandle, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self {
            registry,
            shutdown,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    /// Binds the listening socket.
    ///
    /// Split from [`run`](Self::run) so callers (and tests) can learn the
    /// bound address before the accept loop starts.
    pub async fn listen(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            error: e.to_string(),
        })
    }

    /// Runs the server on an already-bound listener.
    ///
    /// Accepts connections until the drain begins, then closes the
    /// listener and waits for every captured connection under the close
    /// deadline. Does not return until the drain completes (gracefully or
    /// by deadline).
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Relay server listening");
        }

        // Bridge registry events to the session-set
        self.spawn_event_broadcaster();

        let drain = self.shutdown.drain_token();

        // Accept connections until draining begins
        loop {
            tokio::select! {
                _ = drain.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num =
                                self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        // Stop the transport: no session opened after this point exists
        drop(listener);

        self.drain().await;
        Ok(())
    }

    /// Handles a new client connection by spawning a tracked handler task.
    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        let registry = self.registry.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let subscribers = Arc::clone(&self.subscribers);

        self.tracker.spawn(async move {
            let handler = ConnectionHandler::new(
                stream,
                registry,
                shutdown,
                Arc::clone(&subscribers),
                connection_number,
            );

            let id = handler.run().await;

            // Leave the session-set once the connection is gone
            let mut subs = subscribers.write().await;
            if subs.remove(&id).is_some() {
                debug!(connection = id, "Removed disconnected client");
            }
        });
    }

    /// Spawns the event broadcaster task.
    ///
    /// Receives registry events and fans them out to all connected
    /// clients, one event at a time so clients observe events in issue
    /// order.
    fn spawn_event_broadcaster(&self) {
        let mut event_rx = self.registry.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let drain = self.shutdown.drain_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain.cancelled() => {
                        debug!("Event broadcaster shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                let msg = message_for(event);
                                broadcast_message(&subscribers, &msg).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event broadcaster lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Waits for every captured connection to close, bounded by the
    /// close deadline.
    ///
    /// Connections already closed count immediately; the deadline
    /// converts a stalled graceful path into a forced one.
    async fn drain(&self) {
        self.tracker.close();

        match timeout(CLOSE_TIMEOUT, self.tracker.wait()).await {
            Ok(()) => {
                self.shutdown.mark_stopped();
            }
            Err(_) => {
                warn!(
                    timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
                    "Drain deadline expired with sessions still open"
                );
                self.shutdown.force();
            }
        }

        // Session-set entries are useless past this point
        let mut subs = self.subscribers.write().await;
        subs.clear();
        info!("Server drain complete");
    }
}

/// Maps a registry event to its wire message.
fn message_for(event: RegistryEvent) -> ServerMessage {
    match event {
        RegistryEvent::Snapshot(records) => ServerMessage::snapshot(records),
        RegistryEvent::StartMonitor => ServerMessage::start_monitor(),
        RegistryEvent::EndStatistics(data) => ServerMessage::end_statistics(data),
    }
}

/// Broadcasts one message to all connected clients.
///
/// Serializes once, then fans out with one spawned task per recipient,
/// joined without short-circuiting: a failed or slow recipient is logged
/// and evicted but never blocks delivery to its siblings, and no failure
/// propagates to the caller.
async fn broadcast_message(subscribers: &SubscribersMap, msg: &ServerMessage) {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            error!(error = %e, "Failed to serialize broadcast");
            return;
        }
    };

    // Capture the current recipients, then release the lock before
    // any I/O happens
    let recipients: Vec<(u64, SubscriberWriter)> = {
        let subs = subscribers.read().await;
        subs.iter()
            .map(|(id, sub)| (*id, Arc::clone(&sub.writer)))
            .collect()
    };

    if recipients.is_empty() {
        return;
    }

    let mut sends = JoinSet::new();
    for (id, writer) in recipients {
        let json = json.clone();
        sends.spawn(async move { (id, send_line(&writer, &json).await) });
    }

    let mut failed_clients = Vec::new();
    while let Some(joined) = sends.join_next().await {
        match joined {
            Ok((id, Err(e))) => {
                debug!(connection = id, error = %e, "Failed to send broadcast");
                failed_clients.push(id);
            }
            Ok((_, Ok(()))) => {}
            Err(e) => {
                debug!(error = %e, "Broadcast send task failed");
            }
        }
    }

    if !failed_clients.is_empty() {
        let mut subs = subscribers.write().await;
        for id in failed_clients {
            if subs.remove(&id).is_some() {
                debug!(connection = id, "Removed failed client");
            }
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:7070".to_string(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:7070"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_message_for_event_shapes() {
        let msg = message_for(RegistryEvent::StartMonitor);
        assert_eq!(msg, ServerMessage::start_monitor());

        let msg = message_for(RegistryEvent::Snapshot(Vec::new()));
        assert_eq!(msg, ServerMessage::snapshot(Vec::new()));

        let msg = message_for(RegistryEvent::EndStatistics(Vec::new()));
        assert_eq!(msg, ServerMessage::end_statistics(Vec::new()));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_session_set_is_noop() {
        let subscribers: SubscribersMap = Arc::new(RwLock::new(HashMap::new()));
        broadcast_message(&subscribers, &ServerMessage::start_monitor()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_deadline_forces_termination() {
        use crate::registry::spawn_registry;
        use crate::shutdown::DrainState;
        use std::time::Duration;

        let shutdown = Arc::new(ShutdownCoordinator::new());
        let server = RelayServer::new(spawn_registry(), Arc::clone(&shutdown));

        shutdown.begin_drain();

        // A session that never finishes closing
        server.tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        server.drain().await;

        // The deadline converts the stalled graceful path into a forced
        // one; the graceful Stopped state is never reached
        assert!(shutdown.is_forced());
        assert_eq!(shutdown.state(), DrainState::Draining);
    }
}
