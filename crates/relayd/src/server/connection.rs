//! Connection handler for individual client connections.
//!
//! Each TCP client gets its own `ConnectionHandler` that:
//! - Registers the client in the session-set and pushes one immediate
//!   full snapshot (new viewers never wait for the next change)
//! - Parses newline-delimited JSON events and routes them to the
//!   registry or the shutdown coordinator
//! - Ignores malformed input outright: clients never receive error frames
//!
//! Closing a connection never flips a device offline - liveness is
//! derived purely from the timeout sweep.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info};

use relay_protocol::{parse_client_line, ClientMessage, ServerMessage};

use crate::registry::RegistryHandle;
use crate::shutdown::ShutdownCoordinator;

/// Type alias for a shared outbound writer handle
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// One entry in the session-set
pub struct Subscriber {
    /// Writer for snapshot/event pushes
    pub writer: SubscriberWriter,
}

/// Type alias for the session-set, keyed by connection number
pub type SubscribersMap = Arc<RwLock<HashMap<u64, Subscriber>>>;

/// Maximum inbound line size (64 KB)
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Per-recipient write timeout; bounds how long one slow client can hold
/// its writer during a fan-out
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection:
/// - Session-set registration and the initial snapshot push
/// - Inbound event loop
/// - Drain-triggered close
pub struct ConnectionHandler {
    /// Buffered reader for incoming events
    reader: BufReader<OwnedReadHalf>,

    /// Buffered writer, shared with the broadcaster via the session-set
    writer: SubscriberWriter,

    /// Handle to the device registry
    registry: RegistryHandle,

    /// Shutdown coordinator (terminate_process, drain observation)
    shutdown: Arc<ShutdownCoordinator>,

    /// Shared session-set
    subscribers: SubscribersMap,

    /// Unique number for this connection
    connection_id: u64,
}

impl ConnectionHandler {
    /// Creates a new connection handler for an accepted stream.
    pub fn new(
        stream: TcpStream,
        registry: RegistryHandle,
        shutdown: Arc<ShutdownCoordinator>,
        subscribers: SubscribersMap,
        connection_id: u64,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            registry,
            shutdown,
            subscribers,
            connection_id,
        }
    }

    /// Runs the connection handler.
    ///
    /// Registers the client, pushes the initial snapshot, then processes
    /// events until the peer disconnects or the drain begins. Returns the
    /// connection id so the server can evict the session-set entry.
    pub async fn run(mut self) -> u64 {
        debug!(connection = self.connection_id, "New client connected");

        if let Err(e) = self.register_and_push_snapshot().await {
            debug!(
                connection = self.connection_id,
                error = %e,
                "Failed to push initial snapshot"
            );
            return self.connection_id;
        }

        if let Err(e) = self.process_events().await {
            debug!(
                connection = self.connection_id,
                error = %e,
                "Connection closed"
            );
        }

        info!(connection = self.connection_id, "Client disconnected");
        self.connection_id
    }

    /// Joins the session-set and pushes the current table to this client.
    ///
    /// The writer is held across registration and the push: a change
    /// broadcast that captures this client right after registration
    /// queues behind the lock, so the connect-time snapshot is always
    /// delivered first and newer snapshots after it.
    async fn register_and_push_snapshot(&self) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;

        {
            let mut subs = self.subscribers.write().await;
            subs.insert(
                self.connection_id,
                Subscriber {
                    writer: Arc::clone(&self.writer),
                },
            );
        }

        let records = self.registry.snapshot().await;
        let json = serde_json::to_string(&ServerMessage::snapshot(records))
            .map_err(|e| ConnectionError::Io(e.to_string()))?;
        write_json_line(&mut writer, &json).await
    }

    /// Main event processing loop.
    ///
    /// Reads and processes events until the connection closes, an
    /// unrecoverable error occurs, or the drain begins.
    async fn process_events(&mut self) -> Result<(), ConnectionError> {
        let drain = self.shutdown.drain_token();

        loop {
            tokio::select! {
                biased;

                _ = drain.cancelled() => {
                    debug!(connection = self.connection_id, "Closing for drain");
                    return Ok(());
                }

                result = read_line(&mut self.reader) => {
                    match result {
                        Ok(line) => {
                            match parse_client_line(&line) {
                                Some(msg) => self.dispatch(msg).await,
                                // Malformed input: no response, no crash
                                None => debug!(
                                    connection = self.connection_id,
                                    "Ignoring unparseable line"
                                ),
                            }
                        }
                        Err(ConnectionError::Eof) => {
                            debug!(connection = self.connection_id, "Client sent EOF");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Routes a single inbound event.
    ///
    /// `terminate_process` is honored regardless of drain state - it is
    /// the shutdown trigger itself (a structural no-op when repeated).
    /// Every other event is ignored once draining has begun. Out-of-range
    /// ids are rejected inside the actor; the rejection is logged here and
    /// nothing is sent back.
    async fn dispatch(&self, msg: ClientMessage) {
        if let ClientMessage::TerminateProcess { device_id } = msg {
            info!(
                connection = self.connection_id,
                device_id, "Process shutdown requested"
            );
            self.shutdown.begin_drain();
            return;
        }

        if self.shutdown.is_draining() {
            debug!(connection = self.connection_id, "Event ignored during drain");
            return;
        }

        match msg {
            ClientMessage::Login { device } => {
                if let Err(e) = self.registry.login(device).await {
                    debug!(connection = self.connection_id, error = %e, "Login rejected");
                }
            }
            ClientMessage::Logout { device_id } => {
                if let Err(e) = self.registry.logout(device_id).await {
                    debug!(connection = self.connection_id, error = %e, "Logout rejected");
                }
            }
            ClientMessage::Volume {
                device_id,
                vol,
                avg,
            } => {
                if let Err(e) = self.registry.reading(device_id, vol, avg).await {
                    debug!(connection = self.connection_id, error = %e, "Reading rejected");
                }
            }
            ClientMessage::StartMonitor { device_id } => {
                // Admin gate lives in the actor
                let _ = self.registry.start_signal(device_id).await;
            }
            ClientMessage::Terminate => {
                // Idempotent: only the first call flushes
                let _ = self.registry.finish_statistics().await;
            }
            ClientMessage::TerminateProcess { .. } => {
                // Handled above
            }
        }
    }
}

/// Reads a single line from the client, capped at the message size limit.
///
/// The cap is enforced while reading: a newline-free stream stops
/// buffering at the limit instead of growing without bound until a
/// newline arrives.
async fn read_line<R>(reader: &mut R) -> Result<String, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    let bytes_read = (&mut *reader)
        .take(MAX_MESSAGE_SIZE as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Err(ConnectionError::Eof);
    }

    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ConnectionError::MessageTooLarge {
            size: buf.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    String::from_utf8(buf).map_err(|_| ConnectionError::Io("invalid utf-8".to_string()))
}

/// Sends one JSON line to a client, bounded by the write timeout.
///
/// Used by the broadcaster's per-recipient fan-out tasks.
pub async fn send_line(writer: &SubscriberWriter, json: &str) -> Result<(), ConnectionError> {
    let mut writer = writer.lock().await;
    write_json_line(&mut writer, json).await
}

/// Writes one JSON line on an already-locked writer.
async fn write_json_line(
    writer: &mut BufWriter<OwnedWriteHalf>,
    json: &str,
) -> Result<(), ConnectionError> {
    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_returns_one_line() {
        let mut reader = BufReader::new(&b"{\"type\":\"terminate\"}\nnext"[..]);
        let line = read_line(&mut reader).await.expect("line");
        assert_eq!(line, "{\"type\":\"terminate\"}\n");
    }

    #[tokio::test]
    async fn test_read_line_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(
            read_line(&mut reader).await,
            Err(ConnectionError::Eof)
        ));
    }

    #[tokio::test]
    async fn test_read_line_caps_newline_free_input() {
        let stream = vec![b'a'; MAX_MESSAGE_SIZE * 4];
        let mut reader = BufReader::new(&stream[..]);

        match read_line(&mut reader).await {
            Err(ConnectionError::MessageTooLarge { size, max }) => {
                assert_eq!(max, MAX_MESSAGE_SIZE);
                // The read stopped at the cap, not at the end of the stream
                assert_eq!(size, MAX_MESSAGE_SIZE + 1);
            }
            other => panic!("expected size cap, got {other:?}"),
        }
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Io("broken pipe".to_string());
        assert!(err.to_string().contains("broken pipe"));

        let err = ConnectionError::MessageTooLarge {
            size: 100_000,
            max: MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("100000"));
        assert!(err.to_string().contains(&MAX_MESSAGE_SIZE.to_string()));
    }
}
