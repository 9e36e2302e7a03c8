//! Operator console on stdin.
//!
//! A thin line-oriented REPL with no state of its own beyond calling
//! into the core:
//! - blank line: dump the current device table
//! - `set <id> <vol>`: manual override (marks online, broadcasts)
//! - `exit` / `quit`: begin shutdown
//!
//! The manual override acts as a producer: it computes the average it
//! supplies with the `(avg + vol) / 2` recurrence over the last stored
//! average, then submits an ordinary reading.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use relay_core::DeviceRecord;

use crate::registry::RegistryHandle;
use crate::shutdown::ShutdownCoordinator;

/// A parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Blank line: print the device table
    Status,

    /// Manual level override for one device
    Set { device_id: u32, level: f64 },

    /// Begin shutdown
    Exit,

    /// Anything else: print usage
    Unknown,
}

/// Parses one console input line.
pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Status;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return ConsoleCommand::Exit;
    }

    let mut parts = line.split_whitespace();
    if parts.next() == Some("set") {
        let id = parts.next().and_then(|s| s.parse::<u32>().ok());
        let level = parts.next().and_then(|s| s.parse::<f64>().ok());
        if let (Some(device_id), Some(level), None) = (id, level, parts.next()) {
            return ConsoleCommand::Set { device_id, level };
        }
    }

    ConsoleCommand::Unknown
}

/// Renders the device table for the status dump.
pub fn render_table(records: &[DeviceRecord]) -> String {
    let mut out = String::from(
        "device      vol      avg      max      min  online       lastUpdate\n",
    );
    for r in records {
        out.push_str(&format!(
            "{:>6} {:>8.1} {:>8.1} {:>8.1} {:>8.1} {:>7} {:>16}\n",
            r.device_id, r.vol, r.avg, r.max, r.min, r.con, r.last_update,
        ));
    }
    out
}

/// Spawns the operator console task.
///
/// Reads stdin until EOF, `exit`/`quit`, or the drain begins.
pub fn spawn_console_task(
    registry: RegistryHandle,
    shutdown: Arc<ShutdownCoordinator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let drain = shutdown.drain_token();

        loop {
            tokio::select! {
                biased;

                _ = drain.cancelled() => {
                    debug!("Console closing for drain");
                    break;
                }

                result = lines.next_line() => {
                    match result {
                        Ok(Some(line)) => {
                            handle_line(&registry, &shutdown, &line).await;
                        }
                        Ok(None) => {
                            debug!("Console stdin closed");
                            break;
                        }
                        Err(e) => {
                            debug!(error = %e, "Console read failed");
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Executes one console command.
async fn handle_line(registry: &RegistryHandle, shutdown: &ShutdownCoordinator, line: &str) {
    match parse_command(line) {
        ConsoleCommand::Status => {
            let records = registry.snapshot().await;
            println!("{}", render_table(&records));
        }
        ConsoleCommand::Set { device_id, level } => {
            // The console is the producer here: roll the last stored
            // average forward before submitting a normal reading
            let previous = registry
                .snapshot()
                .await
                .into_iter()
                .find(|r| r.device_id.get() as u32 == device_id)
                .map(|r| r.avg);

            match previous {
                Some(avg) => {
                    let average = (avg + level) / 2.0;
                    if registry.reading(device_id, level, average).await.is_ok() {
                        println!("device {device_id} set to {level}");
                    } else {
                        println!("no device {device_id}");
                    }
                }
                None => println!("no device {device_id}"),
            }
        }
        ConsoleCommand::Exit => {
            shutdown.begin_drain();
        }
        ConsoleCommand::Unknown => {
            println!("commands: <blank> status, set <id> <vol>, exit");
        }
    }
}
