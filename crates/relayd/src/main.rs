//! relayd: real-time telemetry relay daemon.
//!
//! Wires the components together and owns process lifecycle: signal
//! handling, the forced-exit path, and the final `exit(0)`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use relayd::console::spawn_console_task;
use relayd::registry::{spawn_registry, spawn_registry_with_timeout};
use relayd::server::{RelayServer, DEFAULT_PORT};
use relayd::shutdown::ShutdownCoordinator;
use relayd::sweep::spawn_sweep_task;

#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Real-time telemetry relay daemon", version)]
struct Args {
    /// Listen port (falls back to RELAY_PORT, then 7070)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Override the device offline timeout in milliseconds
    #[arg(long)]
    offline_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Relay daemon starting"
    );

    let port = args
        .port
        .or_else(|| {
            env::var("RELAY_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", args.bind, port);

    let shutdown = Arc::new(ShutdownCoordinator::new());

    // Signals request the same graceful drain as terminate_process
    {
        let coordinator = Arc::clone(&shutdown);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received");
            coordinator.begin_drain();
        });
    }

    let registry = match args.offline_timeout_ms {
        Some(ms) => spawn_registry_with_timeout(Duration::from_millis(ms)),
        None => spawn_registry(),
    };
    debug!("Device registry started");

    let _sweep = spawn_sweep_task(registry.clone(), shutdown.drain_token());
    let _console = spawn_console_task(registry.clone(), Arc::clone(&shutdown));

    // Bind before spawning so a bad address fails the process loudly
    let listener = RelayServer::listen(&addr).await?;
    let server = RelayServer::new(registry, Arc::clone(&shutdown));
    let server_task = tokio::spawn(server.run(listener));

    let forced = shutdown.force_token();
    tokio::select! {
        _ = forced.cancelled() => {
            info!("Forced termination");
        }

        result = server_task => {
            match result {
                Ok(Ok(())) => info!("Server drained"),
                Ok(Err(e)) => {
                    error!(error = %e, "Server error");
                    shutdown.on_fault();
                }
                Err(e) => {
                    error!(error = %e, "Server task failed");
                    shutdown.on_fault();
                }
            }
        }
    }

    // Shutdown always reports success once it was initiated, whether the
    // drain finished gracefully or was forced past the deadline
    info!("Relay daemon stopped");
    std::process::exit(0);
}

/// Initializes tracing with an env-filter default of info for our crates.
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("relayd=info,relay_core=info,relay_protocol=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves when SIGTERM or SIGINT arrives.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            // Fall back to ctrl-c only
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}
