//! volt-relay daemon - device registry and broadcast server
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `registry` - Device registry actor owning the six-device table
//! - `sweep` - Periodic liveness sweep demoting silent devices
//! - `server` - TCP server fanning out snapshots and signals to clients
//! - `shutdown` - Drain coordinator for orderly process termination
//! - `console` - Operator console on stdin
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────────────────┐
//! │   RelayServer   │────▶│       RegistryActor         │
//! │  (TCP clients)  │     │   (device table owner)      │
//! └────────┬────────┘     └──────────────┬──────────────┘
//!          │ connections                 │ events
//!          ▼                             ▼
//! ┌─────────────────┐     ┌─────────────────────────────┐
//! │ConnectionHandler│◀────│    broadcast::Sender        │
//! │  (per client)   │     │   (snapshot fan-out)        │
//! └─────────────────┘     └─────────────────────────────┘
//!          ▲                             ▲
//!          │ drain                       │ Sweep tick
//! ┌────────┴────────┐     ┌──────────────┴──────────────┐
//! │ShutdownCoordina-│     │        sweep task           │
//! │tor (one-shot)   │     │      (50 ms interval)       │
//! └─────────────────┘     └─────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, and `todo!()`; fallible operations
//! return `Result` or `Option`, and channel closure is handled
//! gracefully.

pub mod console;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod sweep;
