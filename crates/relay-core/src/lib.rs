//! Relay Core - Shared domain types for the volt-relay daemon
//!
//! This crate provides the device table and statistics types shared
//! between the daemon components and the wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, or `todo!()` outside of tests. Table
//! indexing is in range by `DeviceId` construction.

pub mod device;
pub mod error;
pub mod stats;

// Re-exports for convenience
pub use device::{Device, DeviceId, DeviceRecord, DeviceTable, DEVICE_COUNT};
pub use error::{DomainError, DomainResult};
pub use stats::DeviceStats;
