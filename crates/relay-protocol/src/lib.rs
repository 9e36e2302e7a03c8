//! Relay Protocol - Wire protocol for the volt-relay daemon
//!
//! This crate provides the message types and tolerant parsing for
//! communication between sensor devices / viewer clients and the daemon.
//!
//! Inbound and outbound payloads are UTF-8 JSON objects with a `type`
//! discriminant, except the full-table snapshot push which is a bare
//! array of device records.

pub mod message;
pub mod parse;

pub use message::{ClientMessage, ServerEvent, ServerMessage};
pub use parse::parse_client_line;
