//! Protocol message types for daemon communication.

use relay_core::{DeviceRecord, DeviceStats};
use serde::{Deserialize, Serialize};

/// Messages sent by devices and viewer clients to the daemon.
///
/// Device ids arrive as raw integers and are validated by the registry,
/// not here: an out-of-range id is a well-formed message that the daemon
/// rejects without mutation or broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Device login: marks the device online
    Login {
        /// Raw device id (1..=6 expected)
        device: u32,
    },

    /// Device logout: marks the device offline
    Logout {
        /// Raw device id
        #[serde(rename = "deviceId")]
        device_id: u32,
    },

    /// Periodic level reading with producer-supplied running average
    Volume {
        /// Raw device id
        #[serde(rename = "deviceId")]
        device_id: u32,
        /// Reported level
        vol: f64,
        /// Producer-supplied running average, stored verbatim
        avg: f64,
    },

    /// Admin-triggered synchronized start signal
    StartMonitor {
        /// Raw device id; only the admin device (1) is honored
        #[serde(rename = "deviceId")]
        device_id: u32,
    },

    /// End the monitoring session and flush final statistics
    Terminate,

    /// Begin orderly shutdown of the whole process
    TerminateProcess {
        /// Raw device id of the requester (informational)
        #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
        device_id: Option<u32>,
    },
}

impl ClientMessage {
    /// Creates a login message.
    pub fn login(device: u32) -> Self {
        Self::Login { device }
    }

    /// Creates a logout message.
    pub fn logout(device_id: u32) -> Self {
        Self::Logout { device_id }
    }

    /// Creates a reading message.
    pub fn volume(device_id: u32, vol: f64, avg: f64) -> Self {
        Self::Volume {
            device_id,
            vol,
            avg,
        }
    }

    /// Creates a start-monitor request.
    pub fn start_monitor(device_id: u32) -> Self {
        Self::StartMonitor { device_id }
    }

    /// Creates a terminate message.
    pub fn terminate() -> Self {
        Self::Terminate
    }

    /// Creates a terminate-process message.
    pub fn terminate_process(device_id: Option<u32>) -> Self {
        Self::TerminateProcess { device_id }
    }
}

/// Application-level signals pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Synchronized start signal, relayed from the admin device
    StartMonitor,

    /// Final statistics for all six devices
    EndStatistics {
        /// One rounded record per device, in id order
        data: Vec<DeviceStats>,
    },
}

/// Messages sent from the daemon to clients.
///
/// The snapshot push is a bare array (no `type` discriminant); the
/// application-level signals are tagged objects. Untagged serde handles
/// both shapes on a single stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Full device table push: six records in id order
    Snapshot(Vec<DeviceRecord>),

    /// Application-level signal
    Event(ServerEvent),
}

impl ServerMessage {
    /// Creates a snapshot push.
    pub fn snapshot(records: Vec<DeviceRecord>) -> Self {
        Self::Snapshot(records)
    }

    /// Creates a start-monitor signal.
    pub fn start_monitor() -> Self {
        Self::Event(ServerEvent::StartMonitor)
    }

    /// Creates an end-statistics signal.
    pub fn end_statistics(data: Vec<DeviceStats>) -> Self {
        Self::Event(ServerEvent::EndStatistics { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_core::DeviceTable;

    #[test]
    fn test_client_message_wire_names() {
        let json = serde_json::to_string(&ClientMessage::volume(2, 55.0, 55.0)).unwrap();
        assert!(json.contains("\"type\":\"volume\""));
        assert!(json.contains("\"deviceId\":2"));
        assert!(json.contains("\"vol\":55.0"));

        let json = serde_json::to_string(&ClientMessage::login(3)).unwrap();
        assert!(json.contains("\"type\":\"login\""));
        assert!(json.contains("\"device\":3"));
    }

    #[test]
    fn test_terminate_is_bare_type_object() {
        let json = serde_json::to_string(&ClientMessage::terminate()).unwrap();
        assert_eq!(json, "{\"type\":\"terminate\"}");
    }

    #[test]
    fn test_terminate_process_device_id_optional() {
        let msg: ClientMessage =
            serde_json::from_str("{\"type\":\"terminate_process\"}").unwrap();
        assert_eq!(msg, ClientMessage::terminate_process(None));

        let msg: ClientMessage =
            serde_json::from_str("{\"type\":\"terminate_process\",\"deviceId\":4}").unwrap();
        assert_eq!(msg, ClientMessage::terminate_process(Some(4)));
    }

    #[test]
    fn test_snapshot_serializes_as_bare_array() {
        let table = DeviceTable::new(Utc::now());
        let json = serde_json::to_value(ServerMessage::snapshot(table.snapshot())).unwrap();
        assert!(json.is_array());
        assert_eq!(json.as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(ServerMessage::start_monitor()).unwrap();
        assert_eq!(json["type"], "start_monitor");

        let json = serde_json::to_value(ServerMessage::end_statistics(Vec::new())).unwrap();
        assert_eq!(json["type"], "end_statistics");
        assert!(json["data"].is_array());
    }

    #[test]
    fn test_server_message_roundtrip() {
        let table = DeviceTable::new(Utc::now());
        let original = ServerMessage::snapshot(table.snapshot());
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(original, parsed);

        let parsed: ServerMessage =
            serde_json::from_str("{\"type\":\"start_monitor\"}").unwrap();
        assert_eq!(parsed, ServerMessage::start_monitor());
    }
}
