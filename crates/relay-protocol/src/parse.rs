//! Tolerant parsing of inbound client lines.
//!
//! The daemon never surfaces parse failures to the sender: a malformed
//! line, an unknown `type`, or a payload with the wrong shape is simply
//! dropped. Parsing therefore returns `Option` rather than `Result`.

use crate::message::ClientMessage;

/// Parses one newline-delimited JSON line into a client message.
///
/// Returns `None` for empty lines, invalid JSON, unknown message kinds,
/// and payloads whose fields are missing or of the wrong type. Callers
/// ignore `None` without responding.
pub fn parse_client_line(line: &str) -> Option<ClientMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let msg = parse_client_line("{\"type\":\"login\",\"device\":3}");
        assert_eq!(msg, Some(ClientMessage::login(3)));
    }

    #[test]
    fn test_parse_logout() {
        let msg = parse_client_line("{\"type\":\"logout\",\"deviceId\":2}");
        assert_eq!(msg, Some(ClientMessage::logout(2)));
    }

    #[test]
    fn test_parse_volume() {
        let msg = parse_client_line("{\"type\":\"volume\",\"deviceId\":2,\"vol\":55,\"avg\":55}");
        assert_eq!(msg, Some(ClientMessage::volume(2, 55.0, 55.0)));
    }

    #[test]
    fn test_parse_start_monitor() {
        let msg = parse_client_line("{\"type\":\"start_monitor\",\"deviceId\":1}");
        assert_eq!(msg, Some(ClientMessage::start_monitor(1)));
    }

    #[test]
    fn test_parse_terminate_variants() {
        assert_eq!(
            parse_client_line("{\"type\":\"terminate\"}"),
            Some(ClientMessage::terminate())
        );
        assert_eq!(
            parse_client_line("{\"type\":\"terminate_process\",\"deviceId\":5}"),
            Some(ClientMessage::terminate_process(Some(5)))
        );
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let msg = parse_client_line("  {\"type\":\"terminate\"}\n");
        assert_eq!(msg, Some(ClientMessage::terminate()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_client_line(""), None);
        assert_eq!(parse_client_line("   "), None);
        assert_eq!(parse_client_line("not json"), None);
        assert_eq!(parse_client_line("{\"type\":\"unknown_kind\"}"), None);
        // Missing required field
        assert_eq!(parse_client_line("{\"type\":\"login\"}"), None);
        // Wrong field type
        assert_eq!(
            parse_client_line("{\"type\":\"volume\",\"deviceId\":\"two\",\"vol\":1,\"avg\":1}"),
            None
        );
        // Negative id cannot be a device id
        assert_eq!(parse_client_line("{\"type\":\"login\",\"device\":-1}"), None);
    }
}
