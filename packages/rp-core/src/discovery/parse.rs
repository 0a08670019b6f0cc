//! ASCII `key: value` parsing for DDP replies (§6.1).
//!
//! Grounded on `sonos/discovery/ssdp.rs`'s ASCII case-insensitive header
//! helpers, generalized from SSDP's `LOCATION`/`USN` lines to DDP's
//! `host-id`/`host-name`/`host-type`/`system-version`/status-line shape.

use std::net::IpAddr;

use super::{Console, ConsoleStatus};
use crate::host_type::HostType;

fn header_value<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}:");
    body.lines()
        .find(|l| l.len() >= prefix.len() && l[..prefix.len()].eq_ignore_ascii_case(&prefix))
        .map(|l| l[prefix.len()..].trim())
}

fn status_from_line(line: &str) -> Option<ConsoleStatus> {
    if line.contains("200") {
        Some(ConsoleStatus::Ok)
    } else if line.contains("620") {
        Some(ConsoleStatus::Standby)
    } else {
        None
    }
}

/// Parses one DDP reply datagram into a [`Console`]. Returns `None` if the
/// reply is not a well-formed DDP response (missing status line or required
/// headers) rather than erroring — a malformed reply from an unrelated UDP
/// sender on the same port is simply ignored.
#[must_use]
pub fn parse_ddp_reply(data: &[u8], from: IpAddr) -> Option<Console> {
    let text = std::str::from_utf8(data).ok()?;
    let status_line = text.lines().next()?;
    let status = status_from_line(status_line)?;

    let host_id = header_value(text, "host-id")?.to_string();
    let host_name = header_value(text, "host-name").unwrap_or("").to_string();
    let host_type = HostType::parse(header_value(text, "host-type")?)?;
    let system_version = header_value(text, "system-version")
        .unwrap_or("")
        .to_string();
    let discover_protocol_version = header_value(text, "device-discovery-protocol-version")
        .unwrap_or("")
        .to_string();

    Some(Console {
        ip: from,
        host_id,
        host_name,
        host_type,
        system_version,
        discover_protocol_version,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "HTTP/1.1 200 OK\r\n\
host-id: abcd-1234-dead-beef\r\n\
host-name: Living Room PS5\r\n\
host-type: PS5\r\n\
system-version: 07000001\r\n\
host-request-port: 9295\r\n";

    #[test]
    fn parses_happy_path_reply() {
        let console = parse_ddp_reply(REPLY.as_bytes(), "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(console.host_id, "abcd-1234-dead-beef");
        assert_eq!(console.host_type, HostType::Ps5);
        assert_eq!(console.status, ConsoleStatus::Ok);
    }

    #[test]
    fn standby_status_is_parsed_not_errored() {
        let reply = REPLY.replace("200 OK", "620 Server Standby");
        let console = parse_ddp_reply(reply.as_bytes(), "10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(console.status, ConsoleStatus::Standby);
    }

    #[test]
    fn garbage_datagram_is_ignored() {
        assert!(parse_ddp_reply(b"not a ddp reply", "10.0.0.5".parse().unwrap()).is_none());
    }
}
