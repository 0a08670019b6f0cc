//! Device Discovery Protocol (DDP, §4.1): broadcast or unicast UDP probes
//! that enumerate consoles on the LAN and parse their HTTP-like replies.
//!
//! Grounded on `sonos/discovery/ssdp.rs`'s interface-enumeration and
//! parallel-probe shape (`get_interfaces`, one socket per interface,
//! concurrent send + receive futures), generalized from SSDP M-SEARCH to
//! the console's DDP probe/reply pair.

mod parse;

pub use parse::parse_ddp_reply;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use local_ip_address::list_afinet_netifas;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::ErrorCode;
use crate::host_type::HostType;
use crate::protocol_constants::{DDP_PROBE_PORT, DDP_PROTOCOL_VERSION};

/// Discovery-layer failures. All are non-fatal per interface; discovery as a
/// whole only fails when every interface is unusable.
#[derive(Debug, thiserror::Error, Serialize)]
#[serde(tag = "kind")]
pub enum DiscoveryError {
    #[error("no usable network interfaces")]
    NoInterfaces,
    #[error("socket error: {0}")]
    Socket(
        #[serde(skip)]
        #[source]
        std::sync::Arc<std::io::Error>,
    ),
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoInterfaces => "no_interfaces",
            Self::Socket(_) => "socket_error",
        }
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        Self::Socket(std::sync::Arc::new(e))
    }
}

/// Alias mirroring the teacher's `DiscoveryResult<T>` shape.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Liveness status surfaced in a DDP reply's status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStatus {
    Ok,
    Standby,
    Offline,
}

/// A console discovered on the LAN (§3 Data Model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Console {
    pub ip: IpAddr,
    pub host_id: String,
    pub host_name: String,
    pub host_type: HostType,
    pub system_version: String,
    pub discover_protocol_version: String,
    pub status: ConsoleStatus,
}

/// Per-interface probe timeout and target port configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub timeout: Duration,
    pub port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            port: DDP_PROBE_PORT,
        }
    }
}

/// One non-loopback IPv4 interface usable for discovery.
struct Interface {
    name: String,
    ip: Ipv4Addr,
    broadcast: Ipv4Addr,
}

fn local_interfaces() -> Vec<Interface> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[Discovery] failed to list network interfaces: {e}");
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| match addr {
            IpAddr::V4(ip) if !ip.is_loopback() => {
                let o = ip.octets();
                Some(Interface {
                    name,
                    ip,
                    broadcast: Ipv4Addr::new(o[0], o[1], o[2], 255),
                })
            }
            _ => None,
        })
        .collect()
}

fn bind_socket(iface_ip: Ipv4Addr, broadcast: bool) -> DiscoveryResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true).ok();
    #[cfg(unix)]
    socket.set_reuse_port(true).ok();
    if broadcast {
        socket.set_broadcast(true).ok();
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(IpAddr::V4(iface_ip), 0).into())?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

fn build_probe() -> Vec<u8> {
    format!(
        "SRCH * HTTP/1.1\r\ndevice-discovery-protocol-version: {DDP_PROTOCOL_VERSION}\r\n\r\n"
    )
    .into_bytes()
}

/// Probes every non-virtual interface in parallel via broadcast and returns
/// every `Console` that replied within `config.timeout`. Socket errors on
/// one interface never fail the whole scan; an empty result is not an error
/// (§8 boundary: "Discovery yields an empty set... if no replies arrive").
pub async fn discover_broadcast(config: &DiscoveryConfig) -> DiscoveryResult<Vec<Console>> {
    let interfaces = local_interfaces();
    if interfaces.is_empty() {
        return Err(DiscoveryError::NoInterfaces);
    }

    let probe = build_probe();
    let found = std::sync::Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();

    for iface in interfaces {
        let socket = match bind_socket(iface.ip, true) {
            Ok(s) => std::sync::Arc::new(s),
            Err(e) => {
                log::warn!("[Discovery] socket setup failed on {}: {e}", iface.name);
                continue;
            }
        };
        let probe = probe.clone();
        let port = config.port;
        let timeout_dur = config.timeout;
        let found = std::sync::Arc::clone(&found);
        let broadcast_addr = SocketAddr::new(IpAddr::V4(iface.broadcast), port);

        tasks.push(tokio::spawn(async move {
            if let Err(e) = socket.send_to(&probe, broadcast_addr).await {
                log::warn!("[Discovery] failed to send probe: {e}");
                return;
            }
            collect_replies(&socket, timeout_dur, &found).await;
        }));
    }

    for t in tasks {
        let _ = t.await;
    }

    Ok(std::sync::Arc::try_unwrap(found)
        .map(Mutex::into_inner)
        .unwrap_or_default())
}

/// Probes a single known IP address and waits for exactly one reply.
pub async fn discover_unicast(ip: IpAddr, config: &DiscoveryConfig) -> DiscoveryResult<Option<Console>> {
    let bind_ip = match ip {
        IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED,
        IpAddr::V6(_) => return Ok(None),
    };
    let socket = bind_socket(bind_ip, false)?;
    socket
        .send_to(&build_probe(), SocketAddr::new(ip, config.port))
        .await?;

    let found = std::sync::Arc::new(Mutex::new(Vec::new()));
    collect_replies(&socket, config.timeout, &found).await;
    let mut guard = found.lock().await;
    Ok(guard.pop())
}

async fn collect_replies(
    socket: &UdpSocket,
    timeout_dur: Duration,
    found: &std::sync::Arc<Mutex<Vec<Console>>>,
) {
    let deadline = tokio::time::Instant::now() + timeout_dur;
    let mut buf = [0u8; 2048];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if let Some(console) = parse_ddp_reply(&buf[..len], from.ip()) {
                    found.lock().await.push(console);
                }
            }
            Ok(Err(e)) => {
                log::warn!("[Discovery] recv error: {e}");
                break;
            }
            Err(_) => break, // per-call timeout elapsed, overall deadline reached
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unicast_to_unreachable_host_yields_none_not_error() {
        // 192.0.2.0/24 is TEST-NET-1, reserved and unroutable: no reply ever arrives.
        let config = DiscoveryConfig {
            timeout: Duration::from_millis(50),
            port: DDP_PROBE_PORT,
        };
        let result = discover_unicast("192.0.2.55".parse().unwrap(), &config).await;
        assert!(matches!(result, Ok(None)));
    }
}
