//! UDP/TCP socket adapters (§2 module 4): one UDP socket per session for
//! the Takion media path, one TCP socket for the PS4 control channel.
//!
//! Grounded on `sonos/discovery/ssdp.rs`'s `socket2`-based bind helper,
//! generalized from a broadcast-capable discovery socket to a connected
//! per-session Takion socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::protocol_constants::DEFAULT_MTU;

/// Bounded-buffer UDP adapter for the Takion media path. One instance per
/// session; owned exclusively by the `RPStream` orchestrator's receive
/// task (§3 Ownership). The underlying socket is reference-counted so that
/// [`TakionSocket::sender`] can hand out cheap, independently-sendable
/// handles to the heartbeat/feedback/keyframe-request tasks (§5 "Shared
/// resources": multiple producers serialize only through the cipher, not
/// through the socket itself — UDP sends need no exclusive access).
pub struct TakionSocket {
    socket: Arc<UdpSocket>,
    recv_buf: Vec<u8>,
}

/// A cloneable send-only handle to a [`TakionSocket`]'s underlying socket.
#[derive(Clone)]
pub struct TakionSender {
    socket: Arc<UdpSocket>,
}

impl TakionSender {
    pub async fn send(&self, datagram: &[u8]) -> std::io::Result<()> {
        self.socket.send(datagram).await?;
        Ok(())
    }
}

impl TakionSocket {
    /// Binds an ephemeral local port and connects to the console's Takion
    /// port, so that subsequent `send`/`recv` calls don't need to repeat
    /// the peer address.
    pub async fn connect(peer: SocketAddr) -> std::io::Result<Self> {
        let domain = if peer.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        let bind_addr: SocketAddr = if peer.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        socket.bind(&bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        socket.connect(peer).await?;
        Ok(Self {
            socket: Arc::new(socket),
            recv_buf: vec![0u8; usize::from(DEFAULT_MTU) * 2],
        })
    }

    /// Hands out an independent send handle sharing this socket (§5: the
    /// heartbeat, feedback, and keyframe-request paths each hold one).
    #[must_use]
    pub fn sender(&self) -> TakionSender {
        TakionSender {
            socket: Arc::clone(&self.socket),
        }
    }

    pub async fn send(&self, datagram: &[u8]) -> std::io::Result<()> {
        self.socket.send(datagram).await?;
        Ok(())
    }

    /// Receives one datagram, blocking until one arrives or `deadline`
    /// elapses. Returns `Ok(None)` on timeout so the receive task's
    /// cooperative-cancellation poll loop (§5) can check its cancellation
    /// token between receives.
    pub async fn recv(&mut self, deadline: Duration) -> std::io::Result<Option<Vec<u8>>> {
        match timeout(deadline, self.socket.recv(&mut self.recv_buf)).await {
            Ok(Ok(n)) => Ok(Some(self.recv_buf[..n].to_vec())),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Length-naive TCP adapter for the control channel (registration and PS4
/// session bring-up, §4.3 steps 1-4). The console's control responses are
/// HTTP-ish and self-delimited by their own `Content-Length` header, so
/// this adapter exposes raw read/write rather than a length-prefix framer.
pub struct ControlSocket {
    stream: TcpStream,
}

impl ControlSocket {
    pub async fn connect(host_ip: IpAddr, port: u16, connect_timeout: Duration) -> std::io::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host_ip, port)))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "control connect timed out"))??;
        Ok(Self { stream })
    }

    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await
    }

    /// Reads until the peer closes the connection or `read_timeout`
    /// elapses, whichever comes first (the console closes the TCP
    /// connection after each control response).
    pub async fn read_to_end(&mut self, read_timeout: Duration) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        timeout(read_timeout, self.stream.read_to_end(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "control read timed out"))??;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn takion_socket_recv_times_out_without_erroring() {
        let mut a = TakionSocket::connect("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let result = a.recv(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn takion_socket_round_trips_a_datagram() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener_addr = listener.local_addr().unwrap();

        let client = TakionSocket::connect(listener_addr).await.unwrap();
        client.send(b"hello").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        listener.send_to(b"world", from).await.unwrap();

        let mut client = client;
        let reply = client.recv(Duration::from_millis(500)).await.unwrap();
        assert_eq!(reply, Some(b"world".to_vec()));
    }
}
