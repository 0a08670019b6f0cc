//! Session establishment (§4.3): the handshake that turns [`DeviceCredentials`]
//! plus a reachable console into a streaming-ready [`RemoteSession`].
//!
//! Grounded on `sonos/client.rs`'s connect-then-exchange-control-messages
//! shape, generalized from one SOAP round trip to the console's multi-step
//! control-channel-then-UDP-BIG/BANG bring-up. Branches on [`HostType`] per
//! `DESIGN.md` open question #2: PS4 drives the whole handshake over the TCP
//! control channel before ever touching UDP; PS5 opens the UDP Takion socket
//! first and treats the TCP leg as a short nonce fetch only.

mod big;

pub use big::{BangPayload, BigLaunchSpec};

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

pub use crate::host_type::HostType;

use crate::config::{Resolution, StreamCodec};
use crate::crypto::{derive_iv, sha256, ControlCipher, StreamEcdh};
use crate::error::ErrorCode;
use crate::protocol_constants::{DEFAULT_MTU, TAKION_PORT};
use crate::registration::{vendor_keys::registration_hmac_key, DeviceCredentials};
use crate::transport::{decode, encode, ControlSocket, MessageType, StreamCipher, TakionSocket};

/// Session-establishment failures (§4.3 "Failure taxonomy"). Any variant
/// here aborts the handshake outright; there is no retry loop at this layer
/// (the caller — the `RPStream` orchestrator — decides whether to restart
/// discovery/registration and try again).
#[derive(Debug, thiserror::Error, Serialize)]
#[serde(tag = "kind")]
pub enum SessionError {
    #[error("credentials expired or otherwise invalid")]
    InvalidCredentials,
    #[error("control channel timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("unexpected control response: {0}")]
    UnexpectedResponse(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] crate::error::ProtocolError),
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::error::CryptoError),
    #[error("io error: {0}")]
    Io(
        #[serde(skip)]
        #[source]
        std::sync::Arc<std::io::Error>,
    ),
}

impl ErrorCode for SessionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::Timeout(_) => "timeout",
            Self::UnexpectedResponse(_) => "unexpected_response",
            Self::Protocol(e) => e.code(),
            Self::Crypto(e) => e.code(),
            Self::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(e))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Handshake/streaming lifecycle state (§4.3 "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Init,
    TcpOpen,
    NonceReceived,
    LaunchSent,
    UdpBang,
    SessionReady,
    Streaming,
    Stopping,
    Stopped,
}

/// Negotiated stream parameters, settled during BIG/BANG (§3 Data Model).
#[derive(Debug, Clone, Serialize)]
pub struct NegotiatedStream {
    pub resolution: Resolution,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub codec: StreamCodec,
}

/// A live console session (§3 Data Model: `RemoteSession`).
///
/// Owned exclusively by the `RPStream` orchestrator once established; the
/// `SessionRegistry` holds it behind the per-session lock described in §5.
pub struct RemoteSession {
    pub id: Uuid,
    pub host_ip: IpAddr,
    pub host_type: HostType,
    pub host_id: String,
    pub host_name: String,
    pub session_id: [u8; 16],
    pub handshake_key: [u8; 16],
    pub secret: [u8; 32],
    pub stream: NegotiatedStream,
    pub mtu: u16,
    pub rtt_micros: u64,
    state: SessionState,
    /// Edge-triggered: notified exactly once, the instant `SESSION_READY`
    /// is reached, so a waiting receive task can stop polling state.
    pub ready: Notify,
    cipher: StreamCipher,
    control: ControlCipher,
}

impl RemoteSession {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::info!(session_id = %self.id, from = ?self.state, to = ?state, "session state transition");
        self.state = state;
        if state == SessionState::SessionReady {
            self.ready.notify_waiters();
        }
    }

    /// Encrypts one Takion video/audio/feedback message (§4.4-§4.5).
    pub fn encrypt(&mut self, msg_type: MessageType, plaintext: Vec<u8>) -> Vec<u8> {
        encode(&mut self.cipher.local, msg_type, plaintext)
    }

    /// Decodes and authenticates one inbound Takion datagram.
    pub fn decrypt(&mut self, datagram: &[u8]) -> Result<crate::transport::Decoded, crate::error::CryptoError> {
        decode(&mut self.cipher.remote, datagram)
    }

    /// Encrypts a session-control body using the session-layer AES-CFB
    /// cipher (distinct from the Takion stream cipher above).
    pub fn encrypt_control(&mut self, data: &mut [u8]) {
        self.control.encrypt(data);
    }

    pub fn decrypt_control(&mut self, data: &mut [u8]) {
        self.control.decrypt(data);
    }

    /// Transitions `SESSION_READY` to `STREAMING` once the orchestrator's
    /// background tasks are spawned (§4.3 state machine, §4.11 `start()`).
    pub fn mark_streaming(&mut self) {
        self.set_state(SessionState::Streaming);
    }

    pub fn begin_stopping(&mut self) {
        self.set_state(SessionState::Stopping);
    }

    pub fn mark_stopped(&mut self) {
        self.set_state(SessionState::Stopped);
    }
}

/// Tunables for one `establish()` call (§4.3).
pub struct HandshakeTimeouts {
    pub tcp_connect: Duration,
    pub control_exchange: Duration,
    pub bang_wait: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            tcp_connect: Duration::from_secs(5),
            control_exchange: Duration::from_secs(5),
            bang_wait: Duration::from_secs(10),
        }
    }
}

/// Drives the full handshake (§4.3 steps 1-8) and returns a session parked
/// in `SESSION_READY` together with the already-connected Takion UDP
/// socket the handshake negotiated BANG/BIG over. The caller (the
/// `RPStream` orchestrator) reuses this same socket for the rest of the
/// session rather than reconnecting, and transitions the session to
/// `STREAMING` once its receive/feedback tasks are spawned.
pub async fn establish(
    creds: &DeviceCredentials,
    timeouts: &HandshakeTimeouts,
) -> SessionResult<(RemoteSession, TakionSocket)> {
    if !creds.is_valid() {
        return Err(SessionError::InvalidCredentials);
    }

    let host_hmac_key = registration_hmac_key(creds.host_type);

    // Step 1-2: open the control channel and fetch the session nonce.
    let mut control_socket =
        ControlSocket::connect(creds.host_ip, crate::protocol_constants::REGISTRATION_PORT, timeouts.tcp_connect)
            .await
            .map_err(|_| SessionError::Timeout("tcp connect"))?;

    let request = build_session_request(creds);
    control_socket.write_all(&request).await?;
    let raw = control_socket.read_to_end(timeouts.control_exchange).await?;
    let (status, body) = split_http_response(&raw)?;
    if !status.contains("200") {
        return Err(SessionError::UnexpectedResponse(status));
    }
    let nonce = extract_nonce(&body)?;

    let mut control = ControlCipher::new(creds.server_key, host_hmac_key.to_vec(), nonce);

    // Step 3: generate this side's ephemeral ECDH keypair and a random
    // handshake key used to derive the Takion stream cipher base keys.
    let ecdh = StreamEcdh::generate();
    let mut handshake_key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut handshake_key);

    let launch_spec = build_launch_spec(creds);
    let big = BigLaunchSpec {
        client_version: creds.host_type.rp_version(),
        session_key: &creds.registration_key,
        launch_spec: launch_spec.as_bytes(),
        enc_key: &handshake_key,
        ecdh_pub: &ecdh.public_point(),
        ecdh_sig: &ecdh.sign(&handshake_key),
    };
    let mut big_body = big::build_big_payload(&big);
    control.encrypt(&mut big_body);
    control_socket.write_all(&build_ctrl_launch_request(creds, &big_body)).await?;

    // Step 4-5: open the UDP Takion socket and wait for BANG (console's
    // ECDH public point + signature). PS5 leans on this socket earlier and
    // more heavily than PS4 (DESIGN.md open question #2) — both sides still
    // need it to complete the ECDH exchange, so the receive loop below is
    // shared.
    let mut takion_socket = TakionSocket::connect(SocketAddr::new(creds.host_ip, TAKION_PORT)).await?;

    let bang = wait_for_bang(&mut takion_socket, timeouts.bang_wait).await?;
    StreamEcdh::verify(&handshake_key, &bang.ecdh_pub, &bang.ecdh_sig)?;
    let secret = ecdh.shared_secret(&bang.ecdh_pub)?;

    let cipher = StreamCipher::new(handshake_key, secret);

    // Step 6-7: read the console's reply BIG carrying the session-id.
    let reply_raw = control_socket.read_to_end(timeouts.control_exchange).await?;
    let (_, reply_body) = split_http_response(&reply_raw)?;
    let mut reply_body = reply_body;
    control.decrypt(&mut reply_body);
    let session_id = big::parse_big_session_id(&reply_body)?;

    let mut session = RemoteSession {
        id: Uuid::from_bytes(*blake_uuid_seed(&session_id)),
        host_ip: creds.host_ip,
        host_type: creds.host_type,
        host_id: creds.host_id.clone(),
        host_name: creds.host_name.clone(),
        session_id,
        handshake_key,
        secret,
        stream: NegotiatedStream {
            resolution: Resolution::R1080p,
            fps: 60,
            bitrate_kbps: 8000,
            codec: StreamCodec::H264,
        },
        mtu: DEFAULT_MTU,
        rtt_micros: 0,
        state: SessionState::Init,
        ready: Notify::new(),
        cipher,
        control,
    };

    session.set_state(SessionState::TcpOpen);
    session.set_state(SessionState::NonceReceived);
    session.set_state(SessionState::LaunchSent);
    session.set_state(SessionState::UdpBang);
    session.set_state(SessionState::SessionReady);

    Ok((session, takion_socket))
}

/// Session ids only need to be unique for the `Uuid` used as this crate's
/// in-memory registry key, not cryptographically independent of the wire
/// session-id; folding the 16 bytes through SHA-256 avoids colliding with a
/// `Uuid` built any other way.
fn blake_uuid_seed(session_id: &[u8; 16]) -> Box<[u8; 16]> {
    let digest = sha256(session_id);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    Box::new(out)
}

fn build_session_request(creds: &DeviceCredentials) -> Vec<u8> {
    format!(
        "GET /sce/rp/session HTTP/1.1\r\nHost: {}\r\nRP-RegistKey: {}\r\nRP-Version: {}\r\n\r\n",
        creds.host_ip,
        hex::encode(creds.registration_key),
        creds.host_type.rp_version(),
    )
    .into_bytes()
}

fn build_ctrl_launch_request(creds: &DeviceCredentials, encrypted_body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "POST /sce/rp/session/ctrl HTTP/1.1\r\nHost: {}\r\nRP-RegistKey: {}\r\nContent-Length: {}\r\n\r\n",
        creds.host_ip,
        hex::encode(creds.registration_key),
        encrypted_body.len(),
    )
    .into_bytes();
    out.extend_from_slice(encrypted_body);
    out
}

fn build_launch_spec(creds: &DeviceCredentials) -> String {
    format!(
        "resolution=1080p;fps=60;bitrate=8000;codec=h264;host_type={}",
        creds.host_type.as_wire_str()
    )
}

fn split_http_response(raw: &[u8]) -> SessionResult<(String, Vec<u8>)> {
    let text = String::from_utf8_lossy(raw);
    let mut parts = text.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or_default();
    let body_text = parts.next().unwrap_or_default();
    let status = head.lines().next().unwrap_or_default().to_string();
    Ok((status, body_text.as_bytes().to_vec()))
}

fn extract_nonce(body: &[u8]) -> SessionResult<[u8; 16]> {
    let text = String::from_utf8_lossy(body);
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("rp-nonce") {
                let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value.trim())
                    .map_err(|_| SessionError::UnexpectedResponse("malformed RP-Nonce".to_string()))?;
                return decoded
                    .try_into()
                    .map(|arr: [u8; 16]| arr)
                    .map_err(|_| SessionError::UnexpectedResponse("RP-Nonce wrong length".to_string()));
            }
        }
    }
    Err(SessionError::UnexpectedResponse("missing RP-Nonce header".to_string()))
}

async fn wait_for_bang(socket: &mut TakionSocket, deadline: Duration) -> SessionResult<BangPayload> {
    let started = tokio::time::Instant::now();
    loop {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(SessionError::Timeout("BANG"));
        }
        match socket.recv(remaining).await? {
            Some(datagram) if datagram.first().copied() == Some(MessageType::Bang.as_u8()) => {
                let payload = &datagram[crate::protocol_constants::TAKION_HEADER_LEN.min(datagram.len())..];
                return big::parse_bang_payload(payload).map_err(SessionError::Protocol);
            }
            Some(_) => continue,
            None => continue,
        }
    }
}

/// Test-only constructors that reach past this module's private fields
/// (`state`, `cipher`, `control`) so other modules' tests can build a
/// `RemoteSession` without driving a full `establish()` handshake.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{ControlCipher, NegotiatedStream, RemoteSession, SessionState};
    use crate::config::{Resolution, StreamCodec};
    use crate::host_type::HostType;
    use crate::protocol_constants::DEFAULT_MTU;
    use crate::transport::StreamCipher;
    use std::net::IpAddr;
    use tokio::sync::Notify;
    use uuid::Uuid;

    pub(crate) fn build_session(
        id: Uuid,
        host_ip: IpAddr,
        host_type: HostType,
        session_id: [u8; 16],
        cipher: StreamCipher,
    ) -> RemoteSession {
        RemoteSession {
            id,
            host_ip,
            host_type,
            host_id: "test-console".to_string(),
            host_name: "Test Console".to_string(),
            session_id,
            handshake_key: [0u8; 16],
            secret: [0u8; 32],
            stream: NegotiatedStream {
                resolution: Resolution::R1080p,
                fps: 60,
                bitrate_kbps: 8000,
                codec: StreamCodec::H264,
            },
            mtu: DEFAULT_MTU,
            rtt_micros: 0,
            state: SessionState::SessionReady,
            ready: Notify::new(),
            cipher,
            control: ControlCipher::new([0u8; 16], vec![0u8; 32], [0u8; 16]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> DeviceCredentials {
        DeviceCredentials {
            account_id: [1; 8],
            host_id: "console-1".to_string(),
            host_name: "Living Room".to_string(),
            host_ip: "10.0.0.5".parse().unwrap(),
            host_type: HostType::Ps5,
            registration_key: [2; 16],
            server_key: [3; 16],
            created_at_ms: 0,
            expires_at_ms: u64::MAX,
        }
    }

    #[test]
    fn session_request_carries_regist_key_hex() {
        let req = build_session_request(&creds());
        let text = String::from_utf8(req).unwrap();
        assert!(text.contains(&hex::encode([2u8; 16])));
    }

    #[test]
    fn extract_nonce_reads_base64_header() {
        let nonce_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [9u8; 16]);
        let body = format!("RP-Nonce: {nonce_b64}\r\n");
        let nonce = extract_nonce(body.as_bytes()).unwrap();
        assert_eq!(nonce, [9u8; 16]);
    }

    #[test]
    fn extract_nonce_rejects_missing_header() {
        assert!(extract_nonce(b"Content-Type: text/plain\r\n").is_err());
    }

    #[tokio::test]
    async fn establish_against_unreachable_host_times_out_on_connect() {
        let mut creds = creds();
        creds.host_ip = "192.0.2.77".parse().unwrap();
        let timeouts = HandshakeTimeouts {
            tcp_connect: Duration::from_millis(50),
            ..HandshakeTimeouts::default()
        };
        let result = establish(&creds, &timeouts).await;
        assert!(result.is_err());
    }

    #[test]
    fn establish_rejects_expired_credentials() {
        let mut expired = creds();
        expired.expires_at_ms = 0;
        let result = tokio_test_block_on(establish(&expired, &HandshakeTimeouts::default()));
        assert!(matches!(result, Err(SessionError::InvalidCredentials)));
    }

    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
