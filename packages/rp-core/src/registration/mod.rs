//! Registration flow (§4.2): turns `(host_ip, host_type, account_id, pin)`
//! into durable [`DeviceCredentials`].
//!
//! Grounded on `sonos/client.rs`'s request-building shape and
//! `sonos/retry.rs`'s bounded-retry-on-timeout pattern, generalized from
//! SOAP-over-HTTP to the console's raw TCP 9295 registration exchange.

mod wire;
pub mod vendor_keys;

pub use wire::WireError;

use std::net::IpAddr;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::error::ErrorCode;
use crate::host_type::HostType;
use crate::protocol_constants::{
    REGISTRATION_PORT, REGISTRATION_PROBE_PS4, REGISTRATION_PROBE_PS5,
    REGISTRATION_PROBE_REPLY_PS4, REGISTRATION_PROBE_REPLY_PS5,
};
use crate::utils::now_millis;

/// Registration-layer failures (§4.2 "Failure taxonomy"). `BadPin` and
/// `NotInRegistrationMode` are never retried; `Timeout` is retried up to 3
/// times by [`register`].
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "kind")]
pub enum RegistrationError {
    #[error("console is not in registration mode")]
    NotInRegistrationMode,
    #[error("PIN rejected by console")]
    BadPin,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("registration timed out")]
    Timeout,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("io error: {0}")]
    Io(
        #[serde(skip)]
        #[source]
        std::sync::Arc<std::io::Error>,
    ),
}

impl ErrorCode for RegistrationError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotInRegistrationMode => "not_in_registration_mode",
            Self::BadPin => "bad_pin",
            Self::ProtocolError(_) => "protocol_error",
            Self::Timeout => "timeout",
            Self::Wire(e) => e.code(),
            Self::Io(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for RegistrationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(e))
    }
}

/// Alias mirroring the teacher's `SoapResult<T>` shape.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Opaque durable credentials for one account-host pair (§3 Data Model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredentials {
    pub account_id: [u8; 8],
    pub host_id: String,
    pub host_name: String,
    pub host_ip: IpAddr,
    pub host_type: HostType,
    pub registration_key: [u8; 16],
    pub server_key: [u8; 16],
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl DeviceCredentials {
    /// `now < expires_at` (§3 invariant).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        now_millis() < self.expires_at_ms
    }
}

/// Inputs to one registration attempt.
pub struct RegistrationRequest {
    pub host_ip: IpAddr,
    pub host_type: HostType,
    pub host_name: String,
    pub account_id: [u8; 8],
    pub pin: String,
}

const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(500), Duration::from_millis(1500)];

/// Runs the full registration flow (§4.2 steps 1-7), retrying up to 3 total
/// attempts on [`RegistrationError::Timeout`] only.
pub async fn register(
    req: &RegistrationRequest,
    probe_timeout: Duration,
    credential_expiry: Duration,
) -> RegistrationResult<DeviceCredentials> {
    let mut last_err = RegistrationError::Timeout;
    for (attempt, delay) in std::iter::once(None)
        .chain(RETRY_DELAYS.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            log::info!("[Registration] retrying attempt {} after {:?}", attempt + 1, delay);
            tokio::time::sleep(*delay).await;
        }
        match register_once(req, probe_timeout, credential_expiry).await {
            Ok(creds) => return Ok(creds),
            Err(RegistrationError::Timeout) => last_err = RegistrationError::Timeout,
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

async fn register_once(
    req: &RegistrationRequest,
    probe_timeout: Duration,
    credential_expiry: Duration,
) -> RegistrationResult<DeviceCredentials> {
    probe(req.host_ip, req.host_type, probe_timeout).await?;

    let key0 = wire::derive_key0(req.host_type, &req.pin).map_err(RegistrationError::Wire)?;

    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let key1 = wire::derive_key1(req.host_type, &nonce);

    let mut payload = wire::build_payload(&key1);
    let (encrypted_header, cipher) =
        wire::build_encrypted_header(req.host_type, key0, nonce, req.account_id);
    payload.extend_from_slice(&encrypted_header);

    let request = wire::build_request(req.host_type, req.host_ip, &payload);

    let mut stream = timeout(
        probe_timeout,
        TcpStream::connect((req.host_ip, REGISTRATION_PORT)),
    )
    .await
    .map_err(|_| RegistrationError::Timeout)??;

    stream.write_all(&request).await?;

    let mut raw = Vec::new();
    timeout(probe_timeout, stream.read_to_end(&mut raw))
        .await
        .map_err(|_| RegistrationError::Timeout)??;

    let (_, body) = wire::split_response(&raw).map_err(|e| match e {
        WireError::BadStatus(s) if s.contains("404") || s.contains("403") => {
            RegistrationError::BadPin
        }
        other => RegistrationError::Wire(other),
    })?;

    let parsed = wire::parse_response_body(&cipher, body)?;

    let created_at_ms = now_millis();
    Ok(DeviceCredentials {
        account_id: req.account_id,
        host_id: parsed.host_id,
        host_name: req.host_name.clone(),
        host_ip: req.host_ip,
        host_type: req.host_type,
        registration_key: parsed.rp_regist_key,
        server_key: parsed.rp_key,
        created_at_ms,
        expires_at_ms: created_at_ms + credential_expiry.as_millis() as u64,
    })
}

/// Step 1: confirm the console is in registration mode (§4.2 step 1).
async fn probe(host_ip: IpAddr, host_type: HostType, probe_timeout: Duration) -> RegistrationResult<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    let (probe_bytes, expect): (&[u8; 4], &[u8; 4]) = match host_type {
        HostType::Ps4 => (REGISTRATION_PROBE_PS4, REGISTRATION_PROBE_REPLY_PS4),
        HostType::Ps5 => (REGISTRATION_PROBE_PS5, REGISTRATION_PROBE_REPLY_PS5),
    };
    socket.send_to(probe_bytes, (host_ip, REGISTRATION_PORT)).await?;

    let mut buf = [0u8; 16];
    let (n, _) = timeout(probe_timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| RegistrationError::NotInRegistrationMode)??;

    if n >= 4 && &buf[..4] == expect {
        Ok(())
    } else {
        Err(RegistrationError::ProtocolError(
            "unexpected registration probe reply".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_credentials_validity_respects_expiry() {
        let creds = DeviceCredentials {
            account_id: [0; 8],
            host_id: "H1".to_string(),
            host_name: "test".to_string(),
            host_ip: "10.0.0.1".parse().unwrap(),
            host_type: HostType::Ps5,
            registration_key: [0; 16],
            server_key: [0; 16],
            created_at_ms: 0,
            expires_at_ms: 0,
        };
        assert!(!creds.is_valid());
    }

    #[tokio::test]
    async fn probe_against_unreachable_host_times_out() {
        let result = probe(
            "192.0.2.77".parse().unwrap(),
            HostType::Ps5,
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(RegistrationError::NotInRegistrationMode)));
    }
}
