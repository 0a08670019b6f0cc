//! Crate-wide error taxonomy.
//!
//! Mirrors the failure kinds of the streaming engine's error-handling design:
//! every fallible step returns a tagged variant rather than throwing, so the
//! state machines that call into this crate can match on `RpError` and decide
//! whether to abort, retry, or escalate to emergency recovery.

use serde::Serialize;
use thiserror::Error;

/// Common trait for stable, machine-readable error codes.
///
/// Lets callers key off of `code()` instead of matching on `Display` text.
pub trait ErrorCode {
    /// Returns the error code string for log/diagnostic consumers.
    fn code(&self) -> &'static str;
}

/// Crypto-layer failures: tag/signature verification, malformed ciphertext.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind")]
pub enum CryptoError {
    /// Received GMAC did not match the recomputed tag; packet is dropped.
    #[error("gmac mismatch")]
    GmacMismatch,
    /// BANG's ECDH public-key signature failed verification.
    #[error("ecdh signature invalid")]
    EcdhSignatureInvalid,
    /// CFB-decrypted body could not be parsed as `key: value` lines.
    #[error("cfb-decrypted body malformed")]
    CfbDecryptMalformed,
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::GmacMismatch => "gmac_mismatch",
            Self::EcdhSignatureInvalid => "ecdh_signature_invalid",
            Self::CfbDecryptMalformed => "cfb_decrypt_malformed",
        }
    }
}

/// Handshake/streaming protocol violations. Policy: abort session (`STOPPING`).
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind")]
pub enum ProtocolError {
    /// A Takion message type was not valid in the current session state.
    #[error("unexpected message type {actual} in state {state}")]
    UnexpectedMessageType { actual: u8, state: &'static str },
    /// A required header was absent from a registration/session response.
    #[error("missing required header: {0}")]
    MissingHeader(String),
    /// The BIG payload failed to parse.
    #[error("malformed BIG payload")]
    MalformedBig,
    /// The BANG payload failed to parse.
    #[error("malformed BANG payload")]
    MalformedBang,
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedMessageType { .. } => "unexpected_message_type",
            Self::MissingHeader(_) => "missing_header",
            Self::MalformedBig => "malformed_big",
            Self::MalformedBang => "malformed_bang",
        }
    }
}

/// Which edge timed out, used by the state machines to decide whether to
/// fall back to `STOPPING` (handshake) or `TRIGGERED` recovery (streaming).
#[derive(Debug, Clone, Copy, Error, Serialize)]
pub enum TimeoutKind {
    /// No reply during discovery, registration, or session handshake.
    #[error("handshake timed out")]
    Handshake,
    /// No heartbeat received for 3x the heartbeat interval during streaming.
    #[error("heartbeat timed out")]
    Heartbeat,
}

/// Registration-specific authentication failures. Never retried.
#[derive(Debug, Clone, Copy, Error, Serialize)]
pub enum AuthFailureKind {
    #[error("PIN invalid")]
    BadPin,
    #[error("unknown account")]
    UnknownAccount,
}

/// Top-level error type returned by every fallible operation in this crate.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
#[non_exhaustive]
pub enum RpError {
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timeout: {0}")]
    Timeout(TimeoutKind),

    #[error("transport error: {0}")]
    Transport(
        #[serde(skip)]
        #[source]
        std::sync::Arc<std::io::Error>,
    ),

    /// A receiver callback failed; logged and swallowed at the call site,
    /// never meant to propagate past the orchestrator.
    #[error("receiver callback failed: {0}")]
    ReceiverFailure(String),

    /// Discovery reported `620 Server Standby`; not an error in the
    /// recovery path, just a status surfaced to the caller.
    #[error("console is in standby")]
    ConsoleStandby,

    #[error("registration auth failure: {0}")]
    AuthFailure(AuthFailureKind),

    #[error("discovery error: {0}")]
    Discovery(#[from] crate::discovery::DiscoveryError),

    #[error("registration error: {0}")]
    Registration(#[from] crate::registration::RegistrationError),

    #[error("session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("reassembly error: {0}")]
    Reassembly(#[from] crate::reassembler::ReassemblyError),
}

impl From<std::io::Error> for RpError {
    fn from(e: std::io::Error) -> Self {
        RpError::Transport(std::sync::Arc::new(e))
    }
}

impl RpError {
    /// Returns `true` for errors that should surface to the caller rather
    /// than being absorbed by the emergency-recovery machinery (auth
    /// failures, standby, and protocol violations all abort the session).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpError::AuthFailure(_) | RpError::Protocol(_) | RpError::ConsoleStandby
        )
    }
}

/// Crate-wide result alias.
pub type RpResult<T> = Result<T, RpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_codes_are_stable() {
        assert_eq!(CryptoError::GmacMismatch.code(), "gmac_mismatch");
        assert_eq!(
            CryptoError::EcdhSignatureInvalid.code(),
            "ecdh_signature_invalid"
        );
    }

    #[test]
    fn auth_failure_is_fatal() {
        let err = RpError::AuthFailure(AuthFailureKind::BadPin);
        assert!(err.is_fatal());
    }

    #[test]
    fn transport_error_is_not_fatal() {
        let err: RpError = std::io::Error::new(std::io::ErrorKind::TimedOut, "boom").into();
        assert!(!err.is_fatal());
    }
}
