//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the console's own wire protocol (DDP, Takion,
//! registration) and changing them would break interop with a physical
//! console, not just this crate's internal conventions.

// ─────────────────────────────────────────────────────────────────────────────
// Discovery (DDP)
// ─────────────────────────────────────────────────────────────────────────────

/// Port DDP probes are sent to (broadcast or unicast).
pub const DDP_PROBE_PORT: u16 = 9302;

/// Port DDP replies are received on.
pub const DDP_REPLY_PORT: u16 = 9303;

/// Fixed discovery-protocol version string embedded in every probe.
pub const DDP_PROTOCOL_VERSION: &str = "00030010";

// ─────────────────────────────────────────────────────────────────────────────
// Registration
// ─────────────────────────────────────────────────────────────────────────────

/// TCP/UDP port the registration exchange and session-control channel speak on.
pub const REGISTRATION_PORT: u16 = 9295;

/// PS4 registration probe datagram.
pub const REGISTRATION_PROBE_PS4: &[u8; 4] = b"SRC2";
/// PS5 registration probe datagram.
pub const REGISTRATION_PROBE_PS5: &[u8; 4] = b"SRC3";
/// Expected PS4 probe reply prefix.
pub const REGISTRATION_PROBE_REPLY_PS4: &[u8; 4] = b"RES2";
/// Expected PS5 probe reply prefix.
pub const REGISTRATION_PROBE_REPLY_PS5: &[u8; 4] = b"RES3";

/// `User-Agent` header value sent with the registration HTTP-ish request.
pub const REGISTRATION_USER_AGENT: &str = "remoteplay Windows";

/// Registration payload size before the encrypted PSN header is appended (§4.2 step 4).
pub const REGISTRATION_PAYLOAD_LEN: usize = 480;

/// First splice offset for `key1` in the registration payload.
pub const REGISTRATION_KEY1_SPLICE_A: usize = 199;
/// Second splice offset for `key1` in the registration payload.
pub const REGISTRATION_KEY1_SPLICE_B: usize = 401;

// ─────────────────────────────────────────────────────────────────────────────
// Takion transport
// ─────────────────────────────────────────────────────────────────────────────

/// UDP port the Takion media/control datagrams flow over.
pub const TAKION_PORT: u16 = 9296;

/// Fixed prefix length of every Takion datagram: type(1) + key_pos(4) + gmac(4).
pub const TAKION_HEADER_LEN: usize = 9;

/// Heartbeat cadence; absence for 3x this interval triggers recovery.
pub const HEARTBEAT_INTERVAL_MS: u64 = 16;

/// Default negotiated MTU, both directions, until renegotiated.
pub const DEFAULT_MTU: u16 = 1454;

// ─────────────────────────────────────────────────────────────────────────────
// Feedback cadence
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum interval between FEEDBACK_STATE sends.
pub const FEEDBACK_STATE_MIN_INTERVAL_MS: u64 = 8;
/// Maximum interval before FEEDBACK_STATE is sent regardless of dirtiness.
pub const FEEDBACK_STATE_MAX_INTERVAL_MS: u64 = 16;
/// Event buffer capacity (most-recent-first).
pub const FEEDBACK_EVENT_BUFFER_CAPACITY: usize = 5;
/// Default delay between a `tap()`'s press and release events.
pub const DEFAULT_TAP_DELAY_MS: u64 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name embedded in registration client-type headers.
pub const APP_NAME: &str = "Remote Play Bridge";

/// Event channel capacity for the orchestrator's internal broadcast channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
