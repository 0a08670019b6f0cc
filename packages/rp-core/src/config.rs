//! Application configuration.
//!
//! Mirrors every row of the streaming engine's recognized-options table:
//! discovery, registration, WebRTC downstream transport, stream defaults,
//! and logging. All fields have sensible defaults and are validated before
//! use, the same way `apps/rp-server` loads and validates its own config.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the streaming engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub registration: RegistrationConfig,
    pub webrtc: WebrtcConfig,
    pub stream: StreamConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            registration: RegistrationConfig::default(),
            webrtc: WebrtcConfig::default(),
            stream: StreamConfig::default(),
            health: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Validates every sub-configuration, returning the first violation.
    pub fn validate(&self) -> Result<(), String> {
        self.stream.validate()?;
        self.webrtc.validate()?;
        Ok(())
    }
}

/// Discovery (DDP) configuration. See § 4.1.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Per-interface probe timeout (milliseconds).
    pub timeout_ms: u64,
    /// UDP port the DDP probe is sent to.
    pub port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            port: 9302,
        }
    }
}

/// Registration-flow configuration. See § 4.2.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Overall registration timeout (milliseconds).
    pub timeout_ms: u64,
    /// How long issued credentials remain valid (days).
    pub credential_expiry_days: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            credential_expiry_days: 30,
        }
    }
}

/// Downstream WebRTC transport configuration. The engine itself never
/// speaks WebRTC — these values are handed to the external `Receiver`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct WebrtcConfig {
    pub ice_port_min: Option<u16>,
    pub ice_port_max: Option<u16>,
    pub turn_servers: Vec<TurnServer>,
}

impl WebrtcConfig {
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.ice_port_min, self.ice_port_max) {
            if min > max {
                return Err("webrtc.ice_port_min must be <= webrtc.ice_port_max".to_string());
            }
        }
        Ok(())
    }
}

/// One TURN relay credential set.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Negotiated stream defaults. See § 6.4.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub default_resolution: Resolution,
    pub default_fps: u32,
    pub default_bitrate_kbps: u32,
    pub codec: StreamCodec,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_resolution: Resolution::R1080p,
            default_fps: 60,
            default_bitrate_kbps: 8000,
            codec: StreamCodec::H264,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(30..=60).contains(&self.default_fps) || (self.default_fps != 30 && self.default_fps != 60) {
            return Err("stream.default_fps must be 30 or 60".to_string());
        }
        if !(2000..=15_000).contains(&self.default_bitrate_kbps) {
            return Err("stream.default_bitrate_kbps must be in 2000..=15000".to_string());
        }
        Ok(())
    }
}

/// Negotiated video resolution.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    R360p,
    R540p,
    #[default]
    R1080p,
    R720p,
}

/// Negotiated video codec, distinct from the per-packet `VideoCodec` the
/// reassembler detects at runtime (this is the *requested* codec; the
/// console may only confirm it once streaming starts).
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamCodec {
    #[default]
    H264,
    Hevc,
    HevcHdr,
}

/// Stream-health tuning. See § 9 open question: the stall-detection
/// threshold is source-ambiguous (5-10s); exposed here rather than guessed.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds without a completed frame before the frame-drought trigger fires.
    pub stall_detection_secs: u64,
    /// Rolling window size for the health snapshot (seconds).
    pub snapshot_window_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stall_detection_secs: 5,
            snapshot_window_secs: 10,
        }
    }
}

/// Diagnostics toggles.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub enable_debug: bool,
    pub log_network_traffic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn stream_config_rejects_bad_fps() {
        let mut cfg = StreamConfig::default();
        cfg.default_fps = 45;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stream_config_rejects_bitrate_out_of_range() {
        let mut cfg = StreamConfig::default();
        cfg.default_bitrate_kbps = 500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn webrtc_config_rejects_inverted_port_range() {
        let cfg = WebrtcConfig {
            ice_port_min: Some(50000),
            ice_port_max: Some(40000),
            turn_servers: vec![],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn health_config_default_matches_spec_choice() {
        assert_eq!(HealthConfig::default().stall_detection_secs, 5);
    }
}
