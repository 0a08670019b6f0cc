//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Console to connect to. If unset, the server broadcasts a discovery
    /// probe and connects to the first console it finds.
    /// Override: `RP_CONSOLE_IP`
    pub console_ip: Option<IpAddr>,

    /// Where registered device credentials are read from and written to.
    /// If the file exists and its credentials are still valid, registration
    /// is skipped entirely.
    /// Override: `RP_CREDENTIALS_FILE`
    pub credentials_file: PathBuf,

    /// Directory elementary-stream dumps are written to (see
    /// `FileDumpReceiver`).
    /// Override: `RP_OUTPUT_DIR`
    pub output_dir: PathBuf,

    /// Per-interface discovery probe timeout (milliseconds).
    pub discovery_timeout_ms: u64,

    /// Overall registration timeout (milliseconds).
    pub registration_timeout_ms: u64,

    /// How long issued credentials remain valid (days).
    pub credential_expiry_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            console_ip: None,
            credentials_file: PathBuf::from("rp-credentials.json"),
            output_dir: PathBuf::from("rp-dump"),
            discovery_timeout_ms: 2000,
            registration_timeout_ms: 30_000,
            credential_expiry_days: 30,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RP_CONSOLE_IP") {
            if let Ok(ip) = val.parse() {
                self.console_ip = Some(ip);
            }
        }

        if let Ok(val) = std::env::var("RP_CREDENTIALS_FILE") {
            self.credentials_file = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("RP_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
    }

    /// Converts to rp-core's `Config` type.
    pub fn to_core_config(&self) -> rp_core::Config {
        let mut core_config = rp_core::Config::default();
        core_config.discovery.timeout_ms = self.discovery_timeout_ms;
        core_config.registration.timeout_ms = self.registration_timeout_ms;
        core_config.registration.credential_expiry_days = self.credential_expiry_days;
        core_config
    }
}
