//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where
//! discovery, registration, and session establishment are chained together
//! and handed off to a live [`RPStream`]. This pattern provides:
//!
//! - **Clarity**: all dependency relationships are visible in one place
//! - **Testability**: easy to swap implementations for testing
//! - **Maintainability**: wiring logic is isolated from call sites
//!
//! Grounded on `bootstrap.rs`'s `bootstrap_services` composition root
//! (numbered wiring-order doc comment, one struct holding every wired
//! service behind `Arc`), generalized from a fixed Sonos service graph to
//! the per-console discover → register → establish → stream pipeline.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::discovery::{discover_unicast, Console, DiscoveryConfig as WireDiscoveryConfig, DiscoveryError};
use crate::error::ErrorCode;
use crate::host_type::HostType;
use crate::registration::{register, DeviceCredentials, RegistrationError, RegistrationRequest};
use crate::registry::SessionRegistry;
use crate::runtime::TokioSpawner;
use crate::session::{establish, HandshakeTimeouts, SessionError};
use crate::stream::{RPStream, RPStreamConfig};

/// Failures that can occur while bringing up a console session end to end.
/// Each variant simply wraps the stage-specific error; `RemotePlayService`
/// does not retry across stage boundaries (each stage already retries
/// internally where it makes sense — see `registration::register`).
#[derive(Debug, thiserror::Error, Serialize)]
#[serde(tag = "kind")]
pub enum BootstrapError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error("session establishment failed: {0}")]
    Session(#[from] SessionError),
    #[error("no console answered at the given address")]
    ConsoleNotFound,
}

impl ErrorCode for BootstrapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Discovery(e) => e.code(),
            Self::Registration(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::ConsoleNotFound => "console_not_found",
        }
    }
}

/// The composition root: owns the session registry, the task spawner, and
/// the configuration every stage reads its tunables from.
///
/// Wiring order (§4.1-§4.11):
/// 1. Cancellation token (governs every spawned background task)
/// 2. Task spawner (current Tokio runtime handle)
/// 3. Session registry (empty at construction; sessions are added as they
///    come up)
///
/// Unlike the teacher's `StreamingRuntime` (a dedicated high-priority thread
/// pool carved out for uninterrupted audio transcoding), this service runs
/// every session on the ambient Tokio runtime — Remote Play's own heartbeat
/// and feedback cadences are already real-time-sensitive by design (§4.10),
/// and a second runtime would only add scheduling complexity without a
/// concrete benefit (see DESIGN.md).
pub struct RemotePlayService {
    config: Config,
    spawner: TokioSpawner,
    cancel_token: CancellationToken,
    sessions: SessionRegistry<RPStream>,
}

impl RemotePlayService {
    /// Builds the service with an empty session registry. Call sites embed
    /// this inside their own `Arc` if they need to share it across tasks.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            spawner: TokioSpawner::current(),
            cancel_token: CancellationToken::new(),
            sessions: SessionRegistry::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn session(&self, id: Uuid) -> Option<Arc<RPStream>> {
        self.sessions.get(id)
    }

    #[must_use]
    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.ids()
    }

    /// Confirms a console is reachable and in registration mode at a known
    /// IP (§4.1 unicast path), skipping the broadcast scan when the caller
    /// already knows where the console is.
    pub async fn probe(&self, ip: IpAddr) -> Result<Console, BootstrapError> {
        let discovery_cfg = WireDiscoveryConfig {
            timeout: Duration::from_millis(self.config.discovery.timeout_ms),
            port: self.config.discovery.port,
        };
        discover_unicast(ip, &discovery_cfg)
            .await?
            .ok_or(BootstrapError::ConsoleNotFound)
    }

    /// Runs the registration exchange (§4.2) against a console already
    /// known to be reachable.
    pub async fn register(
        &self,
        host_ip: IpAddr,
        host_type: HostType,
        host_name: String,
        account_id: [u8; 8],
        pin: String,
    ) -> Result<DeviceCredentials, BootstrapError> {
        let req = RegistrationRequest {
            host_ip,
            host_type,
            host_name,
            account_id,
            pin,
        };
        let creds = register(
            &req,
            Duration::from_millis(self.config.registration.timeout_ms),
            Duration::from_secs(u64::from(self.config.registration.credential_expiry_days) * 86_400),
        )
        .await?;
        Ok(creds)
    }

    /// Runs the session handshake (§4.3), wraps the result in an `RPStream`,
    /// and registers it for lookup by session id. Does not start the
    /// background tasks — call [`RPStream::start`] once the caller has
    /// attached its `Receiver`(s).
    pub async fn connect(&self, creds: &DeviceCredentials) -> Result<Arc<RPStream>, BootstrapError> {
        let (session, socket) = establish(creds, &HandshakeTimeouts::default()).await?;
        let stream_config = RPStreamConfig {
            health: self.config.health.clone(),
            ..RPStreamConfig::default()
        };
        let stream = Arc::new(RPStream::new(session, socket, stream_config));
        self.sessions.insert(stream.id(), Arc::clone(&stream));
        Ok(stream)
    }

    /// Stops and forgets one session.
    pub fn disconnect(&self, id: Uuid) {
        if let Some(stream) = self.sessions.remove(id) {
            stream.stop();
        }
    }

    #[must_use]
    pub fn spawner(&self) -> &TokioSpawner {
        &self.spawner
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Stops every live session and signals the shared cancellation token.
    pub async fn shutdown(&self) {
        tracing::info!("beginning graceful shutdown");
        for id in self.session_ids() {
            self.disconnect(id);
        }
        self.cancel_token.cancel();
        tracing::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_against_unreachable_host_reports_console_not_found() {
        let mut config = Config::default();
        config.discovery.timeout_ms = 50;
        let service = RemotePlayService::new(config);
        let result = service.probe("192.0.2.77".parse().unwrap()).await;
        assert!(matches!(result, Err(BootstrapError::ConsoleNotFound)));
    }

    #[test]
    fn new_service_starts_with_no_sessions() {
        let service = RemotePlayService::new(Config::default());
        assert!(service.session_ids().is_empty());
    }
}
