//! rp-core - shared library for a PlayStation Remote Play console-to-browser
//! streaming bridge.
//!
//! This crate provides the core functionality for discovering a console on
//! the LAN, registering a device with it, establishing a Remote Play
//! session, and streaming decoded video/audio/feedback to any downstream
//! consumer (e.g. a WebRTC bridge). It is designed to be embedded by a
//! standalone headless server as well as other front-ends.
//!
//! # Architecture
//!
//! The crate is organized by protocol stage:
//!
//! - [`discovery`]: DDP probe/reply console enumeration
//! - [`registration`]: TCP 9295 device-pairing exchange
//! - [`session`]: control-channel + Takion BIG/BANG handshake
//! - [`transport`]: the Takion wire codec and stream cipher
//! - [`reassembler`]: packet reorder window + Reed-Solomon FEC recovery
//! - [`health`]: rolling delivery window + emergency recovery state machine
//! - [`feedback`]: controller state/event cadence back to the console
//! - [`codec`]: NAL parsing and Annex-B framing
//! - [`stream`]: the `RPStream` orchestrator tying the above together
//! - [`bootstrap`]: the composition root wiring discovery through streaming
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`Lifecycle`](lifecycle::Lifecycle): process-level shutdown
//! - [`Receiver`](receiver::Receiver): the inward decoded-frame contract

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod feedback;
pub mod health;
pub mod host_type;
pub mod lifecycle;
pub mod protocol_constants;
pub mod reassembler;
pub mod receiver;
pub mod registration;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod stream;
pub mod utils;

mod crypto;
mod transport;

pub use bootstrap::{BootstrapError, RemotePlayService};
pub use codec::{AudioCodec, VideoCodec};
pub use config::Config;
pub use discovery::{discover_broadcast, discover_unicast, Console, ConsoleStatus};
pub use error::{ErrorCode, RpError, RpResult};
pub use feedback::{Button, ControllerState, FeedbackEvent, RumbleEvent, StickAxis, StickSide};
pub use health::HealthSnapshot;
pub use host_type::HostType;
pub use lifecycle::{Lifecycle, NoopLifecycle, ServerLifecycle};
pub use receiver::{NoopReceiver, Receiver};
pub use registration::{register, DeviceCredentials, RegistrationRequest};
pub use registry::SessionRegistry;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{HandshakeTimeouts, RemoteSession, SessionState};
pub use stream::{FeedbackKind, RPStream, RPStreamConfig};
pub use utils::now_millis;
