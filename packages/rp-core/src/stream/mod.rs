//! The `RPStream` orchestrator (§4.11, §5): wires the session, Takion
//! transport, packet reassembler, health monitor, emergency recovery, and
//! feedback sender together behind one handle, and fans decoded access
//! units out to attached `Receiver`s.
//!
//! Grounded on `bootstrap.rs`'s composition-root shape (one struct holding
//! every wired service, `Arc`-shared, with an explicit `start`/`shutdown`)
//! and `services/stream_coordinator.rs`'s receiver-fan-out-under-lock
//! pattern, generalized from one Sonos playback session to one console
//! streaming session with its five background tasks (§5).

mod cadence;
mod manager;
mod receivers;

pub use manager::{FeedbackKind, RPStream, RPStreamConfig};
