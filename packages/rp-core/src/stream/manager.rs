//! The `RPStream` orchestrator (§4.11): owns one established
//! [`RemoteSession`], fans decoded frames out to attached [`Receiver`]s, and
//! drives the four background tasks in [`super::cadence`].
//!
//! Grounded on `bootstrap.rs`'s composition-root shape (one struct holding
//! every wired service behind `Arc`, with explicit `start`/`shutdown`) and
//! `services/stream_coordinator.rs`'s receiver-fan-out-under-lock pattern,
//! generalized from one Sonos playback session to one console streaming
//! session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::{AudioCodec, VideoCodec};
use crate::config::HealthConfig;
use crate::feedback::{
    ControllerState, FeedbackEvent, FeedbackSender, RumbleEvent, StickAxis, StickSide,
};
use crate::health::{EmergencyRecovery, FrameOutcome, HealthMonitor, HealthSnapshot};
use crate::reassembler::ReorderQueue;
use crate::receiver::Receiver;
use crate::runtime::TaskSpawner;
use crate::session::RemoteSession;
use crate::transport::{TakionSender, TakionSocket};

/// Tunables for one `RPStream` (window sizes, health thresholds); distinct
/// from `HandshakeTimeouts`, which governs the handshake that produces the
/// `RemoteSession` this struct wraps.
#[derive(Debug, Clone)]
pub struct RPStreamConfig {
    pub video_window: u32,
    pub audio_window: u32,
    pub health: HealthConfig,
}

impl Default for RPStreamConfig {
    fn default() -> Self {
        Self {
            video_window: 32,
            audio_window: 32,
            health: HealthConfig::default(),
        }
    }
}

/// The two feedback wire message kinds the orchestrator can be asked to send
/// immediately, bypassing the cadence task's own scheduling (§4.10, §4.11
/// `send_feedback`).
#[derive(Debug, Clone)]
pub enum FeedbackKind {
    State,
    Events,
}

struct Receivers {
    entries: Vec<Arc<dyn Receiver>>,
}

impl Receivers {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn for_each(&self, mut f: impl FnMut(&Arc<dyn Receiver>)) {
        for r in &self.entries {
            f(r);
        }
    }
}

/// One live console streaming session (§3 Data Model, §4.11).
///
/// Holds every piece of per-session state the background tasks in
/// [`super::cadence`] need, each behind the lock granularity the task
/// actually requires (§5 "Shared resources"): the session and reorder queues
/// are exclusive to the receive task, the feedback sender is shared between
/// callers of `update_controller_state`/`send_feedback` and the feedback
/// cadence task, and the receiver list is read-mostly.
pub struct RPStream {
    pub(super) id: Uuid,
    pub(super) session: Arc<Mutex<RemoteSession>>,
    pub(super) sender: TakionSender,
    /// The handshake-established socket, held until `start()` hands it to
    /// the receive task (§3 Ownership: exclusive owner of `recv()`).
    pub(super) socket: Mutex<Option<TakionSocket>>,
    pub(super) video_queue: Arc<Mutex<ReorderQueue>>,
    pub(super) audio_queue: Arc<Mutex<ReorderQueue>>,
    pub(super) health: Arc<Mutex<HealthMonitor>>,
    pub(super) recovery: Arc<Mutex<EmergencyRecovery>>,
    pub(super) feedback: Arc<Mutex<FeedbackSender>>,
    receivers: Arc<RwLock<Receivers>>,
    rumble_subscribers: Arc<RwLock<Vec<Box<dyn Fn(RumbleEvent) + Send + Sync>>>>,
    video_codec_announced: Arc<AtomicBool>,
    audio_codec_announced: Arc<AtomicBool>,
    pub(super) config: RPStreamConfig,
    pub(super) cancel: CancellationToken,
    started: AtomicBool,
}

impl RPStream {
    /// Wraps an already-established session and its handshake-negotiated
    /// Takion socket into a streamable orchestrator. Does not spawn any
    /// background task; call [`RPStream::start`] once attached receivers are
    /// in place.
    #[must_use]
    pub fn new(session: RemoteSession, socket: TakionSocket, config: RPStreamConfig) -> Self {
        let id = session.id;
        let sender = socket.sender();
        Self {
            id,
            session: Arc::new(Mutex::new(session)),
            sender,
            socket: Mutex::new(Some(socket)),
            video_queue: Arc::new(Mutex::new(ReorderQueue::new(
                config.video_window,
                config.health.stall_detection_secs,
            ))),
            audio_queue: Arc::new(Mutex::new(ReorderQueue::new(
                config.audio_window,
                config.health.stall_detection_secs,
            ))),
            health: Arc::new(Mutex::new(HealthMonitor::new(config.health.snapshot_window_secs))),
            recovery: Arc::new(Mutex::new(EmergencyRecovery::new())),
            feedback: Arc::new(Mutex::new(FeedbackSender::new())),
            receivers: Arc::new(RwLock::new(Receivers::new())),
            rumble_subscribers: Arc::new(RwLock::new(Vec::new())),
            video_codec_announced: Arc::new(AtomicBool::new(false)),
            audio_codec_announced: Arc::new(AtomicBool::new(false)),
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Attaches a downstream consumer (§4.11, §6.2). Safe to call before or
    /// after `start`; the receive task reads the current list on every
    /// dispatch.
    pub fn add_receiver(&self, receiver: Arc<dyn Receiver>) {
        self.receivers.write().entries.push(receiver);
    }

    /// Detaches every receiver matching `Arc::ptr_eq` against `receiver`.
    pub fn remove_receiver(&self, receiver: &Arc<dyn Receiver>) {
        self.receivers
            .write()
            .entries
            .retain(|r| !Arc::ptr_eq(r, receiver));
    }

    pub(super) fn dispatch_video(&self, codec: VideoCodec, access_unit: &[u8]) {
        if !self.video_codec_announced.swap(true, Ordering::SeqCst) {
            self.receivers.read().for_each(|r| r.set_video_codec(codec));
        }
        let framed = crate::codec::to_annex_b(codec, access_unit);
        self.receivers.read().for_each(|r| r.on_video_packet(&framed));
    }

    pub(super) fn dispatch_audio(&self, codec: AudioCodec, access_unit: &[u8]) {
        if !self.audio_codec_announced.swap(true, Ordering::SeqCst) {
            self.receivers.read().for_each(|r| r.set_audio_codec(codec));
        }
        self.receivers.read().for_each(|r| r.on_audio_packet(access_unit));
    }

    pub(super) fn dispatch_stream_info(&self, info: &str) {
        self.receivers.read().for_each(|r| r.on_stream_info(info));
    }

    pub(super) fn notify_wait_for_idr(&self) {
        self.receivers.read().for_each(|r| r.enter_wait_for_idr());
    }

    /// Subscribes to haptic rumble events (§6.3 `on_rumble`). Callbacks run
    /// synchronously on the receive task, so they must return quickly.
    pub fn on_rumble(&self, callback: impl Fn(RumbleEvent) + Send + Sync + 'static) {
        self.rumble_subscribers.write().push(Box::new(callback));
    }

    pub(super) fn dispatch_rumble(&self, event: RumbleEvent) {
        for callback in self.rumble_subscribers.read().iter() {
            callback(event);
        }
    }

    /// Spawns the four background tasks (§5): receive, heartbeat, feedback
    /// cadence, health check. Transitions the session to `STREAMING`. Safe
    /// to call at most once; a second call is a no-op.
    pub fn start(self: &Arc<Self>, spawner: &dyn TaskSpawner) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.lock().mark_streaming();
        super::cadence::spawn_all(Arc::clone(self), spawner);
    }

    /// Begins graceful shutdown: cancels every background task and marks the
    /// session `STOPPED`. Returns once the cancellation token is signalled;
    /// callers that need the tasks to have actually exited should await the
    /// `JoinHandle`s returned by `start` in a future revision, or simply
    /// drop this `RPStream` after a short grace period.
    pub fn stop(&self) {
        self.session.lock().begin_stopping();
        self.cancel.cancel();
        self.session.lock().mark_stopped();
    }

    /// Forces an out-of-band keyframe request (§4.11 `request_keyframe`),
    /// bypassing the reorder queue's own 1s cooldown check on the caller's
    /// side — the queue still enforces its cooldown internally.
    pub async fn request_keyframe(&self) {
        super::cadence::send_keyframe_request(&self.sender, &mut self.session.lock()).await;
    }

    /// Wipes both reorder queues (§4.11 `force_reset_reorder_queue`),
    /// discarding any in-flight partial frames.
    pub fn force_reset_reorder_queue(&self) {
        self.video_queue.lock().reset();
        self.audio_queue.lock().reset();
        self.notify_wait_for_idr();
    }

    /// Replaces the full controller state in one call (§4.11
    /// `update_controller_state`).
    pub fn update_controller_state(&self, state: ControllerState) {
        self.feedback.lock().set_state(state);
    }

    pub fn set_stick(&self, side: StickSide, axis: StickAxis, value: f32) {
        self.feedback.lock().set_stick_axis(side, axis, value);
    }

    pub fn set_stick_point(&self, side: StickSide, x: f32, y: f32) {
        self.feedback.lock().set_stick_point(side, x, y);
    }

    pub fn set_triggers(&self, l2: Option<f32>, r2: Option<f32>) {
        self.feedback.lock().set_triggers(l2, r2);
    }

    pub fn press(&self, button: u64) {
        self.feedback.lock().press(button);
    }

    pub fn release(&self, button: u64) {
        self.feedback.lock().release(button);
    }

    pub async fn tap(&self, button: u64, delay_ms: Option<u64>) {
        // Clone the `Arc<Mutex<..>>`-free snapshot path is unnecessary here:
        // `tap` sleeps mid-call, so the lock is taken twice rather than held
        // across the await point.
        self.feedback.lock().press(button);
        tokio::time::sleep(std::time::Duration::from_millis(
            delay_ms.unwrap_or(crate::protocol_constants::DEFAULT_TAP_DELAY_MS),
        ))
        .await;
        self.feedback.lock().release(button);
    }

    /// Sends one feedback payload immediately instead of waiting for the
    /// cadence task's next tick (§4.11 `send_feedback`).
    pub async fn send_feedback(&self, kind: FeedbackKind) {
        super::cadence::send_feedback_now(self, kind).await;
    }

    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.lock().snapshot()
    }

    pub(super) fn record_health(&self, outcome: FrameOutcome) {
        self.health.lock().record(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_type::HostType;
    use crate::session::SessionState;
    use crate::transport::StreamCipher;

    fn dummy_session(id: Uuid) -> RemoteSession {
        crate::session::test_support::build_session(
            id,
            "10.0.0.5".parse().unwrap(),
            HostType::Ps5,
            [0u8; 16],
            StreamCipher::new([1; 16], [2; 32]),
        )
    }

    #[tokio::test]
    async fn new_stream_has_not_started_until_start_is_called() {
        let socket = TakionSocket::connect("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let id = Uuid::new_v4();
        let session = dummy_session(id);
        let stream = Arc::new(RPStream::new(session, socket, RPStreamConfig::default()));
        assert_eq!(stream.session.lock().state(), SessionState::SessionReady);
    }

    #[tokio::test]
    async fn force_reset_clears_both_queues() {
        let socket = TakionSocket::connect("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let session = dummy_session(Uuid::new_v4());
        let stream = RPStream::new(session, socket, RPStreamConfig::default());
        stream.video_queue.lock().push_unit(crate::reassembler::FecUnit {
            frame_index: 0,
            unit_index: 0,
            units_src: 2,
            units_fec: 0,
            flags: 0,
            payload: b"A".to_vec(),
        });
        stream.force_reset_reorder_queue();
        // after reset, a fresh unit at frame 0 should still be acceptable.
        let outcomes = stream.video_queue.lock().push_unit(crate::reassembler::FecUnit {
            frame_index: 0,
            unit_index: 0,
            units_src: 1,
            units_fec: 0,
            flags: 0,
            payload: b"B".to_vec(),
        });
        assert!(!outcomes.is_empty());
    }
}
