//! Feedback sender: controller state + event cadence back to the console
//! (§4.10).
//!
//! Grounded on `stream/cadence.rs`'s fixed-cadence loop shape (`interval` +
//! `MissedTickBehavior`, dirty-flag-driven early wake), generalized from a
//! continuous audio cadence to the dual min/max throttle described in §4.10.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::protocol_constants::{
    DEFAULT_TAP_DELAY_MS, FEEDBACK_EVENT_BUFFER_CAPACITY, FEEDBACK_STATE_MAX_INTERVAL_MS,
    FEEDBACK_STATE_MIN_INTERVAL_MS,
};

/// Controller analog stick side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StickSide {
    Left,
    Right,
}

/// Controller analog stick axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StickAxis {
    X,
    Y,
}

/// The 18 PlayStation button identifiers exposed at the outward controller
/// interface (§6.3). Each maps to one bit of the `ControllerState` bitmask
/// that `FeedbackSender::press`/`release` operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Cross,
    Circle,
    Square,
    Triangle,
    L1,
    R1,
    L2,
    R2,
    L3,
    R3,
    Options,
    Share,
    Ps,
    Touchpad,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    /// Bit position within the controller state bitmask.
    #[must_use]
    pub const fn bit(self) -> u64 {
        1 << (self as u64)
    }
}

fn clamp_unit(v: f32) -> f32 {
    v.clamp(-1.0, 1.0)
}

fn scale_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Motion sensor readings carried alongside the button/stick state (§4.10
/// "Idle default").
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Accel {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Orientation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Full controller state (§3 Data Model: `ControllerState`). Idle default
/// matches §4.10 exactly: zeroed buttons/sticks/triggers, gravity-only
/// accelerometer, identity orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerState {
    pub buttons: u64,
    pub l2: u8,
    pub r2: u8,
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub accel: Accel,
    pub orient: Orientation,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            buttons: 0,
            l2: 0,
            r2: 0,
            left_x: 0.0,
            left_y: 0.0,
            right_x: 0.0,
            right_y: 0.0,
            accel: Accel { x: 0.0, y: 0.0, z: 1.0 },
            orient: Orientation {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
        }
    }
}

/// One FEEDBACK_EVENT entry (§4.10: button press/release or "tap").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedbackEvent {
    Press { button: u64 },
    Release { button: u64 },
}

/// A haptic rumble event delivered from the console to any number of
/// subscribers (§3 Data Model: `RumbleEvent`, §6.3 `on_rumble`). PS5-only
/// intensity fields default to 0 when decoding a payload from older
/// firmware that omits them (DESIGN.md open question #5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RumbleEvent {
    /// Reserved/unidentified byte carried in the wire payload verbatim.
    pub unknown: u8,
    pub raw_left: u8,
    pub raw_right: u8,
    pub adjusted_left: u8,
    pub adjusted_right: u8,
    pub multiplier: f32,
    #[serde(default)]
    pub ps5_rumble_intensity: u8,
    #[serde(default)]
    pub ps5_trigger_intensity: u8,
    pub timestamp_ms: u64,
}

/// Newest-first, capacity-5 ring buffer (§4.10 "Event buffer").
struct EventBuffer {
    entries: std::collections::VecDeque<FeedbackEvent>,
}

impl EventBuffer {
    fn new() -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(FEEDBACK_EVENT_BUFFER_CAPACITY),
        }
    }

    fn push(&mut self, event: FeedbackEvent) {
        self.entries.push_front(event);
        while self.entries.len() > FEEDBACK_EVENT_BUFFER_CAPACITY {
            self.entries.pop_back();
        }
    }

    /// Drains the buffer atomically, newest-first, for one FEEDBACK_EVENT
    /// transmission.
    fn drain(&mut self) -> Vec<FeedbackEvent> {
        self.entries.drain(..).collect()
    }
}

/// Owns the controller state, the pending-event buffer, and the cadence
/// signal the orchestrator's feedback task wakes on (§5 task 3).
///
/// `RemoteSession` is shared read-only between the orchestrator and this
/// sender (§3 Ownership); the sender only mutates its own buffered state.
pub struct FeedbackSender {
    state: ControllerState,
    dirty: bool,
    events: EventBuffer,
    event_seq: u16,
    /// Signalled by `set_stick`/`set_triggers`/button calls; the cadence
    /// task awaits this with a 16 ms ceiling timeout (§4.10, §5). Kept
    /// behind an `Arc` (rather than a bare `Notify`) so the cadence task
    /// can hold its own clone and `.await` it without needing to keep the
    /// `FeedbackSender`'s lock held across the await point.
    wake: Arc<Notify>,
}

impl FeedbackSender {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ControllerState::default(),
            dirty: false,
            events: EventBuffer::new(),
            event_seq: 0,
            wake: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Returns a cloned handle to the cadence-wake signal (§4.10, §5 task 3).
    #[must_use]
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
        self.wake.notify_one();
    }

    pub fn set_stick_axis(&mut self, side: StickSide, axis: StickAxis, value: f32) {
        let value = clamp_unit(value);
        match (side, axis) {
            (StickSide::Left, StickAxis::X) => self.state.left_x = value,
            (StickSide::Left, StickAxis::Y) => self.state.left_y = value,
            (StickSide::Right, StickAxis::X) => self.state.right_x = value,
            (StickSide::Right, StickAxis::Y) => self.state.right_y = value,
        }
        self.mark_dirty();
    }

    pub fn set_stick_point(&mut self, side: StickSide, x: f32, y: f32) {
        let (x, y) = (clamp_unit(x), clamp_unit(y));
        match side {
            StickSide::Left => {
                self.state.left_x = x;
                self.state.left_y = y;
            }
            StickSide::Right => {
                self.state.right_x = x;
                self.state.right_y = y;
            }
        }
        self.mark_dirty();
    }

    /// Replaces the entire controller state wholesale (§4.11
    /// `update_controller_state`), e.g. when an external input source
    /// publishes a fully-formed snapshot rather than incremental deltas.
    pub fn set_state(&mut self, state: ControllerState) {
        self.state = state;
        self.mark_dirty();
    }

    pub fn set_triggers(&mut self, l2: Option<f32>, r2: Option<f32>) {
        if let Some(l2) = l2 {
            self.state.l2 = scale_to_u8(l2);
        }
        if let Some(r2) = r2 {
            self.state.r2 = scale_to_u8(r2);
        }
        self.mark_dirty();
    }

    pub fn press(&mut self, button: u64) {
        self.state.buttons |= button;
        self.events.push(FeedbackEvent::Press { button });
        self.mark_dirty();
    }

    pub fn release(&mut self, button: u64) {
        self.state.buttons &= !button;
        self.events.push(FeedbackEvent::Release { button });
        self.mark_dirty();
    }

    /// `tap(button, delay_ms)`: press, sleep `delay_ms` (default 100 ms),
    /// release (§4.10 "Button semantics").
    pub async fn tap(&mut self, button: u64, delay_ms: Option<u64>) {
        self.press(button);
        tokio::time::sleep(Duration::from_millis(delay_ms.unwrap_or(DEFAULT_TAP_DELAY_MS))).await;
        self.release(button);
    }

    /// Drains pending events for one FEEDBACK_EVENT transmission, advancing
    /// the monotonic message sequence.
    pub fn drain_events(&mut self) -> Option<(u16, Vec<FeedbackEvent>)> {
        if self.events.entries.is_empty() {
            return None;
        }
        let seq = self.event_seq;
        self.event_seq = self.event_seq.wrapping_add(1);
        Some((seq, self.events.drain()))
    }

    /// Clears the dirty flag after a FEEDBACK_STATE send; called by the
    /// cadence task whether it sent because of dirtiness or the ceiling.
    pub fn clear_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for FeedbackSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimum/maximum FEEDBACK_STATE cadence bounds (§4.10).
#[must_use]
pub fn min_interval() -> Duration {
    Duration::from_millis(FEEDBACK_STATE_MIN_INTERVAL_MS)
}

#[must_use]
pub fn max_interval() -> Duration {
    Duration::from_millis(FEEDBACK_STATE_MAX_INTERVAL_MS)
}

/// Encodes one FEEDBACK_STATE payload (§4.4, §4.10, §6.3 round-trip
/// invariant): buttons, trigger bytes, sticks scaled to `i16`, then the
/// motion sensor floats, all big-endian.
pub const STATE_WIRE_LEN: usize = 46;

pub fn encode_state(state: &ControllerState) -> Vec<u8> {
    let mut out = Vec::with_capacity(STATE_WIRE_LEN);
    out.extend_from_slice(&state.buttons.to_be_bytes());
    out.push(state.l2);
    out.push(state.r2);
    for axis in [state.left_x, state.left_y, state.right_x, state.right_y] {
        out.extend_from_slice(&stick_to_i16(axis).to_be_bytes());
    }
    for f in [
        state.accel.x,
        state.accel.y,
        state.accel.z,
        state.orient.x,
        state.orient.y,
        state.orient.z,
        state.orient.w,
    ] {
        out.extend_from_slice(&f.to_be_bytes());
    }
    out
}

/// Decodes a FEEDBACK_STATE payload back into a `ControllerState` (used by
/// tests exercising the round-trip invariant in §8).
#[must_use]
pub fn decode_state(payload: &[u8]) -> Option<ControllerState> {
    if payload.len() < STATE_WIRE_LEN {
        return None;
    }
    let buttons = u64::from_be_bytes(payload[0..8].try_into().ok()?);
    let l2 = payload[8];
    let r2 = payload[9];
    let left_x = i16_to_stick(i16::from_be_bytes(payload[10..12].try_into().ok()?));
    let left_y = i16_to_stick(i16::from_be_bytes(payload[12..14].try_into().ok()?));
    let right_x = i16_to_stick(i16::from_be_bytes(payload[14..16].try_into().ok()?));
    let right_y = i16_to_stick(i16::from_be_bytes(payload[16..18].try_into().ok()?));
    let f = |o: usize| f32::from_be_bytes(payload[o..o + 4].try_into().unwrap());
    Some(ControllerState {
        buttons,
        l2,
        r2,
        left_x,
        left_y,
        right_x,
        right_y,
        accel: Accel { x: f(18), y: f(22), z: f(26) },
        orient: Orientation { x: f(30), y: f(34), z: f(38), w: f(42) },
    })
}

fn stick_to_i16(v: f32) -> i16 {
    (clamp_unit(v) * i16::MAX as f32) as i16
}

fn i16_to_stick(v: i16) -> f32 {
    v as f32 / i16::MAX as f32
}

/// Wire length of a `RumbleEvent` payload without the PS5-only intensity
/// bytes (older firmware).
const RUMBLE_WIRE_LEN_BASE: usize = 17;
/// Wire length with the two PS5-only intensity bytes present.
const RUMBLE_WIRE_LEN_PS5: usize = RUMBLE_WIRE_LEN_BASE + 2;

/// Decodes a console-originated rumble payload (§3 Data Model: `RumbleEvent`,
/// §6.3 `on_rumble`). The PS5 intensity bytes are only present on PS5
/// firmware; absent on a shorter payload, in which case they default to 0
/// (DESIGN.md open question #5).
#[must_use]
pub fn decode_rumble(payload: &[u8]) -> Option<RumbleEvent> {
    if payload.len() != RUMBLE_WIRE_LEN_BASE && payload.len() != RUMBLE_WIRE_LEN_PS5 {
        return None;
    }
    let unknown = payload[0];
    let raw_left = payload[1];
    let raw_right = payload[2];
    let adjusted_left = payload[3];
    let adjusted_right = payload[4];
    let multiplier = f32::from_be_bytes(payload[5..9].try_into().ok()?);
    let (ps5_rumble_intensity, ps5_trigger_intensity, ts_offset) =
        if payload.len() == RUMBLE_WIRE_LEN_PS5 {
            (payload[9], payload[10], 11)
        } else {
            (0, 0, 9)
        };
    let timestamp_ms = u64::from_be_bytes(payload[ts_offset..ts_offset + 8].try_into().ok()?);
    Some(RumbleEvent {
        unknown,
        raw_left,
        raw_right,
        adjusted_left,
        adjusted_right,
        multiplier,
        ps5_rumble_intensity,
        ps5_trigger_intensity,
        timestamp_ms,
    })
}

/// Encodes one FEEDBACK_EVENT payload: a 2-byte sequence number followed
/// by up to 5 `(is_press: u8, button: u64)` entries, newest-first (§4.4,
/// §4.10 "Event buffer").
#[must_use]
pub fn encode_events(seq: u16, events: &[FeedbackEvent]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + events.len() * 9);
    out.extend_from_slice(&seq.to_be_bytes());
    for event in events {
        let (is_press, button) = match *event {
            FeedbackEvent::Press { button } => (1u8, button),
            FeedbackEvent::Release { button } => (0u8, button),
        };
        out.push(is_press);
        out.extend_from_slice(&button.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_default_matches_spec() {
        let state = ControllerState::default();
        assert_eq!(state.buttons, 0);
        assert_eq!(state.accel, Accel { x: 0.0, y: 0.0, z: 1.0 });
        assert_eq!(
            state.orient,
            Orientation {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0
            }
        );
    }

    #[test]
    fn stick_axis_clamps_to_unit_range() {
        let mut sender = FeedbackSender::new();
        sender.set_stick_axis(StickSide::Left, StickAxis::X, 5.0);
        assert_eq!(sender.state().left_x, 1.0);
        sender.set_stick_axis(StickSide::Left, StickAxis::X, -5.0);
        assert_eq!(sender.state().left_x, -1.0);
    }

    #[test]
    fn triggers_scale_to_u8() {
        let mut sender = FeedbackSender::new();
        sender.set_triggers(Some(1.0), Some(0.5));
        assert_eq!(sender.state().l2, 255);
        assert_eq!(sender.state().r2, 128);
    }

    #[test]
    fn event_buffer_keeps_newest_five_front_first() {
        let mut sender = FeedbackSender::new();
        for button in 0..7u64 {
            sender.press(button);
        }
        let (_, events) = sender.drain_events().unwrap();
        assert_eq!(events.len(), FEEDBACK_EVENT_BUFFER_CAPACITY);
        assert_eq!(events[0], FeedbackEvent::Press { button: 6 });
    }

    #[test]
    fn drain_events_returns_none_when_empty() {
        let mut sender = FeedbackSender::new();
        assert!(sender.drain_events().is_none());
    }

    #[test]
    fn press_and_release_mark_dirty() {
        let mut sender = FeedbackSender::new();
        assert!(!sender.is_dirty());
        sender.press(1);
        assert!(sender.is_dirty());
        assert!(sender.clear_dirty());
        assert!(!sender.is_dirty());
    }

    #[tokio::test(start_paused = true)]
    async fn tap_presses_then_releases_after_delay() {
        let mut sender = FeedbackSender::new();
        let tap = sender.tap(1, Some(50));
        tokio::pin!(tap);

        tokio::select! {
            _ = &mut tap => panic!("tap resolved before its delay elapsed"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(sender.state().buttons & 1, 1);

        tokio::time::advance(Duration::from_millis(60)).await;
        tap.await;
        assert_eq!(sender.state().buttons & 1, 0);
    }

    #[test]
    fn state_wire_round_trips_buttons_and_sticks() {
        let mut sender = FeedbackSender::new();
        sender.press(Button::Cross.bit());
        sender.set_stick_point(StickSide::Left, 0.5, -0.5);
        sender.set_triggers(Some(1.0), Some(0.0));

        let wire = encode_state(&sender.state());
        let decoded = decode_state(&wire).unwrap();

        assert_eq!(decoded.buttons, sender.state().buttons);
        assert_eq!(decoded.l2, 255);
        assert_eq!(decoded.r2, 0);
        assert!((decoded.left_x - 0.5).abs() < 0.001);
        assert!((decoded.left_y - (-0.5)).abs() < 0.001);
    }

    #[test]
    fn rumble_without_ps5_fields_defaults_intensity_to_zero() {
        let mut payload = vec![0u8; RUMBLE_WIRE_LEN_BASE];
        payload[1] = 200; // raw_left
        payload[2] = 100; // raw_right
        payload[5..9].copy_from_slice(&1.0f32.to_be_bytes());
        payload[9..17].copy_from_slice(&42u64.to_be_bytes());
        let rumble = decode_rumble(&payload).unwrap();
        assert_eq!(rumble.raw_left, 200);
        assert_eq!(rumble.raw_right, 100);
        assert_eq!(rumble.ps5_rumble_intensity, 0);
        assert_eq!(rumble.ps5_trigger_intensity, 0);
        assert_eq!(rumble.timestamp_ms, 42);
    }

    #[test]
    fn rumble_with_ps5_fields_preserves_intensity() {
        let mut payload = vec![0u8; RUMBLE_WIRE_LEN_PS5];
        payload[9] = 7;
        payload[10] = 9;
        payload[11..19].copy_from_slice(&100u64.to_be_bytes());
        let rumble = decode_rumble(&payload).unwrap();
        assert_eq!(rumble.ps5_rumble_intensity, 7);
        assert_eq!(rumble.ps5_trigger_intensity, 9);
        assert_eq!(rumble.timestamp_ms, 100);
    }

    #[test]
    fn rumble_with_wrong_length_is_rejected() {
        assert!(decode_rumble(&[0u8; 5]).is_none());
    }

    #[test]
    fn event_wire_encodes_sequence_and_entries() {
        let wire = encode_events(7, &[FeedbackEvent::Press { button: Button::Circle.bit() }]);
        assert_eq!(u16::from_be_bytes([wire[0], wire[1]]), 7);
        assert_eq!(wire[2], 1); // is_press
    }
}
