//! Stream health monitoring and emergency recovery (§4.9).
//!
//! Grounded on `stream/cadence.rs`'s rolling pipeline-snapshot pattern
//! (`MAX_PIPELINE_SNAPSHOTS`, atomics-backed counters sampled into a
//! serializable snapshot struct) and `sonos/retry.rs`'s bounded-backoff
//! shape, generalized from a single audio delivery window into the
//! multi-stage `IDLE`/`TRIGGERED`/`RECOVERING`/`SILENT_PERIOD`/
//! `CIRCUIT_BREAKER` state machine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Outcome of a single frame delivery attempt, fed into the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Delivered,
    Dropped,
    SevereFailure,
}

struct Sample {
    at: Instant,
    outcome: FrameOutcome,
}

/// Point-in-time health snapshot (§3 Data Model: `HealthSnapshot`).
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub window_secs: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub severe_failures: u64,
    pub seconds_since_last_frame: u64,
}

/// Rolling per-session health window (§4.9 "Health monitor").
pub struct HealthMonitor {
    window: Duration,
    samples: VecDeque<Sample>,
    last_frame_at: Instant,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            samples: VecDeque::new(),
            last_frame_at: Instant::now(),
        }
    }

    pub fn record(&mut self, outcome: FrameOutcome) {
        let now = Instant::now();
        if outcome == FrameOutcome::Delivered {
            self.last_frame_at = now;
        }
        self.samples.push_back(Sample { at: now, outcome });
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let mut delivered = 0u64;
        let mut dropped = 0u64;
        let mut severe_failures = 0u64;
        for sample in &self.samples {
            match sample.outcome {
                FrameOutcome::Delivered => delivered += 1,
                FrameOutcome::Dropped => dropped += 1,
                FrameOutcome::SevereFailure => severe_failures += 1,
            }
        }
        HealthSnapshot {
            window_secs: self.window.as_secs(),
            delivered,
            dropped,
            severe_failures,
            seconds_since_last_frame: self.last_frame_at.elapsed().as_secs(),
        }
    }
}

/// Emergency recovery lifecycle state (§4.9 state machine diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryState {
    Idle,
    Triggered,
    Recovering(RecoveryStep),
    SilentPeriod,
    CircuitBreaker,
}

/// Sub-step within `RECOVERING`, each with its own timeout (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    RequestKeyframe,
    ResetStreamState,
    ReconnectTakion,
}

impl RecoveryStep {
    #[must_use]
    pub fn timeout(self) -> Duration {
        match self {
            Self::RequestKeyframe => Duration::from_secs(2),
            Self::ResetStreamState => Duration::from_secs(3),
            Self::ReconnectTakion => Duration::from_secs(12),
        }
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::RequestKeyframe => Some(Self::ResetStreamState),
            Self::ResetStreamState => Some(Self::ReconnectTakion),
            Self::ReconnectTakion => None,
        }
    }
}

const SILENT_PERIOD: Duration = Duration::from_secs(60);
const CIRCUIT_BREAKER_PERIOD: Duration = Duration::from_secs(5 * 60);
const TOTAL_RECOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const RECOVERY_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);
const CONSECUTIVE_RECOVERY_FAILURES_FOR_BREAKER: u32 = 3;

/// Per-session emergency recovery state machine. The orchestrator drives
/// this from its health-check task (§5 task 4); acquisition of the
/// recovery semaphore is modeled here as a simple `in_flight` flag rather
/// than a real `tokio::sync::Semaphore`, since at most one recovery per
/// session is ever attempted and the 100 ms "acquire" timeout degenerates
/// to an immediate check.
pub struct EmergencyRecovery {
    state: RecoveryState,
    entered_state_at: Instant,
    consecutive_recovery_failures: u32,
    in_flight: bool,
}

impl EmergencyRecovery {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RecoveryState::Idle,
            entered_state_at: Instant::now(),
            consecutive_recovery_failures: 0,
            in_flight: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    fn transition(&mut self, state: RecoveryState) {
        tracing::info!(from = ?self.state, to = ?state, "emergency recovery transition");
        self.state = state;
        self.entered_state_at = Instant::now();
    }

    /// Called by the health-check task when the reassembler signals
    /// escalation (3 consecutive severe failures, or 5 s without frames).
    /// Returns `true` if this call moved the machine into `TRIGGERED`.
    pub fn trigger(&mut self) -> bool {
        if !matches!(self.state, RecoveryState::Idle) {
            return false; // suppressed while recovering, silent, or breaker-tripped
        }
        self.transition(RecoveryState::Triggered);
        true
    }

    /// Attempts to acquire the single-recovery-in-flight semaphore with the
    /// 100 ms timeout (§4.9, §5). Returns `false` (caller retries later) if
    /// another recovery is already in flight.
    pub fn try_acquire(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        self.transition(RecoveryState::Recovering(RecoveryStep::RequestKeyframe));
        true
    }

    /// Advances to the next recovery step on that step's timeout, or fails
    /// if `ReconnectTakion` (the last step) itself timed out without an
    /// explicit success signal (§4.9: only the `Success` edge returns to
    /// `IDLE`; running out of steps is a recovery failure).
    pub fn advance_step(&mut self) {
        let RecoveryState::Recovering(step) = self.state else {
            return;
        };
        match step.next() {
            Some(next_step) => self.transition(RecoveryState::Recovering(next_step)),
            None => self.fail(),
        }
    }

    /// Recovery succeeded: reset counters and return to `IDLE`. Called
    /// directly on the `Success` edge (§4.9), not as a side effect of
    /// `advance_step`.
    pub fn succeed(&mut self) {
        self.consecutive_recovery_failures = 0;
        self.in_flight = false;
        self.transition(RecoveryState::Idle);
    }

    /// Reports a success signal from outside the recovery machine (e.g. a
    /// frame was delivered while recovery was in flight). A no-op while
    /// `IDLE`, `SILENT_PERIOD`, or `CIRCUIT_BREAKER`.
    pub fn notify_success(&mut self) {
        if matches!(self.state, RecoveryState::Triggered | RecoveryState::Recovering(_)) {
            self.succeed();
        }
    }

    /// Recovery failed: enter `SILENT_PERIOD`, or `CIRCUIT_BREAKER` after 3
    /// consecutive recovery failures.
    pub fn fail(&mut self) {
        self.in_flight = false;
        self.consecutive_recovery_failures += 1;
        if self.consecutive_recovery_failures >= CONSECUTIVE_RECOVERY_FAILURES_FOR_BREAKER {
            self.transition(RecoveryState::CircuitBreaker);
        } else {
            self.transition(RecoveryState::SilentPeriod);
        }
    }

    /// Whether the currently-recovering step's timeout, or the overall 15 s
    /// recovery budget, has elapsed — the health-check task calls this each
    /// tick and calls `fail()` if it returns `true`.
    #[must_use]
    pub fn step_timed_out(&self) -> bool {
        match self.state {
            RecoveryState::Recovering(step) => {
                self.entered_state_at.elapsed() >= step.timeout()
                    || self.entered_state_at.elapsed() >= TOTAL_RECOVERY_TIMEOUT
            }
            _ => false,
        }
    }

    /// Whether `SILENT_PERIOD`/`CIRCUIT_BREAKER` has expired and the
    /// machine should return to `IDLE`.
    #[must_use]
    pub fn cooldown_expired(&self) -> bool {
        match self.state {
            RecoveryState::SilentPeriod => self.entered_state_at.elapsed() >= SILENT_PERIOD,
            RecoveryState::CircuitBreaker => self.entered_state_at.elapsed() >= CIRCUIT_BREAKER_PERIOD,
            _ => false,
        }
    }

    /// Ticks the cooldown expiry check and returns to `IDLE` if it fired.
    /// Separate from `cooldown_expired` so callers can log/notify before
    /// calling this.
    pub fn expire_cooldown_if_ready(&mut self) {
        if self.cooldown_expired() {
            self.transition(RecoveryState::Idle);
        }
    }

    /// Resets unconditionally to `IDLE` (§4.9: "Reset on Dispose or on
    /// explicit `Reset()`").
    pub fn reset(&mut self) {
        self.consecutive_recovery_failures = 0;
        self.in_flight = false;
        self.transition(RecoveryState::Idle);
    }
}

impl Default for EmergencyRecovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_counts_outcomes_within_window() {
        let mut monitor = HealthMonitor::new(10);
        monitor.record(FrameOutcome::Delivered);
        monitor.record(FrameOutcome::Dropped);
        monitor.record(FrameOutcome::SevereFailure);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.severe_failures, 1);
    }

    #[test]
    fn trigger_is_suppressed_while_not_idle() {
        let mut recovery = EmergencyRecovery::new();
        assert!(recovery.trigger());
        assert!(!recovery.trigger(), "a second trigger while TRIGGERED must be suppressed");
    }

    #[test]
    fn recovery_advances_through_all_three_steps_then_fails_without_a_success_signal() {
        let mut recovery = EmergencyRecovery::new();
        recovery.trigger();
        assert!(recovery.try_acquire());
        assert_eq!(
            recovery.state(),
            RecoveryState::Recovering(RecoveryStep::RequestKeyframe)
        );
        recovery.advance_step();
        assert_eq!(
            recovery.state(),
            RecoveryState::Recovering(RecoveryStep::ResetStreamState)
        );
        recovery.advance_step();
        assert_eq!(
            recovery.state(),
            RecoveryState::Recovering(RecoveryStep::ReconnectTakion)
        );
        // Running out of steps without an explicit success signal is a
        // recovery failure, not a success (§4.9).
        recovery.advance_step();
        assert_eq!(recovery.state(), RecoveryState::SilentPeriod);
    }

    #[test]
    fn notify_success_returns_to_idle_from_any_recovering_step() {
        let mut recovery = EmergencyRecovery::new();
        recovery.trigger();
        recovery.try_acquire();
        recovery.advance_step(); // ResetStreamState
        recovery.notify_success();
        assert_eq!(recovery.state(), RecoveryState::Idle);
    }

    #[test]
    fn notify_success_is_a_no_op_while_idle() {
        let mut recovery = EmergencyRecovery::new();
        recovery.notify_success();
        assert_eq!(recovery.state(), RecoveryState::Idle);
    }

    #[test]
    fn three_consecutive_failures_trip_the_circuit_breaker() {
        let mut recovery = EmergencyRecovery::new();
        for _ in 0..2 {
            recovery.trigger();
            recovery.try_acquire();
            recovery.fail();
            assert_eq!(recovery.state(), RecoveryState::SilentPeriod);
            // Fast-forward past SILENT_PERIOD without resetting the
            // consecutive-failure counter, the way a real 60s wait would.
            recovery.entered_state_at = Instant::now() - SILENT_PERIOD;
            recovery.expire_cooldown_if_ready();
            assert_eq!(recovery.state(), RecoveryState::Idle);
        }
        recovery.trigger();
        recovery.try_acquire();
        recovery.fail();
        assert_eq!(recovery.state(), RecoveryState::CircuitBreaker);
    }

    #[test]
    fn second_acquire_while_in_flight_is_rejected() {
        let mut recovery = EmergencyRecovery::new();
        recovery.trigger();
        assert!(recovery.try_acquire());
        assert!(!recovery.try_acquire());
    }
}
