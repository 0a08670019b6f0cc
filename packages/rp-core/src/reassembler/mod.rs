//! Packet reassembler + Reed-Solomon FEC (§4.7).
//!
//! Grounded on `stream/manager.rs`'s `StreamRegistry` bookkeeping shape
//! (per-key state map, arrival timestamps, eviction-by-window), generalized
//! from one audio stream's registry entry to a per-frame reassembly slot
//! with Reed-Solomon recovery layered on top.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::Serialize;

use crate::error::ErrorCode;

/// Reassembly failures (§4.7, §4.12).
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "kind")]
pub enum ReassemblyError {
    #[error("reed-solomon shard construction failed: {0}")]
    ShardSetup(String),
    #[error("reed-solomon reconstruction failed")]
    ReconstructionFailed,
}

impl ErrorCode for ReassemblyError {
    fn code(&self) -> &'static str {
        match self {
            Self::ShardSetup(_) => "shard_setup_failed",
            Self::ReconstructionFailed => "reconstruction_failed",
        }
    }
}

/// One decoded Takion video/audio payload (§4.7 "Input").
#[derive(Debug, Clone)]
pub struct FecUnit {
    pub frame_index: u32,
    pub unit_index: u16,
    pub units_src: u8,
    pub units_fec: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

/// Fixed header length of one Takion video/audio payload, before the unit
/// body (§4.7 "Input"): `frame_index(4) + unit_index(2) + units_src(1) +
/// units_fec(1) + flags(1)`.
pub const FEC_UNIT_HEADER_LEN: usize = 9;

impl FecUnit {
    /// Parses one decoded Takion video/audio payload into a `FecUnit`
    /// (§4.7 "Input"). Returns `None` if the payload is shorter than the
    /// fixed header.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < FEC_UNIT_HEADER_LEN {
            return None;
        }
        Some(Self {
            frame_index: u32::from_be_bytes(payload[0..4].try_into().ok()?),
            unit_index: u16::from_be_bytes(payload[4..6].try_into().ok()?),
            units_src: payload[6],
            units_fec: payload[7],
            flags: payload[8],
            payload: payload[FEC_UNIT_HEADER_LEN..].to_vec(),
        })
    }
}

/// Result of feeding one unit into the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Emitted { frame_index: u32, access_unit: Vec<u8> },
    Dropped { frame_index: u32 },
}

fn align_up_8(len: usize) -> usize {
    (len + 7) & !7
}

/// `(a - b) as i32 < 0`, the modular "older than" comparison (§4.7).
#[must_use]
pub fn is_older(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

// Frames are stored in a `BTreeMap<u32, FrameState>` keyed by `frame_index`
// and drained in key order, so the §4.7 "numeric tie-break" (lower
// `frame_index` wins on equal arrival timestamp) falls out of that ordering
// for free — ties on arrival time never change emission order.
struct FrameState {
    units_src: u8,
    units_fec: u8,
    slots: Vec<Option<Vec<u8>>>,
    received_count: u32,
}

impl FrameState {
    fn new(units_src: u8, units_fec: u8) -> Self {
        Self {
            units_src,
            units_fec,
            slots: vec![None; usize::from(units_src) + usize::from(units_fec)],
            received_count: 0,
        }
    }

    fn insert(&mut self, unit_index: u16, payload: Vec<u8>) {
        let idx = usize::from(unit_index);
        if idx < self.slots.len() && self.slots[idx].is_none() {
            self.slots[idx] = Some(payload);
            self.received_count += 1;
        }
    }

    fn is_complete(&self) -> bool {
        self.slots[..usize::from(self.units_src)].iter().all(Option::is_some)
    }

    fn missing_source_count(&self) -> usize {
        self.slots[..usize::from(self.units_src)]
            .iter()
            .filter(|s| s.is_none())
            .count()
    }

    /// Attempts Reed-Solomon recovery of the missing source slots. Returns
    /// `Ok(true)` if recovery filled in every missing source slot.
    fn try_recover(&mut self) -> Result<bool, ReassemblyError> {
        let missing = self.missing_source_count();
        if missing == 0 {
            return Ok(true);
        }
        if self.received_count < self.units_src as u32 {
            return Ok(false);
        }

        let max_len = self.slots.iter().flatten().map(Vec::len).max().unwrap_or(0);
        let shard_len = align_up_8(max_len).max(8);

        let rs = ReedSolomon::new(usize::from(self.units_src), usize::from(self.units_fec))
            .map_err(|e| ReassemblyError::ShardSetup(format!("{e:?}")))?;

        let mut shards: Vec<Option<Vec<u8>>> = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|data| {
                    let mut padded = data.clone();
                    padded.resize(shard_len, 0);
                    padded
                })
            })
            .collect();

        rs.reconstruct(&mut shards)
            .map_err(|_| ReassemblyError::ReconstructionFailed)?;

        for (idx, shard) in shards.into_iter().enumerate() {
            if idx < usize::from(self.units_src) && self.slots[idx].is_none() {
                let mut bytes = shard.ok_or(ReassemblyError::ReconstructionFailed)?;
                while bytes.last() == Some(&0) {
                    bytes.pop();
                }
                self.slots[idx] = Some(bytes);
            }
        }
        Ok(true)
    }

    fn concat_source_units(&self) -> Vec<u8> {
        self.slots[..usize::from(self.units_src)]
            .iter()
            .flat_map(|s| s.as_deref().unwrap_or(&[]).iter().copied())
            .collect()
    }
}

/// Per-session frame reorder window with FEC recovery and keyframe-request
/// cooldown bookkeeping (§4.7, §4.11 `request_keyframe`).
pub struct ReorderQueue {
    window_size: u32,
    next_to_emit: u32,
    frames: BTreeMap<u32, FrameState>,
    consecutive_severe_failures: u32,
    last_frame_at: Instant,
    last_keyframe_request: Option<Instant>,
    stall_detection: Duration,
}

const KEYFRAME_COOLDOWN: Duration = Duration::from_secs(1);
const STALL_ESCALATION_FAILURES: u32 = 3;

impl ReorderQueue {
    /// `stall_detection_secs` is the source-ambiguous 5-10s threshold from
    /// §9 open question #4, exposed as a config value (`HealthConfig::
    /// stall_detection_secs`) rather than hardcoded.
    #[must_use]
    pub fn new(window_size: u32, stall_detection_secs: u64) -> Self {
        let now = Instant::now();
        Self {
            window_size,
            next_to_emit: 0,
            frames: BTreeMap::new(),
            consecutive_severe_failures: 0,
            last_frame_at: now,
            last_keyframe_request: None,
            stall_detection: Duration::from_secs(stall_detection_secs),
        }
    }

    /// Feeds one decoded unit into the queue, returning every frame outcome
    /// (emission or drop) this unit's arrival produced, in emission order.
    pub fn push_unit(&mut self, unit: FecUnit) -> Vec<FrameOutcome> {
        if is_older(unit.frame_index, self.next_to_emit) {
            return Vec::new(); // below window head: discard as late
        }

        let mut outcomes = Vec::new();
        if unit.frame_index.wrapping_sub(self.next_to_emit) > self.window_size {
            let new_head = unit.frame_index - self.window_size;
            while self.next_to_emit < new_head {
                self.frames.remove(&self.next_to_emit);
                outcomes.push(FrameOutcome::Dropped {
                    frame_index: self.next_to_emit,
                });
                self.next_to_emit += 1;
            }
        }

        let frame = self
            .frames
            .entry(unit.frame_index)
            .or_insert_with(|| FrameState::new(unit.units_src, unit.units_fec));
        frame.insert(unit.unit_index, unit.payload);

        outcomes.extend(self.drain_ready());
        outcomes
    }

    fn drain_ready(&mut self) -> Vec<FrameOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let Some(frame) = self.frames.get_mut(&self.next_to_emit) else {
                break;
            };
            if frame.is_complete() {
                let access_unit = frame.concat_source_units();
                self.frames.remove(&self.next_to_emit);
                outcomes.push(FrameOutcome::Emitted {
                    frame_index: self.next_to_emit,
                    access_unit,
                });
                self.last_frame_at = Instant::now();
                self.consecutive_severe_failures = 0;
                self.next_to_emit += 1;
                continue;
            }
            match frame.try_recover() {
                Ok(true) => {
                    let access_unit = frame.concat_source_units();
                    self.frames.remove(&self.next_to_emit);
                    outcomes.push(FrameOutcome::Emitted {
                        frame_index: self.next_to_emit,
                        access_unit,
                    });
                    self.last_frame_at = Instant::now();
                    self.consecutive_severe_failures = 0;
                    self.next_to_emit += 1;
                }
                Ok(false) => break, // still waiting on more units
                Err(_) => {
                    self.consecutive_severe_failures += 1;
                    self.frames.remove(&self.next_to_emit);
                    outcomes.push(FrameOutcome::Dropped {
                        frame_index: self.next_to_emit,
                    });
                    self.next_to_emit += 1;
                }
            }
        }
        outcomes
    }

    /// Wipes the window entirely (§4.11 `force_reset_reorder_queue`).
    pub fn reset(&mut self) {
        self.frames.clear();
        self.consecutive_severe_failures = 0;
        self.last_frame_at = Instant::now();
    }

    /// Whether a keyframe request should fire now, honoring the 1-second
    /// cooldown (§4.7 "Keyframe policy"). Marks the cooldown as consumed.
    pub fn should_request_keyframe(&mut self) -> bool {
        let now = Instant::now();
        let allowed = self
            .last_keyframe_request
            .map_or(true, |t| now.duration_since(t) >= KEYFRAME_COOLDOWN);
        if allowed {
            self.last_keyframe_request = Some(now);
        }
        allowed
    }

    /// Whether the stall/failure counters call for escalation to emergency
    /// recovery: 3 consecutive severe failures, or `stall_detection` elapsed
    /// without a frame (§4.9, §9 open question #4).
    #[must_use]
    pub fn should_escalate(&self) -> bool {
        self.consecutive_severe_failures >= STALL_ESCALATION_FAILURES
            || self.last_frame_at.elapsed() >= self.stall_detection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(frame_index: u32, unit_index: u16, units_src: u8, payload: &[u8]) -> FecUnit {
        FecUnit {
            frame_index,
            unit_index,
            units_src,
            units_fec: 2,
            flags: 0,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn fec_unit_parse_rejects_short_payload() {
        assert!(FecUnit::parse(&[0u8; 8]).is_none());
    }

    #[test]
    fn fec_unit_parse_splits_header_and_body() {
        let mut payload = vec![0, 0, 0, 7, 0, 1, 4, 2, 0];
        payload.extend_from_slice(b"DATA");
        let parsed = FecUnit::parse(&payload).unwrap();
        assert_eq!(parsed.frame_index, 7);
        assert_eq!(parsed.unit_index, 1);
        assert_eq!(parsed.units_src, 4);
        assert_eq!(parsed.units_fec, 2);
        assert_eq!(parsed.flags, 0);
        assert_eq!(parsed.payload, b"DATA");
    }

    #[test]
    fn emits_frame_once_all_source_units_present() {
        let mut q = ReorderQueue::new(16, 5);
        assert!(q.push_unit(unit(0, 0, 2, b"AAAA")).is_empty());
        let outcomes = q.push_unit(unit(0, 1, 2, b"BBBB"));
        assert_eq!(
            outcomes,
            vec![FrameOutcome::Emitted {
                frame_index: 0,
                access_unit: b"AAAABBBB".to_vec()
            }]
        );
    }

    #[test]
    fn late_frame_below_head_is_discarded() {
        let mut q = ReorderQueue::new(16, 5);
        q.push_unit(unit(0, 0, 1, b"A"));
        q.push_unit(unit(0, 0, 1, b"A")); // frame 0 already emitted/head advanced
        let late = q.push_unit(unit(0, 0, 1, b"late"));
        assert!(late.is_empty());
    }

    #[test]
    fn frame_beyond_window_advances_head_and_drops_skipped() {
        let mut q = ReorderQueue::new(4, 5);
        let outcomes = q.push_unit(unit(10, 0, 1, b"A"));
        assert!(outcomes.iter().any(|o| matches!(o, FrameOutcome::Dropped { .. })));
    }

    #[test]
    fn fec_recovers_a_missing_source_shard() {
        let mut q = ReorderQueue::new(16, 5);
        // 2 source + 2 parity shards, each 8 bytes after padding.
        let src0 = b"AAAAAAAA".to_vec();
        let src1 = b"BBBBBBBB".to_vec();
        let rs = ReedSolomon::new(2, 2).unwrap();
        let mut shards: Vec<Vec<u8>> = vec![src0.clone(), src1.clone(), vec![0; 8], vec![0; 8]];
        rs.encode(&mut shards).unwrap();

        // Source shard 0 is lost; source 1 plus both parity shards arrive.
        q.push_unit(unit(0, 1, 2, &src1));
        let outcomes = q.push_unit(FecUnit {
            frame_index: 0,
            unit_index: 2,
            units_src: 2,
            units_fec: 2,
            flags: 0,
            payload: shards[2].clone(),
        });
        assert!(outcomes.is_empty());
        let outcomes = q.push_unit(FecUnit {
            frame_index: 0,
            unit_index: 3,
            units_src: 2,
            units_fec: 2,
            flags: 0,
            payload: shards[3].clone(),
        });
        assert_eq!(
            outcomes,
            vec![FrameOutcome::Emitted {
                frame_index: 0,
                access_unit: [src0, src1].concat(),
            }]
        );
    }

    #[test]
    fn is_older_handles_wraparound() {
        assert!(is_older(5, 10));
        assert!(!is_older(10, 5));
        assert!(is_older(u32::MAX, 0));
    }

    #[test]
    fn keyframe_request_respects_cooldown() {
        let mut q = ReorderQueue::new(16, 5);
        assert!(q.should_request_keyframe());
        assert!(!q.should_request_keyframe());
    }

    #[test]
    fn stall_detection_threshold_is_configurable_not_hardcoded() {
        let q = ReorderQueue::new(16, 0);
        // With a 0s threshold, any elapsed time at all calls for escalation.
        std::thread::sleep(Duration::from_millis(5));
        assert!(q.should_escalate());
    }
}
