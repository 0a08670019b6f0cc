//! The inward `Receiver` contract (§6.2) and its no-op default.
//!
//! Grounded on `events::EventEmitter`'s trait-injection shape (a small
//! `Send + Sync` trait the orchestrator calls into, with a no-op
//! implementation used in tests and before a real consumer attaches),
//! generalized from Sonos playback events to decoded video/audio frames.

use crate::codec::{AudioCodec, VideoCodec};

/// Capability set a downstream consumer (e.g. a WebRTC bridge) implements
/// to receive decoded frames and codec announcements (§4.11, §6.2).
///
/// Implementations must be safe to call from the transport thread; any
/// heavy work (encoding, network I/O) must be moved off that thread by the
/// receiver itself — the orchestrator never blocks its receive task
/// waiting on a receiver callback to finish more than it takes to enqueue
/// work elsewhere.
pub trait Receiver: Send + Sync {
    /// One reassembled, Annex-B-framed video access unit.
    fn on_video_packet(&self, access_unit: &[u8]) {
        let _ = access_unit;
    }

    /// One reassembled audio access unit (Opus, delivered as-is).
    fn on_audio_packet(&self, access_unit: &[u8]) {
        let _ = access_unit;
    }

    /// Informational stream metadata (resolution/fps/bitrate) as soon as
    /// it is negotiated.
    fn on_stream_info(&self, info: &str) {
        let _ = info;
    }

    /// Called exactly once, the first time the codec is detected from the
    /// negotiated `stream_type` (§4.8).
    fn set_video_codec(&self, codec: VideoCodec) {
        let _ = codec;
    }

    /// Called exactly once, on the first audio packet.
    fn set_audio_codec(&self, codec: AudioCodec) {
        let _ = codec;
    }

    /// Signals that the stream has requested an IDR and the receiver
    /// should discard frames until a new keyframe arrives.
    fn enter_wait_for_idr(&self) {}
}

/// Default receiver: every callback is a no-op. Used in tests and before
/// `add_receiver` attaches a real consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReceiver;

impl Receiver for NoopReceiver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_receiver_accepts_every_callback_without_panicking() {
        let receiver = NoopReceiver;
        receiver.on_video_packet(b"data");
        receiver.on_audio_packet(b"data");
        receiver.on_stream_info("1080p60");
        receiver.set_video_codec(VideoCodec::H264);
        receiver.set_audio_codec(AudioCodec::Opus);
        receiver.enter_wait_for_idr();
    }
}
