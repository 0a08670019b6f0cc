//! Per-receiver bounded dispatch queues (§4.11 `Receiver` contract, §5
//! "Shared resources", §9 REDESIGN FLAGS: "Multiple receivers called
//! synchronously from the transport hot path: enforce a `try_send`
//! contract; if the receiver's queue is full, drop and count").
//!
//! Grounded on `services/stream_coordinator.rs`'s receiver-fan-out pattern,
//! generalized so the transport hot path never calls a `Receiver` callback
//! directly: each attached receiver gets its own bounded channel and a
//! dedicated drain task, and the hot path only ever does a non-blocking
//! `try_send` into that channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{AudioCodec, VideoCodec};
use crate::receiver::Receiver;
use crate::runtime::TaskSpawner;

/// Depth of each receiver's dispatch queue. A receiver that falls this far
/// behind starts losing frames rather than stalling the receive task.
const RECEIVER_QUEUE_CAPACITY: usize = 64;

/// One dispatch to a `Receiver`, queued so the transport hot path never
/// blocks on (or runs inside) a receiver's callback.
#[derive(Clone)]
pub(super) enum ReceiverEvent {
    Video(Arc<[u8]>),
    Audio(Arc<[u8]>),
    StreamInfo(Arc<str>),
    SetVideoCodec(VideoCodec),
    SetAudioCodec(AudioCodec),
    WaitForIdr,
}

impl ReceiverEvent {
    fn apply(&self, receiver: &dyn Receiver) {
        match self {
            Self::Video(bytes) => receiver.on_video_packet(bytes),
            Self::Audio(bytes) => receiver.on_audio_packet(bytes),
            Self::StreamInfo(info) => receiver.on_stream_info(info),
            Self::SetVideoCodec(codec) => receiver.set_video_codec(*codec),
            Self::SetAudioCodec(codec) => receiver.set_audio_codec(*codec),
            Self::WaitForIdr => receiver.enter_wait_for_idr(),
        }
    }
}

/// One attached receiver's queue plus its own drain task. The task owns the
/// only strong reference the dispatch loop needs; `receiver` is kept here
/// too so `remove_receiver`'s `Arc::ptr_eq` lookup has something to compare
/// against without reaching into the drain task.
pub(super) struct ReceiverSlot {
    receiver: Arc<dyn Receiver>,
    tx: mpsc::Sender<ReceiverEvent>,
    dropped: Arc<AtomicU64>,
}

impl ReceiverSlot {
    /// Spawns the drain task and returns the slot. The task exits either
    /// when `cancel` fires or when `tx` is dropped (the slot removed from
    /// the receiver list), whichever comes first.
    pub(super) fn spawn(
        receiver: Arc<dyn Receiver>,
        spawner: &dyn TaskSpawner,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<ReceiverEvent>(RECEIVER_QUEUE_CAPACITY);
        let task_receiver = Arc::clone(&receiver);
        spawner.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Some(event) => event.apply(task_receiver.as_ref()),
                    None => break,
                }
            }
        });
        Self {
            receiver,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(super) fn is(&self, receiver: &Arc<dyn Receiver>) -> bool {
        Arc::ptr_eq(&self.receiver, receiver)
    }

    /// Non-blocking enqueue (§9 "`try_send` contract"). A full queue means
    /// this receiver isn't keeping up: the event is dropped and counted
    /// rather than stalling the caller (the transport hot path).
    pub(super) fn dispatch(&self, event: ReceiverEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "receiver queue full, dropping frame for a slow receiver");
        }
        // `Closed` means the drain task already exited (cancellation);
        // nothing to do until the slot itself is pruned.
    }

    #[must_use]
    pub(super) fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct RecordingReceiver {
        video_packets: Mutex<Vec<Vec<u8>>>,
        calls: AtomicUsize,
    }

    impl RecordingReceiver {
        fn new() -> Self {
            Self {
                video_packets: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Receiver for RecordingReceiver {
        fn on_video_packet(&self, access_unit: &[u8]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.video_packets.lock().unwrap().push(access_unit.to_vec());
        }
    }

    #[tokio::test]
    async fn dispatched_event_reaches_the_receiver_off_the_caller_thread() {
        let receiver = Arc::new(RecordingReceiver::new());
        let spawner = TokioSpawner::current();
        let slot = ReceiverSlot::spawn(receiver.clone(), &spawner, CancellationToken::new());

        slot.dispatch(ReceiverEvent::Video(Arc::from(b"frame".to_vec())));
        // give the spawned drain task a turn to run.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(receiver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(receiver.video_packets.lock().unwrap()[0], b"frame");
    }

    #[tokio::test]
    async fn full_queue_is_dropped_and_counted_not_blocked() {
        let receiver = Arc::new(RecordingReceiver::new());
        // Use a cancelled token so the drain task never starts consuming;
        // every dispatch past the capacity must be a non-blocking drop.
        let cancel = CancellationToken::new();
        cancel.cancel();
        let spawner = TokioSpawner::current();
        let slot = ReceiverSlot::spawn(receiver, &spawner, cancel);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        for _ in 0..RECEIVER_QUEUE_CAPACITY + 5 {
            slot.dispatch(ReceiverEvent::Video(Arc::from(b"x".to_vec())));
        }

        assert!(slot.dropped_count() > 0, "overflowing a closed receiver's queue must count drops");
    }

    #[tokio::test]
    async fn is_matches_by_pointer_identity() {
        let receiver: Arc<dyn Receiver> = Arc::new(RecordingReceiver::new());
        let spawner = TokioSpawner::current();
        let slot = ReceiverSlot::spawn(Arc::clone(&receiver), &spawner, CancellationToken::new());
        assert!(slot.is(&receiver));
        let other: Arc<dyn Receiver> = Arc::new(RecordingReceiver::new());
        assert!(!slot.is(&other));
    }
}
