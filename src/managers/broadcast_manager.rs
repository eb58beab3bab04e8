// BroadcastManager: Subscriber registry and frame fan-out
// Single Responsibility: subscriber membership and best-effort delivery

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::analysis::AnalysisFrame;

/// Opaque subscriber handle returned by [`BroadcastManager::subscribe`]
pub type SubscriberId = u64;

/// Why a push to one subscriber failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Subscriber is gone; it is pruned from the registry
    Closed,
    /// Subscriber queue is full; this frame is dropped for it only
    Full,
}

/// Push capability of one subscriber
///
/// `push` must not block: it is called from the capture loop.
pub trait FrameSink: Send + Sync {
    fn push(&self, frame: &Arc<AnalysisFrame>) -> Result<(), DeliveryError>;

    /// True once the subscriber can no longer receive frames
    fn is_closed(&self) -> bool {
        false
    }
}

/// Sink backed by a bounded tokio mpsc queue
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<AnalysisFrame>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Arc<AnalysisFrame>>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn push(&self, frame: &Arc<AnalysisFrame>) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Arc::clone(frame))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub pruned: Vec<SubscriberId>,
}

/// Thread-safe set of live subscribers
///
/// Broadcast works on a snapshot of the registry taken under a short read
/// lock, so subscribe/unsubscribe never wait on delivery and a concurrent
/// unsubscribe cannot invalidate a sink that is being pushed to.
#[derive(Clone)]
pub struct BroadcastManager {
    subscribers: Arc<RwLock<Vec<(SubscriberId, Arc<dyn FrameSink>)>>>,
    next_id: Arc<AtomicU64>,
    dropped_frames: Arc<AtomicU64>,
}

impl BroadcastManager {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a sink, returning its handle
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push((id, sink));
        log::info!(
            "[BroadcastManager] Subscriber {} joined ({} total)",
            id,
            subscribers.len()
        );
        id
    }

    /// Register a channel-backed subscriber with a bounded queue
    pub fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> (SubscriberId, mpsc::Receiver<Arc<AnalysisFrame>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.subscribe(Arc::new(ChannelSink::new(tx)));
        (id, rx)
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        let removed = subscribers.len() != before;
        if removed {
            log::info!(
                "[BroadcastManager] Subscriber {} left ({} total)",
                id,
                subscribers.len()
            );
        }
        removed
    }

    /// Push `frame` to every current subscriber
    ///
    /// A closed subscriber is pruned; delivery to the rest continues.
    pub fn broadcast(&self, frame: AnalysisFrame) -> BroadcastReport {
        let frame = Arc::new(frame);
        let snapshot = self.snapshot();

        let mut report = BroadcastReport::default();
        for (id, sink) in snapshot {
            match sink.push(&frame) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => report.dropped += 1,
                Err(DeliveryError::Closed) => report.pruned.push(id),
            }
        }

        if report.dropped > 0 {
            self.dropped_frames
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
        }
        if !report.pruned.is_empty() {
            self.prune(&report.pruned);
        }

        report
    }

    /// Remove subscribers that went away while no frames were flowing
    pub fn prune_closed(&self) -> Vec<SubscriberId> {
        let closed: Vec<SubscriberId> = self
            .snapshot()
            .into_iter()
            .filter(|(_, sink)| sink.is_closed())
            .map(|(id, _)| id)
            .collect();
        if !closed.is_empty() {
            self.prune(&closed);
        }
        closed
    }

    pub fn len(&self) -> usize {
        match self.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames dropped because a subscriber queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn FrameSink>)> {
        match self.subscribers.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn prune(&self, ids: &[SubscriberId]) {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|(id, _)| !ids.contains(id));
        log::info!(
            "[BroadcastManager] Pruned {} dead subscriber(s): {:?} ({} remaining)",
            ids.len(),
            ids,
            subscribers.len()
        );
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        received: AtomicUsize,
    }

    impl FrameSink for RecordingSink {
        fn push(&self, _frame: &Arc<AnalysisFrame>) -> Result<(), DeliveryError> {
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl FrameSink for FailingSink {
        fn push(&self, _frame: &Arc<AnalysisFrame>) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::Closed)
        }
    }

    fn frame(seq: u64) -> AnalysisFrame {
        AnalysisFrame {
            v: 1,
            seq,
            t: 0.0,
            pitch_hz: 0.0,
            note: None,
            cents: None,
            onset: false,
            tempo_bpm: 0.0,
            rms: 0.0,
            level_db: -120.0,
            normalized_level: 0.0,
            gated: true,
            effective_gate_db: -50.0,
            wave: None,
        }
    }

    #[test]
    fn test_failing_subscriber_is_pruned_others_still_served() {
        let manager = BroadcastManager::new();
        let good_a = Arc::new(RecordingSink {
            received: AtomicUsize::new(0),
        });
        let bad = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let good_b = Arc::new(RecordingSink {
            received: AtomicUsize::new(0),
        });

        manager.subscribe(good_a.clone());
        let bad_id = manager.subscribe(bad.clone());
        manager.subscribe(good_b.clone());

        let report = manager.broadcast(frame(0));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned, vec![bad_id]);
        assert_eq!(manager.len(), 2);

        manager.broadcast(frame(1));
        assert_eq!(bad.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(good_a.received.load(Ordering::SeqCst), 2);
        assert_eq!(good_b.received.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_full_queue_drops_frame_but_keeps_subscriber() {
        let manager = BroadcastManager::new();
        let (_id, mut rx) = manager.subscribe_channel(1);

        assert_eq!(manager.broadcast(frame(0)).delivered, 1);
        let report = manager.broadcast(frame(1));
        assert_eq!(report.dropped, 1);
        assert!(report.pruned.is_empty());
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.dropped_frames(), 1);

        assert_eq!(rx.try_recv().unwrap().seq, 0);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let manager = BroadcastManager::new();
        let (_id, rx) = manager.subscribe_channel(4);
        drop(rx);

        let report = manager.broadcast(frame(0));
        assert_eq!(report.pruned.len(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_prune_closed_without_broadcast() {
        let manager = BroadcastManager::new();
        let (_gone, rx) = manager.subscribe_channel(4);
        let (kept, _rx) = manager.subscribe_channel(4);
        drop(rx);

        let pruned = manager.prune_closed();
        assert_eq!(pruned.len(), 1);
        assert_eq!(manager.len(), 1);
        assert!(manager.unsubscribe(kept));
        assert!(manager.prune_closed().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let manager = BroadcastManager::new();
        let (id, mut rx) = manager.subscribe_channel(4);
        assert!(manager.unsubscribe(id));
        assert!(!manager.unsubscribe(id));

        manager.broadcast(frame(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_membership_changes_during_broadcast() {
        let manager = BroadcastManager::new();
        let producer = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                for seq in 0..500 {
                    manager.broadcast(frame(seq));
                }
            })
        };

        for _ in 0..200 {
            let (id, _rx) = manager.subscribe_channel(2);
            manager.unsubscribe(id);
        }

        producer.join().unwrap();
        assert!(manager.is_empty());
    }
}
