//! Transient subscription registry: best-effort, at-most-once batch pushes.

use crate::types::{RecordedSignal, StreamTarget, SubscriberId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use tracing::warn;

/// Default buffered batches per transient subscriber before it is dropped.
pub(crate) const DEFAULT_TRANSIENT_BUFFER: usize = 1000;

struct Registration {
    target: StreamTarget,
    sender: Sender<Vec<RecordedSignal>>,
}

impl Registration {
    /// Try to push a batch. Returns false if the subscriber is gone or its
    /// buffer is full (it will be dropped).
    fn try_send(&self, batch: Vec<RecordedSignal>) -> bool {
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Maps stream targets to live subscriber channels.
///
/// Delivery is push-only: every successful publish is offered once to each
/// handle registered for the specific stream and to each handle registered
/// for the all-target. Nothing is retried or acknowledged.
pub struct TransientRegistry {
    registrations: HashMap<SubscriberId, Registration>,
    buffer_size: usize,
}

impl TransientRegistry {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            registrations: HashMap::new(),
            buffer_size,
        }
    }

    /// Register a subscriber under a target. The returned receiver sees one
    /// `Vec<RecordedSignal>` per publish that matches the target.
    pub fn subscribe(
        &mut self,
        id: SubscriberId,
        target: StreamTarget,
    ) -> Receiver<Vec<RecordedSignal>> {
        let (sender, receiver) = bounded(self.buffer_size);
        self.registrations.insert(id, Registration { target, sender });
        receiver
    }

    /// Remove a registration. Removing an unknown id is a no-op.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.registrations.remove(&id);
    }

    /// Push a published batch to every matching subscriber. Subscribers
    /// scoped to the specific stream see stream-local numbering; all-target
    /// subscribers see the global numbering. Returns the ids dropped because
    /// their channel was full or disconnected.
    pub fn broadcast(
        &mut self,
        stream_id: &str,
        signals: &[RecordedSignal],
    ) -> Vec<SubscriberId> {
        if signals.is_empty() {
            return Vec::new();
        }

        // Built once, shared by every stream-scoped subscriber in this fanout.
        let mut localized: Option<Vec<RecordedSignal>> = None;
        let mut to_remove = Vec::new();

        for (id, registration) in &self.registrations {
            let batch = match &registration.target {
                StreamTarget::All => signals.to_vec(),
                StreamTarget::Stream(target_id) => {
                    if target_id != stream_id {
                        continue;
                    }
                    localized
                        .get_or_insert_with(|| {
                            signals.iter().map(RecordedSignal::localized).collect()
                        })
                        .clone()
                }
            };

            if !registration.try_send(batch) {
                to_remove.push(*id);
            }
        }

        for id in &to_remove {
            self.registrations.remove(id);
            warn!(subscriber = id.0, "dropped transient subscriber (slow or disconnected)");
        }

        to_remove
    }

    pub fn count(&self) -> u64 {
        self.registrations.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamStore;
    use crate::types::{ExpectedVersion, Sequence, SignalInput};

    fn published(store: &mut StreamStore, stream: &str, n: usize) -> Vec<RecordedSignal> {
        let inputs = (0..n)
            .map(|i| SignalInput::raw("test", vec![i as u8]))
            .collect();
        store.publish(stream, ExpectedVersion::Any, inputs).unwrap()
    }

    #[test]
    fn test_stream_scoped_batch_is_localized() {
        let mut store = StreamStore::new();
        let mut registry = TransientRegistry::new(10);

        let rx = registry.subscribe(SubscriberId(1), StreamTarget::stream("orders"));

        published(&mut store, "billing", 2);
        let batch = published(&mut store, "orders", 1);
        registry.broadcast("orders", &batch);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].signal_number, Sequence(1));
        assert_eq!(received[0].stream_version, Sequence(1));
    }

    #[test]
    fn test_all_target_sees_global_numbering() {
        let mut store = StreamStore::new();
        let mut registry = TransientRegistry::new(10);

        let rx = registry.subscribe(SubscriberId(1), StreamTarget::All);

        published(&mut store, "billing", 2);
        let batch = published(&mut store, "orders", 1);
        registry.broadcast("orders", &batch);

        let received = rx.try_recv().unwrap();
        assert_eq!(received[0].signal_number, Sequence(3));
    }

    #[test]
    fn test_non_matching_stream_receives_nothing() {
        let mut store = StreamStore::new();
        let mut registry = TransientRegistry::new(10);

        let rx = registry.subscribe(SubscriberId(1), StreamTarget::stream("billing"));

        let batch = published(&mut store, "orders", 1);
        registry.broadcast("orders", &batch);

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_subscriber_is_dropped() {
        let mut store = StreamStore::new();
        let mut registry = TransientRegistry::new(2);

        let _rx = registry.subscribe(SubscriberId(1), StreamTarget::All);

        for _ in 0..5 {
            let batch = published(&mut store, "orders", 1);
            registry.broadcast("orders", &batch);
        }

        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped_lazily() {
        let mut store = StreamStore::new();
        let mut registry = TransientRegistry::new(10);

        let rx = registry.subscribe(SubscriberId(1), StreamTarget::All);
        drop(rx);
        assert_eq!(registry.count(), 1);

        let batch = published(&mut store, "orders", 1);
        let dropped = registry.broadcast("orders", &batch);

        assert_eq!(dropped, vec![SubscriberId(1)]);
        assert_eq!(registry.count(), 0);
    }
}
