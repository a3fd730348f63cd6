//! Persistent subscription engine.
//!
//! A persistent subscription is a named, durable cursor over one stream (or
//! the all-log) shared by every subscriber slot attached under that name.
//! Delivery is at-least-once: the checkpoint advances only on acknowledgment,
//! and losing a slot rolls the checkpoint back over its unacked work so a
//! later attach sees it again.

use crate::error::{BusError, Result};
use crate::streams::StreamStore;
use crate::types::{RecordedSignal, Sequence, StartFrom, StreamTarget, SubscriberId};
use crossbeam_channel::Sender;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pure function deriving a partition key from a signal. Signals with equal
/// keys are pinned to the same slot while the slot set is stable.
pub type PartitionFn = Arc<dyn Fn(&RecordedSignal) -> String + Send + Sync>;

/// Options for creating (or re-creating after the last slot detached) a
/// persistent subscription.
#[derive(Clone, Default)]
pub struct PersistentOptions {
    /// Cap on simultaneously attached slots. Unbounded when unset.
    pub concurrency_limit: Option<usize>,

    /// Partition routing function. When unset, delivery is first-available
    /// with a single in-flight signal across the whole subscription.
    pub partition_by: Option<PartitionFn>,
}

impl PersistentOptions {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_partition_by(
        mut self,
        f: impl Fn(&RecordedSignal) -> String + Send + Sync + 'static,
    ) -> Self {
        self.partition_by = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for PersistentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentOptions")
            .field("concurrency_limit", &self.concurrency_limit)
            .field("partitioned", &self.partition_by.is_some())
            .finish()
    }
}

/// One attached subscriber. At most one outstanding signal per slot; the
/// pending queue holds signals already routed here while one is in flight.
struct Slot {
    subscriber: SubscriberId,
    sender: Sender<RecordedSignal>,
    in_flight: Option<RecordedSignal>,
    pending: VecDeque<RecordedSignal>,
}

impl Slot {
    fn new(subscriber: SubscriberId, sender: Sender<RecordedSignal>) -> Self {
        Self {
            subscriber,
            sender,
            in_flight: None,
            pending: VecDeque::new(),
        }
    }
}

/// State of one named subscription. Positions are in the numbering of the
/// subscription's target: stream-local for a specific stream, global for the
/// all-target.
struct Subscription {
    name: String,
    target: StreamTarget,

    /// Highest position acked as a contiguous prefix. Never advances over a
    /// gap; rolls back only when a slot is lost with unacked work.
    checkpoint: u64,

    /// Highest position ever handed to a slot. Positions in
    /// `(checkpoint, cursor]` are in flight, pending, acked ahead, or ready.
    cursor: u64,

    /// Positions recovered from lost or rebalanced slots, awaiting re-route.
    ready: BTreeSet<u64>,

    /// Acked positions above the checkpoint (out-of-order acks across
    /// partitioned slots).
    acked_ahead: BTreeSet<u64>,

    concurrency_limit: Option<usize>,
    partition_by: Option<PartitionFn>,
    slots: Vec<Slot>,
}

impl Subscription {
    /// Deliver as much as the routing rules allow. Dead slots discovered on a
    /// send attempt are removed and reported through `reaped`.
    fn pump(&mut self, streams: &StreamStore, reaped: &mut Vec<SubscriberId>) {
        loop {
            if self.slots.is_empty() {
                break;
            }

            let position = match self.next_position(streams) {
                Some(p) => p,
                None => break,
            };
            let signal = match streams.entry(&self.target, position) {
                Some(s) => s,
                None => break,
            };

            let routed = match self.partition_by.clone() {
                Some(partition) => self.route_partitioned(&partition, position, signal, reaped),
                None => self.route_first_available(position, signal, reaped),
            };
            if !routed {
                break;
            }
        }
    }

    /// Next position to route: recovered work first, then the tail.
    fn next_position(&self, streams: &StreamStore) -> Option<u64> {
        if let Some(&p) = self.ready.iter().next() {
            return Some(p);
        }
        if self.cursor < streams.target_len(&self.target) {
            return Some(self.cursor + 1);
        }
        None
    }

    /// Unpartitioned routing: one logical cursor shared by all slots, a
    /// single signal in flight across the whole subscription, delivered to
    /// the first available slot.
    fn route_first_available(
        &mut self,
        position: u64,
        signal: RecordedSignal,
        reaped: &mut Vec<SubscriberId>,
    ) -> bool {
        if self.slots.iter().any(|s| s.in_flight.is_some()) {
            return false;
        }

        let mut i = 0;
        while i < self.slots.len() {
            if self.slots[i].in_flight.is_some() {
                i += 1;
                continue;
            }
            if self.slots[i].sender.try_send(signal.clone()).is_ok() {
                self.slots[i].in_flight = Some(signal);
                self.consume(position);
                return true;
            }
            // Receiver gone: treat as subscriber death, keep scanning from
            // the same index (removal shifted the rest down).
            let dead = self.remove_slot(i);
            reaped.push(dead);
        }
        false
    }

    /// Partitioned routing: the signal's key pins it to one slot; a busy
    /// slot queues it rather than letting it jump to an idle one, since
    /// per-key ordering requires sticking to the computed slot.
    fn route_partitioned(
        &mut self,
        partition: &PartitionFn,
        position: u64,
        signal: RecordedSignal,
        reaped: &mut Vec<SubscriberId>,
    ) -> bool {
        let key = partition(&signal);
        let idx = partition_index(&key, self.slots.len());

        if self.slots[idx].in_flight.is_none() && self.slots[idx].pending.is_empty() {
            if self.slots[idx].sender.try_send(signal.clone()).is_ok() {
                self.slots[idx].in_flight = Some(signal);
                self.consume(position);
            } else {
                let dead = self.remove_slot(idx);
                reaped.push(dead);
                // Slot set changed; the caller's loop re-routes everything.
            }
        } else {
            self.slots[idx].pending.push_back(signal);
            self.consume(position);
        }
        !self.slots.is_empty()
    }

    /// Mark a position as handed to a slot.
    fn consume(&mut self, position: u64) {
        if !self.ready.remove(&position) {
            assert_eq!(
                position,
                self.cursor + 1,
                "subscription {}: routing cursor advanced non-contiguously",
                self.name
            );
            self.cursor = position;
        }
    }

    /// Acknowledge the signal a slot currently holds in flight.
    fn ack(
        &mut self,
        streams: &StreamStore,
        subscriber: SubscriberId,
        signal_number: Sequence,
        reaped: &mut Vec<SubscriberId>,
    ) -> Result<()> {
        let idx = self
            .slots
            .iter()
            .position(|s| {
                s.subscriber == subscriber
                    && s.in_flight.as_ref().map(|f| f.signal_number) == Some(signal_number)
            })
            .ok_or(BusError::UnexpectedAck {
                subscriber,
                signal_number,
            })?;

        self.slots[idx].in_flight = None;
        self.acked_ahead.insert(signal_number.0);
        while self.acked_ahead.remove(&(self.checkpoint + 1)) {
            self.checkpoint += 1;
        }
        assert!(
            self.checkpoint <= self.cursor,
            "subscription {}: checkpoint {} passed routing cursor {}",
            self.name,
            self.checkpoint,
            self.cursor
        );

        // The freed slot drains its own queue before the shared cursor moves.
        if let Some(next) = self.slots[idx].pending.pop_front() {
            if self.slots[idx].sender.try_send(next.clone()).is_ok() {
                self.slots[idx].in_flight = Some(next);
            } else {
                self.slots[idx].pending.push_front(next);
                let dead = self.remove_slot(idx);
                reaped.push(dead);
            }
        }

        self.pump(streams, reaped);
        Ok(())
    }

    /// Remove a slot, recovering its unacked and queued work for redelivery.
    fn remove_slot(&mut self, idx: usize) -> SubscriberId {
        let slot = self.slots.remove(idx);

        if let Some(signal) = slot.in_flight {
            let n = signal.signal_number.0;
            let rolled_back = self.checkpoint.min(n - 1);
            if rolled_back != self.checkpoint {
                warn!(
                    subscription = %self.name,
                    from = self.checkpoint,
                    to = rolled_back,
                    "rolled back checkpoint over unacked in-flight signal"
                );
            }
            self.checkpoint = rolled_back;
            self.ready.insert(n);
        }
        for signal in slot.pending {
            self.ready.insert(signal.signal_number.0);
        }

        // Slot count changed: partition assignments are stale, so queued but
        // unsent work goes back through routing.
        if self.partition_by.is_some() {
            self.requeue_pending();
        }

        slot.subscriber
    }

    /// Drain every slot's pending queue into the ready set.
    fn requeue_pending(&mut self) {
        for slot in &mut self.slots {
            for signal in slot.pending.drain(..) {
                self.ready.insert(signal.signal_number.0);
            }
        }
    }

    fn holds(&self, subscriber: SubscriberId) -> bool {
        self.slots.iter().any(|s| s.subscriber == subscriber)
    }
}

/// Deterministic key -> slot mapping, recomputed as the slot count changes.
fn partition_index(key: &str, slot_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % slot_count as u64) as usize
}

/// Owns every named persistent subscription.
#[derive(Default)]
pub struct PersistentEngine {
    subscriptions: HashMap<String, Subscription>,
}

impl PersistentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the named subscription or attach one more slot to it.
    ///
    /// `start_from` seeds the checkpoint only on creation; attaching joins
    /// the shared cursor as-is. Attaching to an existing name with zero live
    /// slots re-binds the options but keeps the checkpoint, so previously
    /// acked work is not replayed. Returns subscribers reaped while pumping.
    pub fn attach(
        &mut self,
        streams: &StreamStore,
        target: StreamTarget,
        name: &str,
        start_from: StartFrom,
        opts: PersistentOptions,
        subscriber: SubscriberId,
        sender: Sender<RecordedSignal>,
    ) -> Result<Vec<SubscriberId>> {
        let mut reaped = Vec::new();

        match self.subscriptions.get_mut(name) {
            None => {
                let checkpoint = match start_from {
                    StartFrom::Origin => 0,
                    StartFrom::Current => streams.target_len(&target),
                    StartFrom::Version(v) => v,
                };
                debug!(subscription = name, %target, checkpoint, "created persistent subscription");

                let mut subscription = Subscription {
                    name: name.to_string(),
                    target,
                    checkpoint,
                    cursor: checkpoint,
                    ready: BTreeSet::new(),
                    acked_ahead: BTreeSet::new(),
                    concurrency_limit: opts.concurrency_limit,
                    partition_by: opts.partition_by,
                    slots: vec![Slot::new(subscriber, sender)],
                };
                subscription.pump(streams, &mut reaped);
                self.subscriptions.insert(name.to_string(), subscription);
            }
            Some(subscription) => {
                if subscription.target != target {
                    return Err(BusError::SubscriptionAlreadyExists(name.to_string()));
                }

                if subscription.slots.is_empty() {
                    // Fresh attach to an idle subscription.
                    subscription.concurrency_limit = opts.concurrency_limit;
                    subscription.partition_by = opts.partition_by;
                } else if let Some(limit) = subscription.concurrency_limit {
                    if subscription.slots.len() >= limit {
                        return Err(if limit == 1 {
                            BusError::SubscriptionAlreadyExists(name.to_string())
                        } else {
                            BusError::TooManySubscribers(name.to_string())
                        });
                    }
                }

                debug!(subscription = name, subscriber = subscriber.0, "attached slot");
                subscription.slots.push(Slot::new(subscriber, sender));
                if subscription.partition_by.is_some() {
                    subscription.requeue_pending();
                }
                subscription.pump(streams, &mut reaped);
            }
        }

        Ok(reaped)
    }

    /// Acknowledge an in-flight signal and resume delivery.
    pub fn ack(
        &mut self,
        streams: &StreamStore,
        subscriber: SubscriberId,
        signal_number: Sequence,
    ) -> Result<Vec<SubscriberId>> {
        let subscription = self
            .subscriptions
            .values_mut()
            .find(|s| s.holds(subscriber))
            .ok_or(BusError::UnexpectedAck {
                subscriber,
                signal_number,
            })?;

        let mut reaped = Vec::new();
        subscription.ack(streams, subscriber, signal_number, &mut reaped)?;
        Ok(reaped)
    }

    /// Detach one slot (explicit unsubscribe or detected death). The
    /// subscription itself survives with its checkpoint, even slot-less.
    /// Detaching an unknown subscriber is a no-op.
    pub fn detach(&mut self, streams: &StreamStore, subscriber: SubscriberId) -> Vec<SubscriberId> {
        let mut reaped = Vec::new();

        if let Some(subscription) = self.subscriptions.values_mut().find(|s| s.holds(subscriber)) {
            let idx = subscription
                .slots
                .iter()
                .position(|s| s.subscriber == subscriber)
                .expect("holds() implies a matching slot");
            subscription.remove_slot(idx);
            debug!(
                subscription = %subscription.name,
                subscriber = subscriber.0,
                remaining = subscription.slots.len(),
                "detached slot"
            );
            subscription.pump(streams, &mut reaped);
        }

        reaped
    }

    /// Delete a whole named subscription. Only allowed once every slot has
    /// detached.
    pub fn delete(&mut self, target: &StreamTarget, name: &str) -> Result<()> {
        match self.subscriptions.get(name) {
            Some(subscription) if subscription.target == *target => {
                if !subscription.slots.is_empty() {
                    return Err(BusError::SubscriptionInUse(name.to_string()));
                }
                self.subscriptions.remove(name);
                debug!(subscription = name, "deleted persistent subscription");
                Ok(())
            }
            _ => Err(BusError::SubscriptionNotFound(name.to_string())),
        }
    }

    /// Wake every subscription whose target covers the published stream.
    pub fn publish_notify(&mut self, streams: &StreamStore, stream_id: &str) -> Vec<SubscriberId> {
        let mut reaped = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            if subscription.target.matches(stream_id) {
                subscription.pump(streams, &mut reaped);
            }
        }
        reaped
    }

    pub fn subscription_count(&self) -> u64 {
        self.subscriptions.len() as u64
    }

    pub fn slot_count(&self) -> u64 {
        self.subscriptions.values().map(|s| s.slots.len() as u64).sum()
    }

    #[cfg(test)]
    fn checkpoint(&self, name: &str) -> Option<u64> {
        self.subscriptions.get(name).map(|s| s.checkpoint)
    }
}
