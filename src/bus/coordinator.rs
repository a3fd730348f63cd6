//! The coordinator thread: single owner of all mutable bus state.

use crate::error::Result;
use crate::snapshots::SnapshotStore;
use crate::streams::StreamStore;
use crate::subscriptions::{PersistentEngine, PersistentOptions, TransientRegistry};
use crate::types::{
    BusStats, ExpectedVersion, RecordedSignal, Sequence, SignalInput, Snapshot, StartFrom,
    StreamTarget, SubscriberId,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use tracing::debug;

use super::BusConfig;

/// One bus operation plus its reply channel. Every mutation of bus state
/// flows through this mailbox, so no two operations ever observe state
/// concurrently. Replies use capacity-1 channels and best-effort sends; the
/// coordinator never blocks on a caller.
pub(crate) enum Request {
    Publish {
        stream_id: String,
        expected: ExpectedVersion,
        signals: Vec<SignalInput>,
        reply: Sender<Result<Vec<RecordedSignal>>>,
    },
    Replay {
        target: StreamTarget,
        start: Sequence,
        batch_size: usize,
        reply: Sender<Result<Vec<RecordedSignal>>>,
    },
    Subscribe {
        target: StreamTarget,
        reply: Sender<(SubscriberId, Receiver<Vec<RecordedSignal>>)>,
    },
    SubscribePersistent {
        target: StreamTarget,
        name: String,
        start_from: StartFrom,
        opts: PersistentOptions,
        reply: Sender<Result<(SubscriberId, Receiver<RecordedSignal>)>>,
    },
    Ack {
        subscriber: SubscriberId,
        signal_number: Sequence,
        reply: Sender<Result<()>>,
    },
    /// Detach one subscriber slot/registration. `reply` is `None` when sent
    /// from a handle's `Drop`, where nobody is left to hear the answer.
    Detach {
        subscriber: SubscriberId,
        reply: Option<Sender<()>>,
    },
    DeleteSubscription {
        target: StreamTarget,
        name: String,
        reply: Sender<Result<()>>,
    },
    ReadSnapshot {
        source_id: String,
        reply: Sender<Result<Snapshot>>,
    },
    RecordSnapshot {
        snapshot: Snapshot,
        reply: Sender<()>,
    },
    DeleteSnapshot {
        source_id: String,
        reply: Sender<()>,
    },
    Stats {
        reply: Sender<BusStats>,
    },
    Shutdown,
}

/// What a subscriber id is registered as, for cleanup when it dies or
/// detaches. The bus only needs this table and a removal signal; it never
/// owns the subscriber's lifecycle.
enum Monitored {
    Transient,
    Persistent,
}

pub(crate) struct Coordinator {
    streams: StreamStore,
    transient: TransientRegistry,
    persistent: PersistentEngine,
    snapshots: SnapshotStore,
    monitors: HashMap<SubscriberId, Monitored>,
    next_subscriber: u64,
}

impl Coordinator {
    pub(crate) fn new(config: BusConfig) -> Self {
        Self {
            streams: StreamStore::new(),
            transient: TransientRegistry::new(config.transient_buffer_size),
            persistent: PersistentEngine::new(),
            snapshots: SnapshotStore::new(),
            monitors: HashMap::new(),
            next_subscriber: 1,
        }
    }

    /// Serve requests until shutdown or until every `Bus` handle is gone.
    pub(crate) fn run(mut self, requests: Receiver<Request>) {
        debug!("bus coordinator started");
        for request in requests.iter() {
            match request {
                Request::Publish {
                    stream_id,
                    expected,
                    signals,
                    reply,
                } => {
                    let result = self.publish(&stream_id, expected, signals);
                    let _ = reply.try_send(result);
                }
                Request::Replay {
                    target,
                    start,
                    batch_size,
                    reply,
                } => {
                    let _ = reply.try_send(self.streams.replay(&target, start, batch_size));
                }
                Request::Subscribe { target, reply } => {
                    let id = self.next_subscriber_id();
                    let receiver = self.transient.subscribe(id, target);
                    self.monitors.insert(id, Monitored::Transient);
                    let _ = reply.try_send((id, receiver));
                }
                Request::SubscribePersistent {
                    target,
                    name,
                    start_from,
                    opts,
                    reply,
                } => {
                    let _ = reply.try_send(self.subscribe_persistent(target, name, start_from, opts));
                }
                Request::Ack {
                    subscriber,
                    signal_number,
                    reply,
                } => {
                    let result = match self.persistent.ack(&self.streams, subscriber, signal_number)
                    {
                        Ok(reaped) => {
                            self.demonitor(reaped);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    };
                    let _ = reply.try_send(result);
                }
                Request::Detach { subscriber, reply } => {
                    self.detach(subscriber);
                    if let Some(reply) = reply {
                        let _ = reply.try_send(());
                    }
                }
                Request::DeleteSubscription {
                    target,
                    name,
                    reply,
                } => {
                    let _ = reply.try_send(self.persistent.delete(&target, &name));
                }
                Request::ReadSnapshot { source_id, reply } => {
                    let _ = reply.try_send(self.snapshots.read(&source_id));
                }
                Request::RecordSnapshot { snapshot, reply } => {
                    self.snapshots.record(snapshot);
                    let _ = reply.try_send(());
                }
                Request::DeleteSnapshot { source_id, reply } => {
                    self.snapshots.delete(&source_id);
                    let _ = reply.try_send(());
                }
                Request::Stats { reply } => {
                    let _ = reply.try_send(self.stats());
                }
                Request::Shutdown => break,
            }
        }
        debug!("bus coordinator stopped");
    }

    fn publish(
        &mut self,
        stream_id: &str,
        expected: ExpectedVersion,
        signals: Vec<SignalInput>,
    ) -> Result<Vec<RecordedSignal>> {
        let appended = self.streams.publish(stream_id, expected, signals)?;

        // Fan out to transient subscribers, then wake persistent
        // subscriptions covering this stream.
        let dropped = self.transient.broadcast(stream_id, &appended);
        self.demonitor(dropped);
        let reaped = self.persistent.publish_notify(&self.streams, stream_id);
        self.demonitor(reaped);

        Ok(appended)
    }

    fn subscribe_persistent(
        &mut self,
        target: StreamTarget,
        name: String,
        start_from: StartFrom,
        opts: PersistentOptions,
    ) -> Result<(SubscriberId, Receiver<RecordedSignal>)> {
        let id = self.next_subscriber_id();
        let (sender, receiver) = unbounded();

        let reaped = self.persistent.attach(
            &self.streams,
            target,
            &name,
            start_from,
            opts,
            id,
            sender,
        )?;
        self.demonitor(reaped);
        self.monitors.insert(id, Monitored::Persistent);
        Ok((id, receiver))
    }

    fn detach(&mut self, subscriber: SubscriberId) {
        match self.monitors.remove(&subscriber) {
            Some(Monitored::Transient) => self.transient.unsubscribe(subscriber),
            Some(Monitored::Persistent) => {
                let reaped = self.persistent.detach(&self.streams, subscriber);
                self.demonitor(reaped);
            }
            // Already cleaned up (e.g. reaped before the Drop message landed).
            None => {}
        }
    }

    fn demonitor(&mut self, subscribers: Vec<SubscriberId>) {
        for id in subscribers {
            self.monitors.remove(&id);
        }
    }

    fn next_subscriber_id(&mut self) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        id
    }

    fn stats(&self) -> BusStats {
        BusStats {
            stream_count: self.streams.stream_count(),
            signal_count: self.streams.global_len(),
            snapshot_count: self.snapshots.count(),
            transient_subscriber_count: self.transient.count(),
            persistent_subscription_count: self.persistent.subscription_count(),
            persistent_slot_count: self.persistent.slot_count(),
        }
    }
}
