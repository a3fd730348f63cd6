//! The bus front door: a cloneable handle over the coordinator mailbox.
//!
//! All state lives in one coordinator thread (see [`coordinator`]); `Bus`
//! methods are request/reply message passing. Callers block on their own
//! reply channel, never on each other, and the coordinator never blocks on a
//! caller.
//!
//! # Example
//!
//! ```ignore
//! use signalbus::{Bus, BusConfig, ExpectedVersion, SignalInput, StartFrom, StreamTarget};
//!
//! let bus = Bus::start(BusConfig::default());
//!
//! bus.publish(
//!     "orders",
//!     ExpectedVersion::NoStream,
//!     vec![SignalInput::json("order-placed", &serde_json::json!({"total": 42}))?],
//! )?;
//!
//! let sub = bus.subscribe_persistent(
//!     StreamTarget::stream("orders"),
//!     "billing",
//!     StartFrom::Origin,
//!     Default::default(),
//! )?;
//! let signal = sub.recv()?;
//! sub.ack(&signal)?;
//! ```

mod coordinator;
mod handle;

pub use handle::{PersistentSubscription, TransientSubscription};

use crate::error::{BusError, Result};
use crate::subscriptions::PersistentOptions;
use crate::types::{
    BusStats, ExpectedVersion, RecordedSignal, Sequence, SignalInput, Snapshot, StartFrom,
    StreamTarget,
};
use coordinator::{Coordinator, Request};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Bus configuration.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Buffered batches per transient subscriber before it is dropped as a
    /// slow consumer.
    pub transient_buffer_size: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transient_buffer_size: crate::subscriptions::DEFAULT_TRANSIENT_BUFFER,
        }
    }
}

/// Handle to a running signal bus. Cheap to clone; every clone talks to the
/// same coordinator thread.
#[derive(Clone)]
pub struct Bus {
    requests: Sender<Request>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Bus {
    /// Start a bus: spawns the coordinator thread and returns a handle.
    pub fn start(config: BusConfig) -> Self {
        let (requests, mailbox) = unbounded();
        let worker = thread::Builder::new()
            .name("signalbus-coordinator".to_string())
            .spawn(move || Coordinator::new(config).run(mailbox))
            .expect("failed to spawn bus coordinator thread");

        Self {
            requests,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    // --- Streams ---

    /// Append a batch of signals to a stream under an optimistic concurrency
    /// assertion. Atomic: either every signal is appended or none is.
    pub fn publish(
        &self,
        stream_id: impl Into<String>,
        expected: ExpectedVersion,
        signals: Vec<SignalInput>,
    ) -> Result<Vec<RecordedSignal>> {
        self.call(|reply| Request::Publish {
            stream_id: stream_id.into(),
            expected,
            signals,
            reply,
        })?
    }

    /// Read back signals from a stream or the all-log, starting at a 1-based
    /// position (0 means the beginning), up to `batch_size` items.
    pub fn replay(
        &self,
        target: StreamTarget,
        start: Sequence,
        batch_size: usize,
    ) -> Result<Vec<RecordedSignal>> {
        self.call(|reply| Request::Replay {
            target,
            start,
            batch_size,
            reply,
        })?
    }

    // --- Subscriptions ---

    /// Register a transient subscription: every subsequent matching publish
    /// is pushed once, best effort, no acknowledgment.
    pub fn subscribe(&self, target: StreamTarget) -> Result<TransientSubscription> {
        let (id, receiver) = self.call(|reply| Request::Subscribe {
            target: target.clone(),
            reply,
        })?;
        Ok(TransientSubscription::new(
            id,
            target,
            receiver,
            self.requests.clone(),
        ))
    }

    /// Create a named persistent subscription, or attach one more slot to an
    /// existing one. See [`PersistentSubscription`] for the delivery and
    /// acknowledgment contract.
    pub fn subscribe_persistent(
        &self,
        target: StreamTarget,
        name: impl Into<String>,
        start_from: StartFrom,
        opts: PersistentOptions,
    ) -> Result<PersistentSubscription> {
        let name = name.into();
        let (id, receiver) = self.call(|reply| Request::SubscribePersistent {
            target: target.clone(),
            name: name.clone(),
            start_from,
            opts,
            reply,
        })??;
        Ok(PersistentSubscription::new(
            name,
            target,
            id,
            receiver,
            self.requests.clone(),
        ))
    }

    /// Acknowledge a signal delivered to a persistent slot. Equivalent to
    /// [`PersistentSubscription::ack`].
    pub fn ack(&self, subscription: &PersistentSubscription, signal: &RecordedSignal) -> Result<()> {
        subscription.ack(signal)
    }

    /// Delete a whole named persistent subscription. Fails with
    /// `SubscriptionInUse` while any slot is still attached and
    /// `SubscriptionNotFound` when the name (or target) does not match.
    pub fn unsubscribe_all(&self, target: StreamTarget, name: impl Into<String>) -> Result<()> {
        self.call(|reply| Request::DeleteSubscription {
            target,
            name: name.into(),
            reply,
        })?
    }

    // --- Snapshots ---

    /// Read the latest snapshot recorded for a source.
    pub fn read_snapshot(&self, source_id: impl Into<String>) -> Result<Snapshot> {
        self.call(|reply| Request::ReadSnapshot {
            source_id: source_id.into(),
            reply,
        })?
    }

    /// Record a snapshot, overwriting any previous one for the same source.
    pub fn record_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.call(|reply| Request::RecordSnapshot { snapshot, reply })
    }

    /// Delete the snapshot for a source. Deleting a missing snapshot is ok.
    pub fn delete_snapshot(&self, source_id: impl Into<String>) -> Result<()> {
        self.call(|reply| Request::DeleteSnapshot {
            source_id: source_id.into(),
            reply,
        })
    }

    // --- Lifecycle ---

    /// Current bus statistics.
    pub fn stats(&self) -> Result<BusStats> {
        self.call(|reply| Request::Stats { reply })
    }

    /// Stop the coordinator and wait for it to finish. Outstanding handles
    /// see `Terminated` afterwards. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    /// Send a request and wait for its reply.
    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.requests
            .send(build(reply_tx))
            .map_err(|_| BusError::Terminated)?;
        reply_rx.recv().map_err(|_| BusError::Terminated)
    }
}
