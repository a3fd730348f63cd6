//! Caller-side subscription handles.
//!
//! Handles are the bus's liveness contract: dropping one sends a detach
//! message to the coordinator, which runs the same cleanup as an explicit
//! unsubscribe. If the drop message is lost (coordinator already gone), the
//! closed receiver still gets the registration reaped lazily on the next
//! dispatch attempt.

use crate::error::{BusError, Result};
use crate::types::{RecordedSignal, StreamTarget, SubscriberId};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

use super::coordinator::Request;

/// Handle to a transient (fire-and-forget) subscription. Receives one batch
/// per matching publish; no acknowledgment.
pub struct TransientSubscription {
    id: SubscriberId,
    target: StreamTarget,
    receiver: Receiver<Vec<RecordedSignal>>,
    requests: Sender<Request>,
    detached: bool,
}

impl TransientSubscription {
    pub(crate) fn new(
        id: SubscriberId,
        target: StreamTarget,
        receiver: Receiver<Vec<RecordedSignal>>,
        requests: Sender<Request>,
    ) -> Self {
        Self {
            id,
            target,
            receiver,
            requests,
            detached: false,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Receive the next batch (blocking).
    pub fn recv(&self) -> std::result::Result<Vec<RecordedSignal>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a batch (non-blocking).
    pub fn try_recv(
        &self,
    ) -> std::result::Result<Vec<RecordedSignal>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Vec<RecordedSignal>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Detach from the bus. Synchronous: registration is gone on return.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.detached = true;
        detach(&self.requests, self.id)
    }
}

impl Drop for TransientSubscription {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.requests.send(Request::Detach {
                subscriber: self.id,
                reply: None,
            });
        }
    }
}

/// Handle to one slot of a named persistent subscription. Receives one
/// signal per dispatch; each must be acked to let delivery continue.
pub struct PersistentSubscription {
    name: String,
    target: StreamTarget,
    id: SubscriberId,
    receiver: Receiver<RecordedSignal>,
    requests: Sender<Request>,
    detached: bool,
}

impl PersistentSubscription {
    pub(crate) fn new(
        name: String,
        target: StreamTarget,
        id: SubscriberId,
        receiver: Receiver<RecordedSignal>,
        requests: Sender<Request>,
    ) -> Self {
        Self {
            name,
            target,
            id,
            receiver,
            requests,
            detached: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receive the next dispatched signal (blocking).
    pub fn recv(&self) -> std::result::Result<RecordedSignal, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a signal (non-blocking).
    pub fn try_recv(
        &self,
    ) -> std::result::Result<RecordedSignal, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<RecordedSignal, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Acknowledge a delivered signal, retiring it and unblocking the next
    /// dispatch. Acking a signal this slot does not hold in flight fails
    /// with `UnexpectedAck`.
    pub fn ack(&self, signal: &RecordedSignal) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.requests
            .send(Request::Ack {
                subscriber: self.id,
                signal_number: signal.signal_number,
                reply: reply_tx,
            })
            .map_err(|_| BusError::Terminated)?;
        reply_rx.recv().map_err(|_| BusError::Terminated)?
    }

    /// Detach this slot. The subscription and its checkpoint survive; any
    /// unacked in-flight signal will be redelivered to a later slot.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.detached = true;
        detach(&self.requests, self.id)
    }
}

impl Drop for PersistentSubscription {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.requests.send(Request::Detach {
                subscriber: self.id,
                reply: None,
            });
        }
    }
}

/// Synchronous detach: the registration is gone when this returns.
fn detach(requests: &Sender<Request>, subscriber: SubscriberId) -> Result<()> {
    let (reply_tx, reply_rx) = bounded(1);
    requests
        .send(Request::Detach {
            subscriber,
            reply: Some(reply_tx),
        })
        .map_err(|_| BusError::Terminated)?;
    reply_rx.recv().map_err(|_| BusError::Terminated)
}
