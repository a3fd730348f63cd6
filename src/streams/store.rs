//! In-memory stream store: global log plus per-stream index.

use crate::error::{BusError, Result};
use crate::types::{
    ExpectedVersion, RecordedSignal, Sequence, SignalId, SignalInput, StreamTarget, Timestamp,
};
use std::collections::HashMap;

/// Owns the per-stream append logs and the global log.
///
/// Signals live once, in the global log; each stream is an index of global
/// positions. `signal_number` is the 1-based global position and
/// `stream_version` the 1-based position within the owning stream. Both are
/// gapless by construction: the only mutation is an atomic batch append.
#[derive(Default)]
pub struct StreamStore {
    /// Every signal, in publish order. `signal_number == index + 1`.
    all: Vec<RecordedSignal>,

    /// Stream id -> global positions of its signals, in stream order.
    /// `stream_version == index + 1`. Streams are created on first publish
    /// and never removed, so presence in this map means "stream exists".
    streams: HashMap<String, Vec<u64>>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of signals in the whole bus.
    pub fn global_len(&self) -> u64 {
        self.all.len() as u64
    }

    /// Number of signals in one stream (0 when the stream does not exist).
    pub fn stream_len(&self, stream_id: &str) -> u64 {
        self.streams.get(stream_id).map_or(0, |s| s.len() as u64)
    }

    /// Current length of a target's ordering.
    pub fn target_len(&self, target: &StreamTarget) -> u64 {
        match target {
            StreamTarget::All => self.global_len(),
            StreamTarget::Stream(id) => self.stream_len(id),
        }
    }

    pub fn stream_exists(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    pub fn stream_count(&self) -> u64 {
        self.streams.len() as u64
    }

    /// Append a batch of signals to a stream under an optimistic concurrency
    /// assertion. All-or-nothing: the check happens before any signal is
    /// numbered, so a failed publish leaves both logs untouched.
    pub fn publish(
        &mut self,
        stream_id: &str,
        expected: ExpectedVersion,
        inputs: Vec<SignalInput>,
    ) -> Result<Vec<RecordedSignal>> {
        let current = self.stream_len(stream_id);
        let exists = self.stream_exists(stream_id);

        let ok = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => !exists,
            ExpectedVersion::StreamExists => exists,
            ExpectedVersion::Exact(v) => v == current,
        };
        if !ok {
            return Err(BusError::WrongExpectedVersion {
                stream_id: stream_id.to_string(),
                expected,
                actual: Sequence(current),
            });
        }

        // An empty batch asserts the version but records nothing; the stream
        // is only brought into existence by an actual append.
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let created_at = Timestamp::now();
        let positions = self.streams.entry(stream_id.to_string()).or_default();

        let mut appended = Vec::with_capacity(inputs.len());
        for input in inputs {
            let signal_number = Sequence(self.all.len() as u64 + 1);
            let stream_version = Sequence(positions.len() as u64 + 1);

            let signal = RecordedSignal {
                signal_id: SignalId::new(),
                signal_number,
                stream_id: stream_id.to_string(),
                stream_version,
                causation_id: input.causation_id,
                correlation_id: input.correlation_id,
                signal_type: input.signal_type,
                data: input.data,
                encoding: input.encoding,
                metadata: input.metadata,
                created_at,
            };

            positions.push(signal_number.0);
            self.all.push(signal.clone());
            appended.push(signal);
        }

        Ok(appended)
    }

    /// Read signals from a target starting at a 1-based position (0 maps to
    /// the beginning), up to `batch_size` items.
    ///
    /// Replaying a specific stream that was never published to is an error;
    /// replaying the all-log never fails. Single-stream results carry
    /// stream-local numbering.
    pub fn replay(
        &self,
        target: &StreamTarget,
        start: Sequence,
        batch_size: usize,
    ) -> Result<Vec<RecordedSignal>> {
        let first = start.0.max(1);

        match target {
            StreamTarget::All => {
                let skip = (first - 1) as usize;
                Ok(self.all.iter().skip(skip).take(batch_size).cloned().collect())
            }
            StreamTarget::Stream(id) => {
                let positions = self
                    .streams
                    .get(id)
                    .ok_or_else(|| BusError::StreamNotFound(id.clone()))?;
                let skip = (first - 1) as usize;
                Ok(positions
                    .iter()
                    .skip(skip)
                    .take(batch_size)
                    .map(|n| self.all[(n - 1) as usize].localized())
                    .collect())
            }
        }
    }

    /// Signal at a 1-based position within a target's ordering, numbered in
    /// that target's scheme. `None` past the end or for an unknown stream.
    pub fn entry(&self, target: &StreamTarget, position: u64) -> Option<RecordedSignal> {
        if position == 0 {
            return None;
        }
        match target {
            StreamTarget::All => self.all.get((position - 1) as usize).cloned(),
            StreamTarget::Stream(id) => {
                let positions = self.streams.get(id)?;
                let global = *positions.get((position - 1) as usize)?;
                Some(self.all[(global - 1) as usize].localized())
            }
        }
    }
}
