//! Core types for the signal bus.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique identifier for a recorded signal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId(pub Uuid);

impl SignalId {
    /// Generate a fresh identifier (assigned at append time).
    pub fn new() -> Self {
        SignalId(Uuid::new_v4())
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalId({})", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in a log. Used both for the bus-global numbering and the
/// stream-local numbering; positions start at 1, 0 means "before the first".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Sequence(self.0 - 1))
        } else {
            None
        }
    }
}

/// Unique identifier for a subscriber (transient or a persistent slot).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Payload encoding format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadEncoding {
    Json,
    MessagePack,
    Raw,
}

impl Default for PayloadEncoding {
    fn default() -> Self {
        PayloadEncoding::Json
    }
}

/// What a subscription or replay is aimed at: one named stream, or the
/// bus-wide log of every stream interleaved in publish order.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamTarget {
    /// Every stream, in global `signal_number` order.
    All,
    /// A single named stream, in `stream_version` order.
    Stream(String),
}

impl StreamTarget {
    pub fn stream(id: impl Into<String>) -> Self {
        StreamTarget::Stream(id.into())
    }

    /// Does a signal published to `stream_id` fall under this target?
    pub fn matches(&self, stream_id: &str) -> bool {
        match self {
            StreamTarget::All => true,
            StreamTarget::Stream(id) => id == stream_id,
        }
    }
}

impl fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::All => write!(f, "$all"),
            StreamTarget::Stream(id) => write!(f, "{:?}", id),
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::All => write!(f, "$all"),
            StreamTarget::Stream(id) => write!(f, "{}", id),
        }
    }
}

/// Optimistic concurrency assertion for `publish`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Always succeeds.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must already have at least one signal.
    StreamExists,
    /// The stream's current length must equal this exactly.
    Exact(u64),
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::StreamExists => write!(f, "stream exists"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Where a newly created persistent subscription starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartFrom {
    /// From the first signal in the target.
    Origin,
    /// From the current end of the target (live signals only).
    Current,
    /// From an explicit position (exclusive: delivery begins at the next one).
    Version(u64),
}

/// A signal recorded on the bus. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedSignal {
    /// Unique identifier (assigned by the bus).
    pub signal_id: SignalId,

    /// Bus-global position, gapless from 1. Remapped to `stream_version`
    /// on copies handed out for a single-stream replay or delivery.
    pub signal_number: Sequence,

    /// Owning stream.
    pub stream_id: String,

    /// Stream-local position, gapless from 1.
    pub stream_version: Sequence,

    /// Identifier of the signal that caused this one, if any. Opaque.
    pub causation_id: Option<String>,

    /// Correlation identifier shared across related signals, if any. Opaque.
    pub correlation_id: Option<String>,

    /// Application-defined type tag.
    pub signal_type: String,

    /// Application-defined payload.
    pub data: Vec<u8>,

    /// Payload encoding.
    pub encoding: PayloadEncoding,

    /// Open key/value metadata, opaque to the bus.
    pub metadata: HashMap<String, String>,

    /// When the signal was appended.
    pub created_at: Timestamp,
}

impl RecordedSignal {
    /// Copy of this signal numbered in its stream's local sequence, for
    /// replays and deliveries scoped to one specific stream.
    pub fn localized(&self) -> Self {
        let mut signal = self.clone();
        signal.signal_number = signal.stream_version;
        signal
    }
}

/// Input for publishing a signal (before id/numbers are assigned).
#[derive(Clone, Debug)]
pub struct SignalInput {
    pub signal_type: String,
    pub data: Vec<u8>,
    pub encoding: PayloadEncoding,
    pub causation_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl SignalInput {
    /// Create a signal input with a JSON payload.
    pub fn json(
        signal_type: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            signal_type: signal_type.into(),
            data: serde_json::to_vec(payload)?,
            encoding: PayloadEncoding::Json,
            causation_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
        })
    }

    /// Create a signal input with a MessagePack payload.
    pub fn msgpack(
        signal_type: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            signal_type: signal_type.into(),
            data: rmp_serde::to_vec(payload)?,
            encoding: PayloadEncoding::MessagePack,
            causation_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
        })
    }

    /// Create a signal input with raw bytes.
    pub fn raw(signal_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            signal_type: signal_type.into(),
            data,
            encoding: PayloadEncoding::Raw,
            causation_id: None,
            correlation_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the causation identifier.
    pub fn with_causation(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Set the correlation identifier.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time state blob, independent of stream state. Immutable once
/// recorded; replaced wholesale by recording a newer one for the same key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_id: String,
    pub source_version: Sequence,
    pub source_type: String,
    pub data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub created_at: Timestamp,
}

impl Snapshot {
    /// Build a snapshot stamped with the current time.
    pub fn new(
        source_id: impl Into<String>,
        source_version: Sequence,
        source_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_version,
            source_type: source_type.into(),
            data,
            metadata: HashMap::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Bus statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub stream_count: u64,
    pub signal_count: u64,
    pub snapshot_count: u64,
    pub transient_subscriber_count: u64,
    pub persistent_subscription_count: u64,
    pub persistent_slot_count: u64,
}
