//! Error types for the signal bus.

use crate::types::{ExpectedVersion, Sequence, SubscriberId};
use thiserror::Error;

/// Main error type for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Wrong expected version for stream {stream_id}: expected {expected}, actual {actual}")]
    WrongExpectedVersion {
        stream_id: String,
        expected: ExpectedVersion,
        actual: Sequence,
    },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Subscription already exists: {0}")]
    SubscriptionAlreadyExists(String),

    #[error("Subscription still has attached subscribers: {0}")]
    SubscriptionInUse(String),

    #[error("Too many subscribers on subscription: {0}")]
    TooManySubscribers(String),

    #[error("Unexpected ack for signal {signal_number} from subscriber {subscriber}")]
    UnexpectedAck {
        subscriber: SubscriberId,
        signal_number: Sequence,
    },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Bus coordinator has terminated")]
    Terminated,
}

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BusError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BusError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BusError::Deserialization(e.to_string())
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
