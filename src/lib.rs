//! # Signal Bus
//!
//! An in-process, append-only signal bus: per-stream logs of immutable
//! records with transient and persistent subscriptions, plus point-in-time
//! snapshots.
//!
//! ## Core Concepts
//!
//! - **Streams**: Named, ordered, append-only sequences of recorded signals,
//!   written under optimistic concurrency control
//! - **Transient subscriptions**: Fire-and-forget pushes of each published
//!   batch, no acknowledgment
//! - **Persistent subscriptions**: Named, checkpointed cursors with
//!   at-least-once delivery, per-slot back-pressure and optional partitioned
//!   routing
//! - **Snapshots**: Keyed state blobs, independent of stream state
//!
//! ## Example
//!
//! ```ignore
//! use signalbus::{Bus, BusConfig, ExpectedVersion, SignalInput, StartFrom, StreamTarget};
//!
//! let bus = Bus::start(BusConfig::default());
//!
//! // Publish to a fresh stream
//! bus.publish(
//!     "orders",
//!     ExpectedVersion::NoStream,
//!     vec![SignalInput::json("order-placed", &serde_json::json!({"total": 42}))?],
//! )?;
//!
//! // Durable, acknowledged consumption
//! let sub = bus.subscribe_persistent(
//!     StreamTarget::stream("orders"),
//!     "billing",
//!     StartFrom::Origin,
//!     Default::default(),
//! )?;
//! let signal = sub.recv()?;
//! sub.ack(&signal)?;
//! ```

pub mod backoff;
pub mod bus;
pub mod error;
pub mod snapshots;
pub mod streams;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backoff::Backoff;
pub use bus::{Bus, BusConfig, PersistentSubscription, TransientSubscription};
pub use error::{BusError, Result};
pub use snapshots::SnapshotStore;
pub use streams::StreamStore;
pub use subscriptions::{PartitionFn, PersistentEngine, PersistentOptions, TransientRegistry};
pub use types::*;
