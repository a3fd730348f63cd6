//! Subscription machinery for live signal delivery.
//!
//! Two kinds of subscription share this module:
//!
//! - **Transient** ([`TransientRegistry`]): fire-and-forget pushes of each
//!   published batch to every registered handle. No acknowledgment, bounded
//!   buffers, slow or dead consumers are dropped.
//! - **Persistent** ([`PersistentEngine`]): named, checkpointed subscriptions
//!   with at-least-once delivery, single-in-flight slots, optional
//!   partitioned routing and redelivery after subscriber loss.
//!
//! Both are plain state machines mutated only by the bus coordinator; the
//! coordinator's single-threaded ownership stands in for locks.

mod persistent;
mod transient;

pub use persistent::{PartitionFn, PersistentEngine, PersistentOptions};
pub use transient::TransientRegistry;

pub(crate) use transient::DEFAULT_TRANSIENT_BUFFER;
