//! Append-only stream storage.
//!
//! One global log of every signal in publish order, plus a per-stream index
//! mapping each named stream to its slice of the global log. Writes go
//! through optimistic concurrency control; reads are positional.

mod store;

pub use store::StreamStore;
