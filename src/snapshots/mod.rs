//! Point-in-time snapshot storage, independent of stream state.

mod store;

pub use store::SnapshotStore;
