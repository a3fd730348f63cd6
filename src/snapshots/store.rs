//! Keyed snapshot store. Last write wins; no version conflict checks.

use crate::error::{BusError, Result};
use crate::types::Snapshot;
use std::collections::HashMap;

/// Stores the most recent snapshot per `source_id`.
///
/// Callers are responsible for monotonic `source_version` if that matters to
/// them; the store only ever replaces whole values.
#[derive(Default)]
pub struct SnapshotStore {
    snapshots: HashMap<String, Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the snapshot for a source.
    pub fn read(&self, source_id: &str) -> Result<Snapshot> {
        self.snapshots
            .get(source_id)
            .cloned()
            .ok_or_else(|| BusError::SnapshotNotFound(source_id.to_string()))
    }

    /// Record a snapshot, overwriting any previous one for the same source.
    pub fn record(&mut self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.source_id.clone(), snapshot);
    }

    /// Delete the snapshot for a source. Deleting a missing snapshot is ok.
    pub fn delete(&mut self, source_id: &str) {
        self.snapshots.remove(source_id);
    }

    pub fn count(&self) -> u64 {
        self.snapshots.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sequence;

    #[test]
    fn test_record_read_roundtrip() {
        let mut store = SnapshotStore::new();
        let snapshot = Snapshot::new("account-1", Sequence(5), "account", b"{}".to_vec())
            .with_metadata("origin", "test");

        store.record(snapshot.clone());
        assert_eq!(store.read("account-1").unwrap(), snapshot);
    }

    #[test]
    fn test_overwrite_by_source_id() {
        let mut store = SnapshotStore::new();
        store.record(Snapshot::new("account-1", Sequence(5), "account", b"a".to_vec()));
        store.record(Snapshot::new("account-1", Sequence(9), "account", b"b".to_vec()));

        let read = store.read("account-1").unwrap();
        assert_eq!(read.source_version, Sequence(9));
        assert_eq!(read.data, b"b".to_vec());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_delete_then_read_is_not_found() {
        let mut store = SnapshotStore::new();
        store.record(Snapshot::new("account-1", Sequence(1), "account", Vec::new()));

        store.delete("account-1");
        assert!(matches!(
            store.read("account-1"),
            Err(BusError::SnapshotNotFound(_))
        ));

        // Deleting again stays ok
        store.delete("account-1");
    }
}
