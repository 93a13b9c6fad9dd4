//! Checkpoint persistence port.
//!
//! A store keeps, per reducer key, the ordered list of operations every
//! reduced block produced. The latest checkpoint of a key is the block of
//! its most recent operation; resuming replays every operation through
//! that block onto a fresh tree.
//!
//! `LiveView` is the folded, in-memory view both stores serve reads from.
//! `MemoryStore` keeps only the view; `OperationLog` also appends every
//! change to a file (see `operation_log`).

use std::cell::Cell;

use reducer_kernel::{Operation, Patch, TrackedTree};

use crate::error::{ReplayError, StorageError};
use crate::replay;

/// One persisted operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOperation {
    pub sequence: u64,
    pub reducer_key: String,
    pub patch_id: String,
    pub block_hash: String,
    pub operation: Operation,
}

/// Latest persisted (block, patch) pair of a reducer.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub block_hash: String,
    pub patch: Patch,
}

/// Persistence port used by the runner.
pub trait CheckpointStore {
    /// `None` when nothing is persisted for `reducer_key`.
    fn latest_checkpoint(&self, reducer_key: &str) -> Result<Option<Checkpoint>, StorageError>;

    /// Durably append one operation. Operations of a patch are written in
    /// mutation order, patches in commit order.
    fn write_operation(
        &mut self,
        reducer_key: &str,
        block_hash: &str,
        patch_id: &str,
        operation: &Operation,
    ) -> Result<(), StorageError>;

    /// Every operation of `reducer_key` up to and including the last one
    /// of `block_hash`, in commit order.
    fn operations_through(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, ReplayError>;

    /// Operations produced by one block. Empty if the block is unknown.
    fn block_operations(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, StorageError>;

    /// Void every operation `block_hash` produced (upstream retraction).
    fn discard_block(&mut self, reducer_key: &str, block_hash: &str) -> Result<(), StorageError>;

    /// Prepare storage for `reducer_key`.
    fn setup(&mut self, reducer_key: &str) -> Result<(), StorageError>;

    /// Drop everything persisted for `reducer_key`.
    fn setdown(&mut self, reducer_key: &str) -> Result<(), StorageError>;

    /// Replay every operation through `block_hash` onto `tree`. Returns the
    /// number of patches applied.
    fn resume_from_event_id(
        &self,
        reducer_key: &str,
        block_hash: &str,
        tree: &mut TrackedTree,
    ) -> Result<usize, ReplayError> {
        let records = self.operations_through(reducer_key, block_hash)?;
        let patches = replay::rehydrate(tree, &records)?;
        tracing::debug!(
            reducer = reducer_key,
            block_hash,
            operations = records.len(),
            patches,
            "state rehydrated"
        );
        Ok(patches)
    }
}

/// Folded view of live (non-voided) operations, in sequence order.
#[derive(Debug, Default, Clone)]
pub struct LiveView {
    records: Vec<StoredOperation>,
}

impl LiveView {
    pub fn push(&mut self, record: StoredOperation) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoredOperation] {
        &self.records
    }

    fn for_key<'a>(
        &'a self,
        reducer_key: &'a str,
    ) -> impl Iterator<Item = &'a StoredOperation> + 'a {
        self.records.iter().filter(move |r| r.reducer_key == reducer_key)
    }

    pub fn latest(&self, reducer_key: &str) -> Option<Checkpoint> {
        let last = self.for_key(reducer_key).last()?;
        let operations = self
            .for_key(reducer_key)
            .filter(|r| r.block_hash == last.block_hash && r.patch_id == last.patch_id)
            .map(|r| r.operation.clone())
            .collect();
        Some(Checkpoint {
            block_hash: last.block_hash.clone(),
            patch: Patch::new(last.patch_id.clone(), operations),
        })
    }

    pub fn through(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, ReplayError> {
        let records: Vec<&StoredOperation> = self.for_key(reducer_key).collect();
        let end = records
            .iter()
            .rposition(|r| r.block_hash == block_hash)
            .ok_or_else(|| ReplayError::UnknownCheckpoint {
                reducer_key: reducer_key.to_string(),
                block_hash: block_hash.to_string(),
            })?;
        Ok(records[..=end].iter().map(|r| (*r).clone()).collect())
    }

    pub fn block(&self, reducer_key: &str, block_hash: &str) -> Vec<StoredOperation> {
        self.for_key(reducer_key)
            .filter(|r| r.block_hash == block_hash)
            .cloned()
            .collect()
    }

    /// Returns how many records were voided.
    pub fn discard_block(&mut self, reducer_key: &str, block_hash: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| !(r.reducer_key == reducer_key && r.block_hash == block_hash));
        before - self.records.len()
    }

    pub fn reset(&mut self, reducer_key: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.reducer_key != reducer_key);
        before - self.records.len()
    }
}

/// Volatile store. Counts calls and can be told to fail writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    view: LiveView,
    next_sequence: u64,
    checkpoint_queries: Cell<usize>,
    setup_calls: usize,
    setdown_calls: usize,
    writes_before_failure: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint_queries(&self) -> usize {
        self.checkpoint_queries.get()
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls
    }

    pub fn setdown_calls(&self) -> usize {
        self.setdown_calls
    }

    pub fn records(&self) -> &[StoredOperation] {
        self.view.records()
    }

    /// Let `successful` more writes through, then fail every write until
    /// `clear_failure` is called.
    pub fn fail_writes_after(&mut self, successful: usize) {
        self.writes_before_failure = Some(successful);
    }

    pub fn clear_failure(&mut self) {
        self.writes_before_failure = None;
    }
}

impl CheckpointStore for MemoryStore {
    fn latest_checkpoint(&self, reducer_key: &str) -> Result<Option<Checkpoint>, StorageError> {
        self.checkpoint_queries.set(self.checkpoint_queries.get() + 1);
        Ok(self.view.latest(reducer_key))
    }

    fn write_operation(
        &mut self,
        reducer_key: &str,
        block_hash: &str,
        patch_id: &str,
        operation: &Operation,
    ) -> Result<(), StorageError> {
        if let Some(remaining) = self.writes_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(StorageError::Injected);
            }
            *remaining -= 1;
        }
        self.next_sequence += 1;
        self.view.push(StoredOperation {
            sequence: self.next_sequence,
            reducer_key: reducer_key.to_string(),
            patch_id: patch_id.to_string(),
            block_hash: block_hash.to_string(),
            operation: operation.clone(),
        });
        Ok(())
    }

    fn operations_through(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, ReplayError> {
        self.view.through(reducer_key, block_hash)
    }

    fn block_operations(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, StorageError> {
        Ok(self.view.block(reducer_key, block_hash))
    }

    fn discard_block(&mut self, reducer_key: &str, block_hash: &str) -> Result<(), StorageError> {
        self.view.discard_block(reducer_key, block_hash);
        Ok(())
    }

    fn setup(&mut self, _reducer_key: &str) -> Result<(), StorageError> {
        self.setup_calls += 1;
        Ok(())
    }

    fn setdown(&mut self, reducer_key: &str) -> Result<(), StorageError> {
        self.setdown_calls += 1;
        self.view.reset(reducer_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reducer_kernel::Path;
    use serde_json::json;

    fn add(path: &str, value: serde_json::Value) -> Operation {
        Operation::Add { path: Path::parse(path).unwrap(), value }
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.write_operation("k", "0xa", "0xa", &add("/a", json!(1))).unwrap();
        store.write_operation("other", "0xa", "0xa", &add("/z", json!(0))).unwrap();
        store.write_operation("k", "0xb", "0xb", &add("/b", json!(2))).unwrap();
        store.write_operation("k", "0xb", "0xb", &add("/c", json!(3))).unwrap();
        store
    }

    #[test]
    fn latest_checkpoint_is_last_block_of_key() {
        let store = seeded();
        let cp = store.latest_checkpoint("k").unwrap().unwrap();
        assert_eq!(cp.block_hash, "0xb");
        assert_eq!(cp.patch.len(), 2);
        assert!(store.latest_checkpoint("missing").unwrap().is_none());
        assert_eq!(store.checkpoint_queries(), 2);
    }

    #[test]
    fn operations_through_stops_at_block() {
        let store = seeded();
        let through_a = store.operations_through("k", "0xa").unwrap();
        assert_eq!(through_a.len(), 1);
        assert_eq!(store.operations_through("k", "0xb").unwrap().len(), 3);
        assert!(matches!(
            store.operations_through("k", "0xdead"),
            Err(ReplayError::UnknownCheckpoint { .. })
        ));
    }

    #[test]
    fn resume_replays_onto_tree() {
        let store = seeded();
        let mut tree = TrackedTree::new(json!({}));
        let patches = store.resume_from_event_id("k", "0xb", &mut tree).unwrap();
        assert_eq!(patches, 2);
        assert_eq!(tree.state(), &json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn discard_and_setdown_are_per_key() {
        let mut store = seeded();
        store.discard_block("k", "0xb").unwrap();
        assert_eq!(store.latest_checkpoint("k").unwrap().unwrap().block_hash, "0xa");
        store.setdown("k").unwrap();
        assert!(store.latest_checkpoint("k").unwrap().is_none());
        assert!(store.latest_checkpoint("other").unwrap().is_some());
        assert_eq!(store.setdown_calls(), 1);
    }

    #[test]
    fn injected_failure_after_n_writes() {
        let mut store = MemoryStore::new();
        store.fail_writes_after(1);
        store.write_operation("k", "0xa", "0xa", &add("/a", json!(1))).unwrap();
        let err = store.write_operation("k", "0xa", "0xa", &add("/b", json!(1))).unwrap_err();
        assert!(matches!(err, StorageError::Injected));
        store.clear_failure();
        store.write_operation("k", "0xa", "0xa", &add("/b", json!(1))).unwrap();
        assert_eq!(store.records().len(), 2);
    }
}
