//! Replay orchestrator: rebuild reducer state from persisted operations.
//!
//! Consecutive records sharing (patch id, block hash) form one patch, so
//! each block is re-applied atomically and in commit order.

use reducer_kernel::{canonical_hash, InterceptError, Patch, TrackedTree};
use serde_json::Value;

use crate::store::StoredOperation;

/// Regroup records into patches, preserving order.
pub fn patches(records: &[StoredOperation]) -> Vec<Patch> {
    let mut out: Vec<(String, Patch)> = Vec::new();
    for record in records {
        match out.last_mut() {
            Some((block_hash, patch))
                if *block_hash == record.block_hash && patch.id == record.patch_id =>
            {
                patch.operations.push(record.operation.clone());
            }
            _ => out.push((
                record.block_hash.clone(),
                Patch::new(record.patch_id.clone(), vec![record.operation.clone()]),
            )),
        }
    }
    out.into_iter().map(|(_, patch)| patch).collect()
}

/// Apply `records` to `tree` without recording. Returns the patch count.
///
/// Stops at the first patch that does not apply; patches before it stay
/// applied, the failing one is reverted.
pub fn rehydrate(
    tree: &mut TrackedTree,
    records: &[StoredOperation],
) -> Result<usize, InterceptError> {
    let patches = patches(records);
    for patch in &patches {
        tree.replay(patch)?;
    }
    Ok(patches.len())
}

/// Rebuild a state from `initial` and return it with its canonical hash.
///
/// Pure function of its inputs.
pub fn rebuild_state(
    initial: Value,
    records: &[StoredOperation],
) -> Result<(Value, String), InterceptError> {
    let mut tree = TrackedTree::new(initial);
    rehydrate(&mut tree, records)?;
    let state = tree.into_state();
    let hash = canonical_hash(&state);
    Ok((state, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reducer_kernel::{Operation, Path};
    use serde_json::json;

    fn record(seq: u64, block: &str, path: &str, value: Value) -> StoredOperation {
        StoredOperation {
            sequence: seq,
            reducer_key: "k".into(),
            patch_id: block.into(),
            block_hash: block.into(),
            operation: Operation::Add { path: Path::parse(path).unwrap(), value },
        }
    }

    #[test]
    fn consecutive_records_group_by_block() {
        let records = vec![
            record(1, "0x1", "/a", json!(1)),
            record(2, "0x1", "/b", json!(2)),
            record(3, "0x2", "/c", json!(3)),
        ];
        let grouped = patches(&records);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].len(), 2);
        assert_eq!(grouped[1].id, "0x2");
    }

    #[test]
    fn rebuild_is_deterministic() {
        let records = vec![record(1, "0x1", "/a", json!(1)), record(2, "0x2", "/b", json!([]))];
        let (s1, h1) = rebuild_state(json!({}), &records).unwrap();
        let (s2, h2) = rebuild_state(json!({}), &records).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(h1, h2);
        assert_eq!(s1, json!({"a": 1, "b": []}));
    }

    #[test]
    fn inconsistent_log_fails_atomically_per_patch() {
        let records = vec![
            record(1, "0x1", "/a", json!(1)),
            record(2, "0x2", "/b", json!(2)),
            record(3, "0x2", "/a", json!(9)),
        ];
        let mut tree = TrackedTree::new(json!({}));
        let err = rehydrate(&mut tree, &records).unwrap_err();
        assert!(matches!(err, InterceptError::Replay { index: 1, .. }));
        assert_eq!(tree.state(), &json!({"a": 1}));
    }
}
