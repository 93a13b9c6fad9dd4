//! Proto ↔ kernel conversion bridge.
//!
//! Values travel as compact JSON strings inside the protobuf record; paths
//! as their unescaped segments. Decoding never trusts the file: every
//! malformed record is a `StorageError::Corrupt`.

use reducer_kernel::{Operation, Path, FORMAT_VERSION};
use serde_json::Value;

use crate::error::StorageError;
use crate::proto_types::{OpCode, ProtoOperation, ProtoOperationRecord, RecordKind};
use crate::store::StoredOperation;

fn to_json(value: &Value) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Encode(e.to_string()))
}

fn from_json(field: &str, text: Option<&String>) -> Result<Value, StorageError> {
    let text =
        text.ok_or_else(|| StorageError::Corrupt(format!("operation is missing {}", field)))?;
    serde_json::from_str(text)
        .map_err(|e| StorageError::Corrupt(format!("{} is not JSON: {}", field, e)))
}

/// Convert a kernel `Operation` to its protobuf form.
pub fn operation_to_proto(op: &Operation) -> Result<ProtoOperation, StorageError> {
    let path = op.path().segments().to_vec();
    let proto = match op {
        Operation::Add { value, .. } => ProtoOperation {
            op: OpCode::Add as i32,
            path,
            value_json: Some(to_json(value)?),
            previous_json: None,
        },
        Operation::Remove { previous, .. } => ProtoOperation {
            op: OpCode::Remove as i32,
            path,
            value_json: None,
            previous_json: Some(to_json(previous)?),
        },
        Operation::Replace {
            value, previous, ..
        } => ProtoOperation {
            op: OpCode::Replace as i32,
            path,
            value_json: Some(to_json(value)?),
            previous_json: Some(to_json(previous)?),
        },
    };
    Ok(proto)
}

/// Convert a protobuf operation back to the kernel's `Operation`.
pub fn proto_to_operation(proto: &ProtoOperation) -> Result<Operation, StorageError> {
    let path = Path::from_segments(proto.path.iter().cloned())
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let code = OpCode::try_from(proto.op)
        .map_err(|_| StorageError::Corrupt(format!("unknown op code {}", proto.op)))?;
    let op = match code {
        OpCode::Add => Operation::Add {
            path,
            value: from_json("value", proto.value_json.as_ref())?,
        },
        OpCode::Remove => Operation::Remove {
            path,
            previous: from_json("previous", proto.previous_json.as_ref())?,
        },
        OpCode::Replace => Operation::Replace {
            path,
            value: from_json("value", proto.value_json.as_ref())?,
            previous: from_json("previous", proto.previous_json.as_ref())?,
        },
    };
    Ok(op)
}

/// Record for one persisted operation.
pub fn stored_to_proto(stored: &StoredOperation) -> Result<ProtoOperationRecord, StorageError> {
    Ok(ProtoOperationRecord {
        sequence: stored.sequence,
        reducer_key: stored.reducer_key.clone(),
        patch_id: stored.patch_id.clone(),
        block_hash: stored.block_hash.clone(),
        operation: Some(operation_to_proto(&stored.operation)?),
        record_kind: RecordKind::Operation as i32,
        format_version: FORMAT_VERSION,
    })
}

/// Tombstone record (`Retraction` or `Reset`). Carries no operation.
pub fn tombstone(
    sequence: u64,
    kind: RecordKind,
    reducer_key: &str,
    block_hash: &str,
) -> ProtoOperationRecord {
    ProtoOperationRecord {
        sequence,
        reducer_key: reducer_key.to_string(),
        patch_id: String::new(),
        block_hash: block_hash.to_string(),
        operation: None,
        record_kind: kind as i32,
        format_version: FORMAT_VERSION,
    }
}

/// Decode an `Operation` record. Tombstones are handled by the caller.
pub fn proto_to_stored(record: &ProtoOperationRecord) -> Result<StoredOperation, StorageError> {
    let operation = record
        .operation
        .as_ref()
        .ok_or_else(|| {
            StorageError::Corrupt(format!("record {} has no operation", record.sequence))
        })?;
    Ok(StoredOperation {
        sequence: record.sequence,
        reducer_key: record.reducer_key.clone(),
        patch_id: record.patch_id.clone(),
        block_hash: record.block_hash.clone(),
        operation: proto_to_operation(operation)?,
    })
}
