//! Hand-written protobuf types for the operation log.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are part of the on-disk format; never renumber.
//!
//! ```text
//! message OperationRecord {
//!   uint64 sequence = 1;
//!   string reducer_key = 2;
//!   string patch_id = 3;
//!   string block_hash = 4;
//!   ProtoOperation operation = 5;
//!   RecordKind record_kind = 6;
//!   uint32 format_version = 7;
//! }
//! ```

use prost::Message;

// ── Record ─────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoOperationRecord {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(string, tag = "2")]
    pub reducer_key: String,
    #[prost(string, tag = "3")]
    pub patch_id: String,
    #[prost(string, tag = "4")]
    pub block_hash: String,
    /// Present only for `RecordKind::Operation`.
    #[prost(message, optional, tag = "5")]
    pub operation: Option<ProtoOperation>,
    #[prost(enumeration = "RecordKind", tag = "6")]
    pub record_kind: i32,
    #[prost(uint32, tag = "7")]
    pub format_version: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RecordKind {
    /// One captured operation.
    Operation = 0,
    /// Tombstone: every operation of `block_hash` is void.
    Retraction = 1,
    /// Tombstone: every earlier record of `reducer_key` is void.
    Reset = 2,
}

// ── Operation ──────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoOperation {
    #[prost(enumeration = "OpCode", tag = "1")]
    pub op: i32,
    /// Unescaped path segments.
    #[prost(string, repeated, tag = "2")]
    pub path: Vec<String>,
    /// Compact JSON of the written value (`add`, `replace`).
    #[prost(string, optional, tag = "3")]
    pub value_json: Option<String>,
    /// Compact JSON of the prior value (`remove`, `replace`).
    #[prost(string, optional, tag = "4")]
    pub previous_json: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum OpCode {
    Add = 0,
    Remove = 1,
    Replace = 2,
}
