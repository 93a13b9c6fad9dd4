//! Reducer kernel: canonical hashing.
//!
//! Deterministic serialization + SHA-256 of a state tree, used to compare a
//! replayed tree against a live one.
//!
//! Rules:
//!   - Object members sorted by key (UTF-8 byte order), recursively
//!   - Array order preserved
//!   - Compact JSON, no whitespace
//!   - `FORMAT_VERSION` bound in as the first field

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::FORMAT_VERSION;

/// Canonical serialization of a tree to UTF-8 JSON bytes.
pub fn canonical_serialize(tree: &Value) -> Vec<u8> {
    let mut root = Map::new();
    root.insert(
        "format_version".to_string(),
        Value::Number((FORMAT_VERSION as u64).into()),
    );
    root.insert("state".to_string(), canonicalize(tree));
    // a Value built from Map/Vec/scalars always serializes
    serde_json::to_vec(&Value::Object(root)).unwrap_or_default()
}

/// SHA-256 of the canonical serialization. Lowercase hex.
pub fn canonical_hash(tree: &Value) -> String {
    let digest = Sha256::digest(canonical_serialize(tree));
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Rebuild `value` with every object's members in sorted key order.
///
/// `serde_json` is built with `preserve_order`, so insertion order would
/// otherwise leak into the bytes.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
