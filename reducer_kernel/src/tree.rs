//! Reducer kernel: state tree mutation.
//!
//! The state tree is a `serde_json::Value` with an object at the root.
//! Locations resolve through `Value::pointer`; this module adds the strict
//! container and prior-value rules. Two steps per mutation:
//!   1. `plan` turns a caller's intent (set, insert, push, remove, replace)
//!      into a concrete, invertible `Operation`, reading prior values.
//!   2. `apply` executes an `Operation` strictly: parents must exist,
//!      `add` never overwrites, and `remove`/`replace` verify the recorded
//!      prior value. A log that does not match the tree fails loudly.

use serde_json::{Map, Value};

use crate::error::TreeError;
use crate::operation::Operation;
use crate::path::Path;

/// Create a fresh, empty state tree.
pub fn empty_tree() -> Value {
    Value::Object(Map::new())
}

/// A mutation as requested by reducer or interactive code.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Write `value`, adding the member/element or replacing the current one.
    Set { path: Path, value: Value },
    /// Add a new member, or insert into an array (`-` appends).
    Insert { path: Path, value: Value },
    /// Append to the array at `path`.
    Push { path: Path, value: Value },
    Remove { path: Path },
    /// Overwrite an existing value.
    Replace { path: Path, value: Value },
}

/// Read the value at `path`.
pub fn get<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    root.pointer(path.as_str())
}

/// Array indices are plain decimal: no sign, no leading zeros.
fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment.parse().ok()
}

fn index_in(path: &Path, len: usize, allow_end: bool) -> Result<usize, TreeError> {
    let segment = path.last();
    if allow_end && segment == "-" {
        return Ok(len);
    }
    let index = parse_index(segment).ok_or_else(|| TreeError::InvalidIndex {
        path: path.to_string(),
        segment: segment.to_string(),
    })?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if index > limit || (!allow_end && len == 0) {
        return Err(TreeError::IndexOutOfBounds {
            path: path.to_string(),
            index,
            len,
        });
    }
    Ok(index)
}

fn parent_of<'a>(root: &'a Value, path: &Path) -> Result<&'a Value, TreeError> {
    let parent = path.parent_pointer();
    root.pointer(parent.as_str())
        .ok_or_else(|| TreeError::NotFound(parent.as_str().to_string()))
}

fn parent_of_mut<'a>(root: &'a mut Value, path: &Path) -> Result<&'a mut Value, TreeError> {
    let parent = path.parent_pointer();
    root.pointer_mut(parent.as_str())
        .ok_or_else(|| TreeError::NotFound(parent.as_str().to_string()))
}

/// Turn an intent into the concrete operation it performs on `root`.
pub fn plan(root: &Value, mutation: Mutation) -> Result<Operation, TreeError> {
    match mutation {
        Mutation::Set { path, value } => match parent_of(root, &path)? {
            Value::Object(map) => Ok(match map.get(path.last()) {
                Some(previous) => Operation::Replace {
                    previous: previous.clone(),
                    path,
                    value,
                },
                None => Operation::Add { path, value },
            }),
            Value::Array(items) => {
                let index = index_in(&path, items.len(), true)?;
                Ok(match items.get(index) {
                    Some(previous) => Operation::Replace {
                        previous: previous.clone(),
                        path: path.with_last(index.to_string()),
                        value,
                    },
                    None => Operation::Add {
                        path: path.with_last(index.to_string()),
                        value,
                    },
                })
            }
            _ => Err(TreeError::NotAContainer(path.to_string())),
        },
        Mutation::Insert { path, value } => match parent_of(root, &path)? {
            Value::Object(map) => {
                if map.contains_key(path.last()) {
                    return Err(TreeError::AlreadyExists(path.to_string()));
                }
                Ok(Operation::Add { path, value })
            }
            Value::Array(items) => {
                let index = index_in(&path, items.len(), true)?;
                Ok(Operation::Add {
                    path: path.with_last(index.to_string()),
                    value,
                })
            }
            _ => Err(TreeError::NotAContainer(path.to_string())),
        },
        Mutation::Push { path, value } => match get(root, &path) {
            Some(Value::Array(items)) => Ok(Operation::Add {
                path: path.child(items.len().to_string()),
                value,
            }),
            Some(_) => Err(TreeError::NotAContainer(path.child("-").to_string())),
            None => Err(TreeError::NotFound(path.to_string())),
        },
        Mutation::Remove { path } => {
            let previous = get(root, &path)
                .cloned()
                .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
            Ok(Operation::Remove { path, previous })
        }
        Mutation::Replace { path, value } => {
            let previous = get(root, &path)
                .cloned()
                .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
            Ok(Operation::Replace {
                path,
                value,
                previous,
            })
        }
    }
}

/// Execute `op` against `root`. On error the tree is unchanged.
pub fn apply(root: &mut Value, op: &Operation) -> Result<(), TreeError> {
    match op {
        Operation::Add { path, value } => match parent_of_mut(root, path)? {
            Value::Object(map) => {
                if map.contains_key(path.last()) {
                    return Err(TreeError::AlreadyExists(path.to_string()));
                }
                map.insert(path.last().to_string(), value.clone());
                Ok(())
            }
            Value::Array(items) => {
                let index = parse_index(path.last()).ok_or_else(|| TreeError::InvalidIndex {
                    path: path.to_string(),
                    segment: path.last().to_string(),
                })?;
                if index > items.len() {
                    return Err(TreeError::IndexOutOfBounds {
                        path: path.to_string(),
                        index,
                        len: items.len(),
                    });
                }
                items.insert(index, value.clone());
                Ok(())
            }
            _ => Err(TreeError::NotAContainer(path.to_string())),
        },
        Operation::Remove { path, previous } => match parent_of_mut(root, path)? {
            Value::Object(map) => {
                match map.get(path.last()) {
                    None => return Err(TreeError::NotFound(path.to_string())),
                    Some(current) if current != previous => {
                        return Err(TreeError::PriorValueMismatch(path.to_string()))
                    }
                    Some(_) => {}
                }
                map.remove(path.last());
                Ok(())
            }
            Value::Array(items) => {
                let index = index_in(path, items.len(), false)?;
                if &items[index] != previous {
                    return Err(TreeError::PriorValueMismatch(path.to_string()));
                }
                items.remove(index);
                Ok(())
            }
            _ => Err(TreeError::NotAContainer(path.to_string())),
        },
        Operation::Replace {
            path,
            value,
            previous,
        } => {
            let slot = root
                .pointer_mut(path.as_str())
                .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
            if *slot != *previous {
                return Err(TreeError::PriorValueMismatch(path.to_string()));
            }
            *slot = value.clone();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn set(root: &mut Value, path: &str, value: Value) -> Operation {
        let op = plan(root, Mutation::Set { path: p(path), value }).unwrap();
        apply(root, &op).unwrap();
        op
    }

    #[test]
    fn set_adds_then_replaces() {
        let mut root = empty_tree();
        let first = set(&mut root, "/x", json!(1));
        assert_eq!(first, Operation::Add { path: p("/x"), value: json!(1) });
        let second = set(&mut root, "/x", json!(2));
        assert_eq!(
            second,
            Operation::Replace { path: p("/x"), value: json!(2), previous: json!(1) }
        );
        assert_eq!(root, json!({"x": 2}));
    }

    #[test]
    fn push_records_concrete_index() {
        let mut root = json!({"items": [1, 2]});
        let op = plan(&root, Mutation::Push { path: p("/items"), value: json!(3) }).unwrap();
        assert_eq!(op.path(), &p("/items/2"));
        apply(&mut root, &op).unwrap();
        assert_eq!(root, json!({"items": [1, 2, 3]}));
    }

    #[test]
    fn insert_dash_appends() {
        let mut root = json!({"items": []});
        let op = plan(&root, Mutation::Insert { path: p("/items/-"), value: json!("a") }).unwrap();
        apply(&mut root, &op).unwrap();
        assert_eq!(root, json!({"items": ["a"]}));
    }

    #[test]
    fn remove_captures_previous() {
        let mut root = json!({"a": {"b": [1, 2]}});
        let op = plan(&root, Mutation::Remove { path: p("/a/b/0") }).unwrap();
        assert_eq!(op.previous(), Some(&json!(1)));
        apply(&mut root, &op).unwrap();
        assert_eq!(root, json!({"a": {"b": [2]}}));
        apply(&mut root, &op.invert()).unwrap();
        assert_eq!(root, json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let root = empty_tree();
        let err = plan(&root, Mutation::Set { path: p("/a/b"), value: json!(1) }).unwrap_err();
        assert_eq!(err, TreeError::NotFound("/a".into()));
    }

    #[test]
    fn strict_apply_detects_mismatch() {
        let mut root = json!({"x": 5});
        let stale = Operation::Replace { path: p("/x"), value: json!(6), previous: json!(4) };
        assert_eq!(apply(&mut root, &stale), Err(TreeError::PriorValueMismatch("/x".into())));
        let dup = Operation::Add { path: p("/x"), value: json!(1) };
        assert_eq!(apply(&mut root, &dup), Err(TreeError::AlreadyExists("/x".into())));
        assert_eq!(root, json!({"x": 5}));
    }

    #[test]
    fn array_bounds_are_checked() {
        let root = json!({"items": [1]});
        let replace = Mutation::Replace { path: p("/items/3"), value: json!(0) };
        let err = plan(&root, replace).unwrap_err();
        assert_eq!(err, TreeError::NotFound("/items/3".into()));
        let insert = Mutation::Insert { path: p("/items/05"), value: json!(0) };
        let err = plan(&root, insert).unwrap_err();
        assert!(matches!(err, TreeError::InvalidIndex { .. }));
    }
}
