//! Reducer kernel: operation model.
//!
//! Pure data. An `Operation` is one structured mutation of the state tree;
//! a `Patch` is the ordered list of operations one action produced.
//!
//! `remove` and `replace` carry the value that was at the path before the
//! mutation. That makes every operation invertible on its own, without
//! consulting the tree, which is what lets persisted logs be rolled back
//! after an upstream retraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;

/// Discriminant of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

/// A single mutation at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", deny_unknown_fields)]
pub enum Operation {
    Add {
        path: Path,
        value: Value,
    },
    Remove {
        path: Path,
        previous: Value,
    },
    Replace {
        path: Path,
        value: Value,
        previous: Value,
    },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Add { .. } => OpKind::Add,
            Operation::Remove { .. } => OpKind::Remove,
            Operation::Replace { .. } => OpKind::Replace,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Operation::Add { path, .. }
            | Operation::Remove { path, .. }
            | Operation::Replace { path, .. } => path,
        }
    }

    /// Payload written by this operation; `None` for `remove`.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Operation::Add { value, .. } | Operation::Replace { value, .. } => Some(value),
            Operation::Remove { .. } => None,
        }
    }

    /// Value present before the operation; `None` for `add`.
    pub fn previous(&self) -> Option<&Value> {
        match self {
            Operation::Remove { previous, .. } | Operation::Replace { previous, .. } => {
                Some(previous)
            }
            Operation::Add { .. } => None,
        }
    }

    /// The operation that undoes this one.
    ///
    /// `add(p, v) -> remove(p, v)`, `remove(p, prev) -> add(p, prev)`,
    /// `replace(p, new, prev) -> replace(p, prev, new)`.
    pub fn invert(&self) -> Operation {
        match self {
            Operation::Add { path, value } => Operation::Remove {
                path: path.clone(),
                previous: value.clone(),
            },
            Operation::Remove { path, previous } => Operation::Add {
                path: path.clone(),
                value: previous.clone(),
            },
            Operation::Replace {
                path,
                value,
                previous,
            } => Operation::Replace {
                path: path.clone(),
                value: previous.clone(),
                previous: value.clone(),
            },
        }
    }
}

/// Operations produced by one logical action, in mutation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    /// Correlates the patch with the action or upstream transaction that
    /// produced it.
    pub id: String,
    pub operations: Vec<Operation>,
}

impl Patch {
    pub fn new(id: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            id: id.into(),
            operations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Invert every operation and reverse the order. Applying the result
    /// after `self` (or before it) is the identity on the tree.
    pub fn invert(&self) -> Patch {
        Patch {
            id: self.id.clone(),
            operations: self.operations.iter().rev().map(Operation::invert).collect(),
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

    #[test]
    fn inversion_per_kind() {
        let add = Operation::Add { path: p("/x"), value: json!(1) };
        assert_eq!(add.invert(), Operation::Remove { path: p("/x"), previous: json!(1) });
        assert_eq!(add.invert().invert(), add);

        let replace = Operation::Replace { path: p("/x"), value: json!(2), previous: json!(1) };
        assert_eq!(
            replace.invert(),
            Operation::Replace { path: p("/x"), value: json!(1), previous: json!(2) }
        );
    }

    #[test]
    fn patch_inverse_is_reversed() {
        let patch = Patch::new(
            "transfer#1",
            vec![
                Operation::Add { path: p("/a"), value: json!({}) },
                Operation::Add { path: p("/a/b"), value: json!(3) },
            ],
        );
        let inverse = patch.invert();
        assert_eq!(inverse.id, "transfer#1");
        assert_eq!(inverse.operations[0].path(), &p("/a/b"));
        assert_eq!(inverse.operations[1].kind(), OpKind::Remove);
    }

    #[test]
    fn serializes_with_op_tag() {
        let op = Operation::Replace { path: p("/n"), value: json!(2), previous: json!(1) };
        let encoded = serde_json::to_value(&op).unwrap();
        assert_eq!(encoded, json!({"op": "replace", "path": "/n", "value": 2, "previous": 1}));
        let decoded: Operation = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, op);
    }
}
