//! Reducer kernel: reducer contract.
//!
//! A reducer folds blocks into its own state tree. Each block is reduced
//! inside one transaction action whose patch id is the block hash, so the
//! operations it produces can be persisted, replayed and retracted.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigurationError, ReducerError};
use crate::events::Block;
use crate::interceptor::Action;
use crate::tree::empty_tree;

/// How a reducer's state relates to the chain it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReducerKind {
    /// Output depends only on the current block; never resumes.
    Idempotent,
    /// Output depends on history; resumes from its checkpoint.
    TimeVarying,
    /// All-or-nothing per block; resumes from its checkpoint.
    Atomic,
}

impl ReducerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReducerKind::Idempotent => "idempotent",
            ReducerKind::TimeVarying => "time_varying",
            ReducerKind::Atomic => "atomic",
        }
    }

    /// `false` only for `Idempotent`.
    pub fn resumes(&self) -> bool {
        !matches!(self, ReducerKind::Idempotent)
    }
}

impl fmt::Display for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReducerKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idempotent" => Ok(ReducerKind::Idempotent),
            "time_varying" => Ok(ReducerKind::TimeVarying),
            "atomic" => Ok(ReducerKind::Atomic),
            other => Err(ConfigurationError::UnknownReducerKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for ReducerKind {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReducerKind> for String {
    fn from(kind: ReducerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Identity and resumption behaviour of one reducer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Namespaces the reducer's persisted operations.
    pub key: String,
    pub kind: ReducerKind,
}

impl ReducerConfig {
    pub fn new(key: impl Into<String>, kind: ReducerKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }

    /// Parse from JSON. An unknown `kind` is a `ConfigurationError`.
    pub fn from_value(value: Value) -> Result<Self, ConfigurationError> {
        #[derive(Deserialize)]
        struct Raw {
            key: String,
            kind: String,
        }
        let raw: Raw = serde_json::from_value(value)
            .map_err(|e| ConfigurationError::Malformed(e.to_string()))?;
        Ok(Self {
            key: raw.key,
            kind: raw.kind.parse()?,
        })
    }
}

/// Transition function over blocks.
///
/// `reduce` may await; while awaiting I/O it may `suspend` the action, which
/// refuses every mutation of the tree until it calls `resume`. Implementations may write `async fn reduce`; the future
/// must be `Send` so a runner can be spawned on a multi-threaded runtime.
pub trait Reducer {
    fn config(&self) -> &ReducerConfig;

    /// Tree every run starts from before any replay.
    fn initial_state(&self) -> Value {
        empty_tree()
    }

    fn reduce(
        &mut self,
        action: &mut Action<'_>,
        block: &Block,
    ) -> impl Future<Output = Result<(), ReducerError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_parse_from_config() {
        let cfg =
            ReducerConfig::from_value(json!({"key": "balances", "kind": "time_varying"})).unwrap();
        assert_eq!(cfg.kind, ReducerKind::TimeVarying);
        assert!(cfg.kind.resumes());
        assert!(!ReducerKind::Idempotent.resumes());

        let serde_cfg: ReducerConfig =
            serde_json::from_value(json!({"key": "k", "kind": "atomic"})).unwrap();
        assert_eq!(serde_cfg.kind, ReducerKind::Atomic);
        assert_eq!(serde_json::to_value(&serde_cfg).unwrap()["kind"], "atomic");
    }

    #[test]
    fn unknown_kind_is_a_configuration_error() {
        let err = ReducerConfig::from_value(json!({"key": "k", "kind": "eventual"})).unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownReducerKind("eventual".into()));
        assert!(serde_json::from_value::<ReducerConfig>(json!({"key": "k", "kind": "x"})).is_err());
    }
}
