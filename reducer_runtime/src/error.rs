//! Runtime error types.

use std::io;

use reducer_kernel::{ConfigurationError, InterceptError, NormalizeError, ReducerError};
use thiserror::Error;

/// A persistence operation failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on operation log: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt operation log: {0}")]
    Corrupt(String),

    #[error("sequence violation in operation log: expected {expected}, got {got}")]
    Sequence { expected: u64, got: u64 },

    #[error("record format version {found} is not supported (expected {expected})")]
    FormatVersion { found: u32, expected: u32 },

    #[error("cannot encode operation: {0}")]
    Encode(String),

    /// Raised by `MemoryStore` when a write failure was scheduled.
    #[error("injected write failure")]
    Injected,
}

/// The persisted log cannot bring a tree to the requested block.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no persisted operations for block {block_hash} of reducer {reducer_key}")]
    UnknownCheckpoint {
        reducer_key: String,
        block_hash: String,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("persisted operations do not apply: {0}")]
    Apply(#[from] InterceptError),
}

/// The block source could not serve the requested range.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("block {0} is not known to the source")]
    UnknownBlock(String),
}

/// The runner configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Anything that aborts `ReducerRunner::run`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("reducer failed on block {block_hash}: {source}")]
    Reducer {
        block_hash: String,
        source: ReducerError,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Intercept(#[from] InterceptError),
}
