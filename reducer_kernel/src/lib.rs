#![forbid(unsafe_code)]

//! Patch-capturing state trees.
//!
//! Every mutation of a `TrackedTree` happens inside an action and is
//! captured as an invertible `Operation`. Committed actions yield a
//! forward/inverse `Patch` pair that feeds either an `UndoManager`
//! (interactive edits) or a persisted operation log (block reducers).

/// Version tag bound into canonical hashes and persisted records.
pub const FORMAT_VERSION: u32 = 1;

pub mod error;
pub mod events;
pub mod hashing;
pub mod interceptor;
pub mod operation;
pub mod path;
pub mod reducer;
pub mod tree;
pub mod undo;

pub use error::{
    ConfigurationError, InterceptError, NormalizeError, PathError, ReducerError, TreeError,
};
pub use events::{Block, Log, RawBlock, RawLog};
pub use hashing::canonical_hash;
pub use interceptor::{Action, ActionId, Recording, TrackedTree};
pub use operation::{OpKind, Operation, Patch};
pub use path::Path;
pub use reducer::{Reducer, ReducerConfig, ReducerKind};
pub use tree::{empty_tree, Mutation};
pub use undo::{HistoryEntry, UndoManager, UndoManagerBuilder};
