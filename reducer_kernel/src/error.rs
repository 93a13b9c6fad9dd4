//! Reducer kernel: error types.
//!
//! One enum per layer. Lower layers convert upward through `#[from]`.

use thiserror::Error;

/// A JSON Pointer could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Operations never target the root; a path needs at least one segment.
    #[error("path must contain at least one segment")]
    Empty,

    /// Pointer text did not start with `/`.
    #[error("pointer {0:?} must start with '/'")]
    MissingLeadingSlash(String),

    /// `~` not followed by `0` or `1`.
    #[error("pointer {0:?} contains an invalid '~' escape")]
    InvalidEscape(String),
}

/// An operation could not be applied to the state tree.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("no value at {0}")]
    NotFound(String),

    #[error("a value already exists at {0}")]
    AlreadyExists(String),

    #[error("parent of {0} is not an object or array")]
    NotAContainer(String),

    #[error("segment {segment:?} of {path} is not a valid array index")]
    InvalidIndex { path: String, segment: String },

    #[error("index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    /// The value found in the tree differs from the one the operation
    /// recorded as its prior value.
    #[error("value at {0} does not match the recorded prior value")]
    PriorValueMismatch(String),
}

/// Failures of the mutation interceptor.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterceptError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// The action token was already committed or rolled back.
    #[error("action {0} is no longer open")]
    StaleAction(String),

    /// The recording is suspended; nothing may mutate the tree until the
    /// owning action resumes.
    #[error("recording of action {0} is suspended")]
    Suspended(String),

    /// Patch replay (undo, redo, rehydration) needs an idle tree.
    #[error("cannot replay while action {0} is in flight")]
    ActionInFlight(String),

    /// Operation `index` of a replayed patch failed; the prefix was reverted.
    #[error("replay of patch {patch_id} failed at operation {index}: {source}")]
    Replay {
        patch_id: String,
        index: usize,
        source: TreeError,
    },
}

/// Fatal setup mistakes, reported immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("undo manager needs a target tree")]
    MissingTarget,

    #[error("unknown reducer kind {0:?}")]
    UnknownReducerKind(String),

    #[error("malformed reducer configuration: {0}")]
    Malformed(String),
}

/// A raw upstream block or log could not be normalized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("field {field} is not a hex quantity: {value:?}")]
    InvalidHex { field: &'static str, value: String },

    #[error("log carries {0} topics, at most 4 are allowed")]
    TooManyTopics(usize),
}

/// Error returned by a reducer's transition function.
#[derive(Debug, Error)]
pub enum ReducerError {
    #[error(transparent)]
    Intercept(#[from] InterceptError),

    #[error("reducer failed: {0}")]
    Failed(String),
}

impl From<TreeError> for ReducerError {
    fn from(err: TreeError) -> Self {
        ReducerError::Intercept(InterceptError::Tree(err))
    }
}
