//! Reducer kernel: tree paths.
//!
//! A `Path` is the ordered list of object keys / array indices leading to a
//! location in the state tree, held as an RFC 6901 JSON Pointer
//! (`/balances/0xabc`) built and parsed by `jsonptr`. The root itself is
//! never a valid operation target, so every path has at least one segment.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use jsonptr::{Pointer, PointerBuf};
use serde::{Deserialize, Serialize};

use crate::error::PathError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    pointer: PointerBuf,
    /// Decoded tokens of `pointer`, never empty.
    segments: Vec<String>,
}

impl Path {
    /// Build a path from raw (unescaped) segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self {
            pointer: PointerBuf::from_tokens(segments.iter().map(String::as_str)),
            segments,
        })
    }

    /// Parse a JSON Pointer.
    pub fn parse(pointer: &str) -> Result<Self, PathError> {
        if pointer.is_empty() {
            return Err(PathError::Empty);
        }
        if !pointer.starts_with('/') {
            return Err(PathError::MissingLeadingSlash(pointer.to_string()));
        }
        let pointer =
            PointerBuf::parse(pointer).map_err(|_| PathError::InvalidEscape(pointer.to_string()))?;
        let segments = pointer.tokens().map(|t| t.decoded().into_owned()).collect();
        Ok(Self { pointer, segments })
    }

    /// Encoded pointer text, as accepted by `serde_json::Value::pointer`.
    pub fn as_str(&self) -> &str {
        self.pointer.as_str()
    }

    pub fn as_pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Pointer to the parent container. Empty for a top-level member.
    pub fn parent_pointer(&self) -> PointerBuf {
        let parent = &self.segments[..self.segments.len() - 1];
        PointerBuf::from_tokens(parent.iter().map(String::as_str))
    }

    /// Final segment: the key or index inside the parent.
    pub fn last(&self) -> &str {
        // never empty, enforced by every constructor
        &self.segments[self.segments.len() - 1]
    }

    /// Same parent, different final segment.
    pub fn with_last(&self, last: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        let tail = segments.len() - 1;
        segments[tail] = last.into();
        Self::rebuilt(segments)
    }

    /// Append one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::rebuilt(segments)
    }

    fn rebuilt(segments: Vec<String>) -> Self {
        Self {
            pointer: PointerBuf::from_tokens(segments.iter().map(String::as_str)),
            segments,
        }
    }

    /// The first segment. Reducers conventionally key their top-level
    /// collections here, so storage can bucket operations by it.
    pub fn scope(&self) -> &str {
        &self.segments[0]
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
