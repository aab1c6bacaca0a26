//! Core types: errors, operation kinds and operations.

use std::fmt;
use std::str::FromStr;

use relcache_path::{format_pointer, Path, PathError};
use serde_json::Value;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown link: {model}/{link}")]
    UnknownLink { model: String, link: String },
    #[error("unsupported link kind: {0}")]
    UnsupportedLinkKind(String),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("malformed path: {0}")]
    MalformedPath(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unable to determine value type at: {0}")]
    UnresolvableValueKind(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("operation must have an id")]
    MissingOperationId,
    #[error("codec: {0}")]
    Codec(String),
    #[error("transport: {0}")]
    Transport(String),
}

impl From<PathError> for SyncError {
    fn from(err: PathError) -> Self {
        SyncError::MalformedPath(err.to_string())
    }
}

impl SyncError {
    pub(crate) fn unknown_link(model: &str, link: &str) -> Self {
        SyncError::UnknownLink {
            model: model.to_string(),
            link: link.to_string(),
        }
    }
}

// ── Operation kind ────────────────────────────────────────────────────────

/// Patch operation kind. `Copy`, `Move` and `Test` parse but are rejected by
/// the cache and the decomposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Remove,
    Replace,
    Copy,
    Move,
    Test,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
            OpKind::Copy => "copy",
            OpKind::Move => "move",
            OpKind::Test => "test",
        }
    }

    /// True for the kinds the cache can apply.
    pub fn is_supported(&self) -> bool {
        matches!(self, OpKind::Add | OpKind::Remove | OpKind::Replace)
    }
}

impl FromStr for OpKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(OpKind::Add),
            "remove" => Ok(OpKind::Remove),
            "replace" => Ok(OpKind::Replace),
            "copy" => Ok(OpKind::Copy),
            "move" => Ok(OpKind::Move),
            "test" => Ok(OpKind::Test),
            other => Err(SyncError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Operation ─────────────────────────────────────────────────────────────

/// A single mutation addressed by a record path.
///
/// `id` identifies the logical mutation end to end; it must survive
/// re-delivery unchanged so that subscribers can drop duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: String,
    pub kind: OpKind,
    pub path: Path,
    pub value: Option<Value>,
}

impl Operation {
    /// Creates an operation with a fresh random id.
    pub fn new(kind: OpKind, path: Path, value: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            path,
            value,
        }
    }

    pub fn add(path: Path, value: Value) -> Self {
        Self::new(OpKind::Add, path, Some(value))
    }

    pub fn remove(path: Path) -> Self {
        Self::new(OpKind::Remove, path, None)
    }

    pub fn replace(path: Path, value: Value) -> Self {
        Self::new(OpKind::Replace, path, Some(value))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Canonical pointer form of the path.
    pub fn pointer(&self) -> String {
        format_pointer(&self.path)
    }

    /// Value with JSON `null` folded into `None`.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }

    /// Compares kind, path and value, ignoring the id.
    pub fn same_change(&self, other: &Operation) -> bool {
        self.kind == other.kind && self.path == other.path && self.value() == other.value()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}", self.kind, self.pointer())?;
        if let Some(value) = self.value() {
            write!(f, ", {value}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcache_path::rel_path;
    use serde_json::json;

    #[test]
    fn op_kind_parse() {
        assert_eq!("replace".parse::<OpKind>(), Ok(OpKind::Replace));
        assert_eq!(
            "str_ins".parse::<OpKind>(),
            Err(SyncError::UnsupportedOperation("str_ins".into()))
        );
        assert!(!OpKind::Move.is_supported());
    }

    #[test]
    fn fresh_ids_differ() {
        let a = Operation::remove(rel_path("moon", "20", "planet"));
        let b = Operation::remove(rel_path("moon", "20", "planet"));
        assert_ne!(a.id, b.id);
        assert!(a.same_change(&b));
    }

    #[test]
    fn null_value_counts_as_absent() {
        let a = Operation::new(OpKind::Remove, rel_path("moon", "20", "planet"), Some(Value::Null));
        let b = Operation::remove(rel_path("moon", "20", "planet"));
        assert!(a.same_change(&b));
    }

    #[test]
    fn display() {
        let op = Operation::add(rel_path("moon", "20", "planet"), json!("10"));
        assert_eq!(op.to_string(), "[add, /moon/20/__rel/planet, \"10\"]");
    }
}
