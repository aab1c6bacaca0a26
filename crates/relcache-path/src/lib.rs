//! Record path utilities for relcache.
//!
//! A record path addresses a location in the record cache:
//! `[type]`, `[type, id]`, `[type, id, attribute]`,
//! `[type, id, "__rel", link]` and `[type, id, "__rel", link, member]`.
//! The canonical string form is a JSON pointer (RFC 6901).
//!
//! # Example
//!
//! ```
//! use relcache_path::{format_pointer, parse_pointer_relaxed, rel_path};
//!
//! let path = parse_pointer_relaxed("planet/10/__rel/moons");
//! assert_eq!(path, rel_path("planet", "10", "moons"));
//! assert_eq!(format_pointer(&path), "/planet/10/__rel/moons");
//! ```

use serde_json::Value;
use thiserror::Error;

pub mod types;
pub use types::{Path, PathShape, PathStep, META_PREFIX, REL_MARKER};

pub mod validate;
pub use validate::{validate_path, validate_record_path};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("NO_PARENT")]
    NoParent,
    #[error("POINTER_INVALID")]
    PointerInvalid,
    #[error("Path too long")]
    PathTooLong,
    #[error("Invalid path step")]
    InvalidPathStep,
    #[error("Relationship not specified")]
    MissingLink,
}

/// Unescapes a pointer path component.
///
/// `~1` is replaced with `/` and `~0` is replaced with `~`.
///
/// ```
/// use relcache_path::unescape_component;
///
/// assert_eq!(unescape_component("a~0b"), "a~b");
/// assert_eq!(unescape_component("c~1d"), "c/d");
/// ```
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    // ~1 before ~0
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes a pointer path component.
///
/// ```
/// use relcache_path::escape_component;
///
/// assert_eq!(escape_component("a~b"), "a~0b");
/// assert_eq!(escape_component("c/d"), "c~1d");
/// ```
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse a pointer string into path components.
///
/// ```
/// use relcache_path::parse_pointer;
///
/// assert_eq!(parse_pointer(""), Vec::<String>::new());
/// assert_eq!(parse_pointer("/planet/10"), vec!["planet", "10"]);
/// ```
pub fn parse_pointer(pointer: &str) -> Path {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer[1..].split('/').map(unescape_component).collect()
}

/// Parse a pointer that may lack its leading `/`.
///
/// Remote queues carry paths as plain slash-joined strings
/// (`planet/10/__rel/moons`); both forms produce the same path.
pub fn parse_pointer_relaxed(pointer: &str) -> Path {
    if pointer.starts_with('/') || pointer.is_empty() {
        return parse_pointer(pointer);
    }
    let mut absolute = String::with_capacity(pointer.len() + 1);
    absolute.push('/');
    absolute.push_str(pointer);
    parse_pointer(&absolute)
}

/// Format path components into a pointer string.
///
/// ```
/// use relcache_path::format_pointer;
///
/// assert_eq!(format_pointer(&[]), "");
/// assert_eq!(format_pointer(&["moon".to_string(), "a/b".to_string()]), "/moon/a~1b");
/// ```
pub fn format_pointer(path: &[String]) -> String {
    let mut out = String::with_capacity(path.len() * 8);
    for component in path {
        out.push('/');
        out.push_str(&escape_component(component));
    }
    out
}

/// Read a path from its JSON representation: a pointer string (strict or
/// relaxed) or an array of string segments.
pub fn path_from_json(value: &Value) -> Result<Path, PathError> {
    let path = match value {
        Value::String(s) => parse_pointer_relaxed(s),
        Value::Array(steps) => steps
            .iter()
            .map(|step| match step {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(PathError::InvalidPathStep),
            })
            .collect::<Result<Path, _>>()?,
        _ => return Err(PathError::PointerInvalid),
    };
    validate_path(&path)?;
    Ok(path)
}

/// Get the parent path of a given path.
///
/// ```
/// use relcache_path::parent;
///
/// let path = vec!["planet".to_string(), "10".to_string()];
/// assert_eq!(parent(&path).unwrap(), ["planet"]);
/// assert!(parent(&[]).is_err());
/// ```
pub fn parent(path: &[String]) -> Result<&[String], PathError> {
    match path.split_last() {
        Some((_, rest)) => Ok(rest),
        None => Err(PathError::NoParent),
    }
}

/// Get a value by path. Only object members are traversed.
///
/// Returns `None` if the path doesn't exist.
///
/// ```
/// use relcache_path::get;
/// use serde_json::json;
///
/// let doc = json!({"planet": {"10": {"name": "Saturn"}}});
/// let path = vec!["planet".to_string(), "10".to_string(), "name".to_string()];
/// assert_eq!(get(&doc, &path), Some(&json!("Saturn")));
/// assert_eq!(get(&doc, &["moon".to_string()]), None);
/// ```
pub fn get<'a>(val: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = val;
    for step in path {
        current = current.as_object()?.get(step)?;
    }
    Some(current)
}

/// Get a mutable reference to a value by path.
pub fn get_mut<'a>(val: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = val;
    for step in path {
        current = current.as_object_mut()?.get_mut(step)?;
    }
    Some(current)
}

/// `[model, id]`
pub fn record_path(model: &str, id: &str) -> Path {
    vec![model.to_string(), id.to_string()]
}

/// `[model, id, "__rel", link]`
pub fn rel_path(model: &str, id: &str, link: &str) -> Path {
    vec![
        model.to_string(),
        id.to_string(),
        REL_MARKER.to_string(),
        link.to_string(),
    ]
}

/// `[model, id, "__rel", link, member]`
pub fn member_path(model: &str, id: &str, link: &str, member: &str) -> Path {
    let mut path = rel_path(model, id, link);
    path.push(member.to_string());
    path
}

/// True when segment 2 is the relationship marker.
pub fn touches_relationship(path: &[String]) -> bool {
    path.get(2).is_some_and(|s| s == REL_MARKER)
}
