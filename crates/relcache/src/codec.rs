//! JSON codec for operations.
//!
//! Wire form: `{"id": "...", "op": "add", "path": "/moon/20/__rel/planet",
//! "value": "10"}`. `value` is always written, as `null` when absent, so that
//! stores which drop null-valued keys cannot lose it once the object has been
//! turned into text.

use relcache_path::{format_pointer, path_from_json};
use serde_json::{json, Value};

use crate::types::{OpKind, Operation, SyncError};

// ── Serialization ─────────────────────────────────────────────────────────

pub fn to_json(op: &Operation) -> Value {
    json!({
        "id": op.id,
        "op": op.kind.as_str(),
        "path": format_pointer(&op.path),
        "value": op.value().cloned().unwrap_or(Value::Null),
    })
}

/// JSON text of the operation.
pub fn encode(op: &Operation) -> String {
    to_json(op).to_string()
}

// ── Deserialization ───────────────────────────────────────────────────────

/// Parses an operation. `path` may be a pointer string or an array of
/// segments; a missing `id` is replaced by a fresh one.
pub fn from_json(v: &Value) -> Result<Operation, SyncError> {
    let obj = v
        .as_object()
        .ok_or_else(|| SyncError::Codec("operation must be an object".into()))?;
    let kind: OpKind = obj
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Codec("missing field 'op'".into()))?
        .parse()?;
    let path = obj
        .get("path")
        .ok_or_else(|| SyncError::Codec("missing field 'path'".into()))?;
    let path = path_from_json(path)?;
    let value = obj.get("value").filter(|v| !v.is_null()).cloned();

    let op = Operation::new(kind, path, value);
    match obj.get("id") {
        None | Some(Value::Null) => Ok(op),
        Some(Value::String(id)) => Ok(op.with_id(id.as_str())),
        Some(other) => Err(SyncError::Codec(format!("id must be a string, got {other}"))),
    }
}

pub fn decode(text: &str) -> Result<Operation, SyncError> {
    let v: Value = serde_json::from_str(text).map_err(|e| SyncError::Codec(e.to_string()))?;
    from_json(&v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcache_path::rel_path;

    #[test]
    fn remove_writes_null_value() {
        let op = Operation::remove(rel_path("moon", "20", "planet")).with_id("op-1");
        assert_eq!(
            to_json(&op),
            json!({"id": "op-1", "op": "remove", "path": "/moon/20/__rel/planet", "value": null})
        );
    }

    #[test]
    fn decode_text() {
        let op = decode(r#"{"id":"op-2","op":"add","path":"/moon/20/__rel/planet","value":"10"}"#)
            .unwrap();
        assert_eq!(op.id, "op-2");
        assert_eq!(op.kind, OpKind::Add);
        assert_eq!(op.path, rel_path("moon", "20", "planet"));
        assert_eq!(op.value, Some(json!("10")));
    }

    #[test]
    fn decode_array_path_and_missing_id() {
        let op = from_json(&json!({"op": "remove", "path": ["moon", "20"]})).unwrap();
        assert_eq!(op.path, vec!["moon".to_string(), "20".to_string()]);
        assert!(!op.id.is_empty());
    }

    #[test]
    fn escaped_segments_survive() {
        let op = Operation::add(vec!["planet".into(), "a/b".into()], json!({})).with_id("x");
        let back = decode(&encode(&op)).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn decode_errors() {
        assert!(matches!(decode("not json"), Err(SyncError::Codec(_))));
        assert!(matches!(
            from_json(&json!({"path": "/planet"})),
            Err(SyncError::Codec(_))
        ));
        assert_eq!(
            from_json(&json!({"op": "str_ins", "path": "/planet"})),
            Err(SyncError::UnsupportedOperation("str_ins".into()))
        );
        assert!(matches!(
            from_json(&json!({"op": "add", "path": "/planet", "id": 7})),
            Err(SyncError::Codec(_))
        ));
    }
}
