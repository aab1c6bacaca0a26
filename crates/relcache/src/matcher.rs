//! Operation matcher: decides what kind of value an operation's path
//! addresses so callers can route it to a handler.

use relcache_path::{format_pointer, META_PREFIX, REL_MARKER};

use crate::schema::Schema;
use crate::types::{OpKind, Operation, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Type,
    Record,
    Attribute,
    Key,
    Link,
    Meta,
}

/// Classifies `path` against the schema.
///
/// Rules apply in order: one segment is a type, two a record; five
/// segments, or four with the relationship marker at index 2, a link; a
/// third segment with the meta prefix is meta; otherwise the third segment
/// must name an attribute or key of the model.
pub fn classify(path: &[String], schema: &Schema) -> Result<ValueKind, SyncError> {
    match path.len() {
        0 => return Err(SyncError::MalformedPath("empty path".to_string())),
        1 => return Ok(ValueKind::Type),
        2 => return Ok(ValueKind::Record),
        5 => return Ok(ValueKind::Link),
        4 if path[2] == REL_MARKER => return Ok(ValueKind::Link),
        _ => {}
    }
    let field = &path[2];
    if field.starts_with(META_PREFIX) {
        return Ok(ValueKind::Meta);
    }
    let model = schema.model(&path[0])?;
    if model.attributes.contains(field) {
        Ok(ValueKind::Attribute)
    } else if model.keys.contains(field) {
        Ok(ValueKind::Key)
    } else {
        Err(SyncError::UnresolvableValueKind(format_pointer(path)))
    }
}

/// An operation paired with its classified value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationMatcher {
    kind: OpKind,
    value_kind: ValueKind,
}

impl OperationMatcher {
    pub fn new(op: &Operation, schema: &Schema) -> Result<Self, SyncError> {
        Ok(Self {
            kind: op.kind,
            value_kind: classify(&op.path, schema)?,
        })
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub fn matches(&self, kind: OpKind, value_kind: ValueKind) -> bool {
        self.kind == kind && self.value_kind == value_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelDefinition;
    use relcache_path::parse_pointer_relaxed as p;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new().with_model(
            "planet",
            ModelDefinition::new()
                .attribute("name")
                .key("remoteId")
                .has_many("moons", "moon", "planet"),
        )
    }

    #[test]
    fn structural_kinds() {
        let schema = schema();
        assert_eq!(classify(&p("planet"), &schema), Ok(ValueKind::Type));
        assert_eq!(classify(&p("planet/1"), &schema), Ok(ValueKind::Record));
        assert_eq!(classify(&p("planet/1/__rel/moons"), &schema), Ok(ValueKind::Link));
        assert_eq!(classify(&p("planet/1/__rel/moons/2"), &schema), Ok(ValueKind::Link));
    }

    #[test]
    fn field_kinds() {
        let schema = schema();
        assert_eq!(classify(&p("planet/1/name"), &schema), Ok(ValueKind::Attribute));
        assert_eq!(classify(&p("planet/1/remoteId"), &schema), Ok(ValueKind::Key));
        assert_eq!(classify(&p("planet/1/id"), &schema), Ok(ValueKind::Key));
        assert_eq!(classify(&p("planet/1/__version"), &schema), Ok(ValueKind::Meta));
    }

    #[test]
    fn unresolvable() {
        let schema = schema();
        assert_eq!(
            classify(&p("planet/1/mass"), &schema),
            Err(SyncError::UnresolvableValueKind("/planet/1/mass".into()))
        );
        assert_eq!(
            classify(&p("star/1/mass"), &schema),
            Err(SyncError::UnknownModel("star".into()))
        );
        assert!(matches!(classify(&[], &schema), Err(SyncError::MalformedPath(_))));
    }

    #[test]
    fn matcher_dispatch() {
        let schema = schema();
        let op = Operation::replace(p("planet/1/name"), json!("Saturn"));
        let matcher = OperationMatcher::new(&op, &schema).unwrap();
        assert!(matcher.matches(OpKind::Replace, ValueKind::Attribute));
        assert!(!matcher.matches(OpKind::Add, ValueKind::Attribute));
        assert_eq!(matcher.value_kind(), ValueKind::Attribute);
    }
}
