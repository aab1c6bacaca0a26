//! Path-addressed record cache.
//!
//! The cache is a sparse, demand-populated view of the remote record graph.
//! Failing to find a path locally is an expected condition: `retrieve`
//! returns `None` and `apply` skips the mutation, but the operation is still
//! reported to observers as applied.

use std::sync::Arc;

use relcache_path::{get, get_mut, parent, rel_path, validate_record_path, PathShape};
use serde_json::{Map, Value};
use tracing::trace;

use crate::schema::Schema;
use crate::types::{OpKind, Operation, SyncError};

/// Receives every operation passed through [`Cache::apply`].
pub trait CacheObserver: Send + Sync {
    fn did_apply(&self, op: &Operation);
}

impl<F> CacheObserver for F
where
    F: Fn(&Operation) + Send + Sync,
{
    fn did_apply(&self, op: &Operation) {
        self(op)
    }
}

/// Whether an applied operation changed the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Mutated,
    Skipped,
}

/// Current value of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkValue {
    One(String),
    Many(Vec<String>),
}

pub struct Cache {
    doc: Value,
    observers: Vec<Arc<dyn CacheObserver>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            doc: Value::Object(Map::new()),
            observers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("doc", &self.doc)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Cache {
    /// Creates a cache holding one empty collection per schema model.
    pub fn new(schema: &Schema) -> Self {
        let types = schema
            .models()
            .map(|(name, _)| (name.to_string(), Value::Object(Map::new())))
            .collect();
        Self {
            doc: Value::Object(types),
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: Arc<dyn CacheObserver>) {
        self.observers.push(observer);
    }

    /// The whole tree.
    pub fn doc(&self) -> &Value {
        &self.doc
    }

    /// Value at `path`; `null` counts as absent.
    pub fn retrieve(&self, path: &[String]) -> Option<&Value> {
        get(&self.doc, path).filter(|v| !v.is_null())
    }

    pub fn contains(&self, path: &[String]) -> bool {
        self.retrieve(path).is_some()
    }

    /// True when `path` exists in the tree, even if it holds `null`.
    fn holds(&self, path: &[String]) -> bool {
        get(&self.doc, path).is_some()
    }

    /// Id stored at a toOne link path.
    pub fn retrieve_id(&self, path: &[String]) -> Option<String> {
        self.retrieve(path)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Member ids stored at a toMany link path, in insertion order.
    pub fn retrieve_members(&self, path: &[String]) -> Vec<String> {
        match self.retrieve(path) {
            Some(Value::Object(members)) => members.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn retrieve_link(&self, model: &str, id: &str, link: &str) -> Option<LinkValue> {
        match self.retrieve(&rel_path(model, id, link))? {
            Value::String(id) => Some(LinkValue::One(id.clone())),
            Value::Object(members) => Some(LinkValue::Many(members.keys().cloned().collect())),
            _ => None,
        }
    }

    /// Applies one operation.
    ///
    /// `add` needs the parent path to exist, `remove` and `replace` need the
    /// exact path. A path holding `null` exists here, unlike in
    /// [`retrieve`](Self::retrieve). A `replace` of a missing path is retried
    /// as an `add`; other misses are skipped. Observers see the operation in
    /// both cases.
    pub fn apply(&mut self, op: &Operation) -> Result<Outcome, SyncError> {
        validate_operation(op)?;

        let mut effective = None;
        let outcome = match op.kind {
            OpKind::Add => self.mutate(OpKind::Add, &op.path, op.value.clone()),
            OpKind::Remove => self.mutate(OpKind::Remove, &op.path, None),
            OpKind::Replace if self.holds(&op.path) => {
                self.mutate(OpKind::Replace, &op.path, op.value.clone())
            }
            OpKind::Replace => {
                let mut add = op.clone();
                add.kind = OpKind::Add;
                let outcome = self.mutate(OpKind::Add, &add.path, add.value.clone());
                effective = Some(add);
                outcome
            }
            OpKind::Copy | OpKind::Move | OpKind::Test => {
                return Err(SyncError::UnsupportedOperation(op.kind.to_string()))
            }
        };

        if outcome == Outcome::Skipped {
            trace!(op = %op, "cache miss, mutation skipped");
        }
        let notified = effective.as_ref().unwrap_or(op);
        for observer in &self.observers {
            observer.did_apply(notified);
        }
        Ok(outcome)
    }

    fn mutate(&mut self, kind: OpKind, path: &[String], value: Option<Value>) -> Outcome {
        let Ok(parent_path) = parent(path) else {
            return Outcome::Skipped;
        };
        let key = &path[path.len() - 1];
        let exists = self.holds(path);
        let Some(Value::Object(map)) = get_mut(&mut self.doc, parent_path) else {
            return Outcome::Skipped;
        };
        match kind {
            OpKind::Add => {
                map.insert(key.clone(), value.unwrap_or(Value::Null));
                Outcome::Mutated
            }
            OpKind::Remove | OpKind::Replace if !exists => Outcome::Skipped,
            OpKind::Remove => {
                map.shift_remove(key);
                Outcome::Mutated
            }
            OpKind::Replace => {
                map.insert(key.clone(), value.unwrap_or(Value::Null));
                Outcome::Mutated
            }
            _ => Outcome::Skipped,
        }
    }
}

/// Rejects kinds outside add/remove/replace and paths that stop at the
/// relationship marker.
pub fn validate_operation(op: &Operation) -> Result<(), SyncError> {
    if !op.kind.is_supported() {
        return Err(SyncError::UnsupportedOperation(op.kind.to_string()));
    }
    if op.path.is_empty() {
        return Err(SyncError::MalformedPath("empty path".to_string()));
    }
    if PathShape::of(&op.path) == PathShape::BareMarker {
        return Err(SyncError::MalformedPath(format!(
            "relationship not specified: {}",
            op.pointer()
        )));
    }
    validate_record_path(&op.path)?;
    Ok(())
}

/// Builds a cache from a list of paths and values; used by tests.
#[cfg(test)]
pub(crate) fn cache_with(schema: &Schema, entries: &[(relcache_path::Path, Value)]) -> Cache {
    let mut cache = Cache::new(schema);
    for (path, value) in entries {
        cache
            .apply(&Operation::add(path.clone(), value.clone()))
            .unwrap();
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelDefinition;
    use relcache_path::{member_path, record_path};
    use serde_json::json;
    use std::sync::Mutex;

    fn schema() -> Schema {
        Schema::new()
            .with_model(
                "planet",
                ModelDefinition::new()
                    .attribute("name")
                    .has_many("moons", "moon", "planet"),
            )
            .with_model(
                "moon",
                ModelDefinition::new().has_one("planet", "planet", "moons"),
            )
    }

    fn saturn() -> Value {
        json!({"id": "10", "name": "Saturn", "__rel": {"moons": {}}})
    }

    #[test]
    fn add_then_retrieve() {
        let mut cache = Cache::new(&schema());
        let outcome = cache.apply(&Operation::add(record_path("planet", "10"), saturn())).unwrap();
        assert_eq!(outcome, Outcome::Mutated);
        assert_eq!(cache.retrieve(&record_path("planet", "10")), Some(&saturn()));
    }

    #[test]
    fn add_without_parent_is_skipped() {
        let mut cache = Cache::new(&schema());
        let op = Operation::add(member_path("planet", "10", "moons", "20"), json!(true));
        assert_eq!(cache.apply(&op).unwrap(), Outcome::Skipped);
        assert_eq!(cache.doc(), &json!({"planet": {}, "moon": {}}));
    }

    #[test]
    fn remove_missing_path_leaves_state() {
        let mut cache = cache_with(&schema(), &[(record_path("planet", "10"), saturn())]);
        let before = cache.doc().clone();
        let op = Operation::remove(member_path("planet", "10", "moons", "20"));
        assert_eq!(cache.apply(&op).unwrap(), Outcome::Skipped);
        assert_eq!(cache.doc(), &before);
    }

    #[test]
    fn remove_existing_path() {
        let mut cache = cache_with(
            &schema(),
            &[
                (record_path("planet", "10"), saturn()),
                (member_path("planet", "10", "moons", "20"), json!(true)),
            ],
        );
        cache.apply(&Operation::remove(member_path("planet", "10", "moons", "20"))).unwrap();
        assert!(cache.retrieve_members(&rel_path("planet", "10", "moons")).is_empty());
    }

    #[test]
    fn replace_existing_attribute() {
        let mut cache = cache_with(&schema(), &[(record_path("planet", "10"), saturn())]);
        let path = vec!["planet".to_string(), "10".to_string(), "name".to_string()];
        cache.apply(&Operation::replace(path.clone(), json!("Jupiter"))).unwrap();
        assert_eq!(cache.retrieve(&path), Some(&json!("Jupiter")));
    }

    #[test]
    fn replace_missing_path_becomes_add() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut cache = cache_with(&schema(), &[(record_path("planet", "10"), saturn())]);
        let sink = seen.clone();
        cache.observe(Arc::new(move |op: &Operation| sink.lock().unwrap().push(op.clone())));

        let path = vec!["planet".to_string(), "10".to_string(), "classification".to_string()];
        let op = Operation::replace(path.clone(), json!("gas giant"));
        assert_eq!(cache.apply(&op).unwrap(), Outcome::Mutated);
        assert_eq!(cache.retrieve(&path), Some(&json!("gas giant")));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, OpKind::Add);
        assert_eq!(seen[0].id, op.id);
    }

    #[test]
    fn replace_of_null_link_stays_replace() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut cache = cache_with(
            &schema(),
            &[(record_path("moon", "20"), json!({"__rel": {"planet": null}}))],
        );
        let sink = seen.clone();
        cache.observe(Arc::new(move |op: &Operation| sink.lock().unwrap().push(op.kind)));

        let path = rel_path("moon", "20", "planet");
        cache.apply(&Operation::replace(path.clone(), json!("10"))).unwrap();
        assert_eq!(cache.retrieve_id(&path), Some("10".to_string()));
        assert_eq!(*seen.lock().unwrap(), vec![OpKind::Replace]);
    }

    #[test]
    fn remove_of_null_link_drops_the_key() {
        let mut cache = cache_with(
            &schema(),
            &[(record_path("moon", "20"), json!({"__rel": {"planet": null}}))],
        );
        let op = Operation::remove(rel_path("moon", "20", "planet"));
        assert_eq!(cache.apply(&op).unwrap(), Outcome::Mutated);
        assert_eq!(cache.doc()["moon"]["20"], json!({"__rel": {}}));
    }

    #[test]
    fn marker_as_record_id_is_accepted() {
        let mut cache = Cache::new(&schema());
        let op = Operation::add(record_path("moon", "__rel"), json!({"name": "Odd"}));
        assert_eq!(cache.apply(&op).unwrap(), Outcome::Mutated);
        assert!(cache.contains(&record_path("moon", "__rel")));
    }

    #[test]
    fn skipped_operations_still_notify() {
        let count = Arc::new(Mutex::new(0));
        let mut cache = Cache::new(&schema());
        let counter = count.clone();
        cache.observe(Arc::new(move |_: &Operation| *counter.lock().unwrap() += 1));
        cache.apply(&Operation::remove(record_path("moon", "99"))).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn null_counts_as_absent() {
        let cache = cache_with(
            &schema(),
            &[(record_path("moon", "20"), json!({"__rel": {"planet": null}}))],
        );
        assert_eq!(cache.retrieve(&rel_path("moon", "20", "planet")), None);
        assert_eq!(cache.retrieve_id(&rel_path("moon", "20", "planet")), None);
    }

    #[test]
    fn retrieve_link_values() {
        let cache = cache_with(
            &schema(),
            &[
                (record_path("planet", "10"), json!({"__rel": {"moons": {"20": true, "21": true}}})),
                (record_path("moon", "20"), json!({"__rel": {"planet": "10"}})),
            ],
        );
        assert_eq!(
            cache.retrieve_link("planet", "10", "moons"),
            Some(LinkValue::Many(vec!["20".into(), "21".into()]))
        );
        assert_eq!(
            cache.retrieve_link("moon", "20", "planet"),
            Some(LinkValue::One("10".into()))
        );
        assert_eq!(cache.retrieve_link("moon", "21", "planet"), None);
    }

    #[test]
    fn rejects_reserved_kinds() {
        let mut cache = Cache::new(&schema());
        let op = Operation::new(OpKind::Move, record_path("moon", "20"), None);
        assert_eq!(
            cache.apply(&op),
            Err(SyncError::UnsupportedOperation("move".into()))
        );
    }

    #[test]
    fn rejects_bare_marker() {
        let mut cache = Cache::new(&schema());
        let path = vec!["moon".to_string(), "20".to_string(), "__rel".to_string()];
        let op = Operation::add(path, json!({}));
        assert!(matches!(cache.apply(&op), Err(SyncError::MalformedPath(_))));
    }
}
