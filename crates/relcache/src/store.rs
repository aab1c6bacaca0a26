//! Linked store: a cache front end that keeps both sides of every link in
//! step.
//!
//! Local edits go through [`LinkedStore::transform`], which decomposes them
//! before applying. Operations received from a queue were decomposed by
//! their producer and are applied as they are with [`LinkedStore::apply`].

use std::sync::{Arc, Mutex};

use relcache_path::{member_path, record_path, rel_path, Path};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{validate_operation, Cache, CacheObserver, LinkValue, Outcome};
use crate::decompose::OperationDecomposer;
use crate::queue::OperationListener;
use crate::schema::{LinkKind, Schema};
use crate::types::{Operation, SyncError};

#[derive(Debug)]
pub struct LinkedStore {
    schema: Arc<Schema>,
    cache: Cache,
}

impl LinkedStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        let cache = Cache::new(&schema);
        Self { schema, cache }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn observe(&mut self, observer: Arc<dyn CacheObserver>) {
        self.cache.observe(observer);
    }

    pub fn retrieve(&self, path: &[String]) -> Option<&Value> {
        self.cache.retrieve(path)
    }

    /// Applies one operation without decomposing it.
    pub fn apply(&mut self, op: &Operation) -> Result<Outcome, SyncError> {
        self.cache.apply(op)
    }

    /// Decomposes `op` and applies the result in order. Returns the applied
    /// operations. Nothing is applied if any of them is rejected.
    pub fn transform(&mut self, op: &Operation) -> Result<Vec<Operation>, SyncError> {
        let ops = OperationDecomposer::new(&self.schema, &self.cache).decompose(op)?;
        ops.iter().try_for_each(validate_operation)?;
        for op in &ops {
            self.cache.apply(op)?;
        }
        debug!(op = %op, applied = ops.len(), "transformed");
        Ok(ops)
    }

    // ── Records ───────────────────────────────────────────────────────────

    /// Adds a record under the value of the model's first key.
    pub fn add_record(&mut self, model: &str, record: Value) -> Result<Vec<Operation>, SyncError> {
        let id = self.record_id(model, &record)?;
        self.transform(&Operation::add(record_path(model, &id), record))
    }

    pub fn add_records(
        &mut self,
        model: &str,
        records: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<Operation>, SyncError> {
        let mut applied = Vec::new();
        for record in records {
            applied.extend(self.add_record(model, record)?);
        }
        Ok(applied)
    }

    pub fn remove_record(&mut self, model: &str, id: &str) -> Result<Vec<Operation>, SyncError> {
        let path = record_path(model, id);
        if !self.cache.contains(&path) {
            return Ok(Vec::new());
        }
        self.transform(&Operation::remove(path))
    }

    fn record_id(&self, model: &str, record: &Value) -> Result<String, SyncError> {
        let key = self.schema.model(model)?.keys.first().map_or("id", String::as_str);
        match record.get(key) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(SyncError::InvalidValue(format!("{model} record has no {key}"))),
        }
    }

    // ── Links ─────────────────────────────────────────────────────────────

    pub fn add_link(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        target: &str,
    ) -> Result<Vec<Operation>, SyncError> {
        match self.schema.link_kind(model, link)? {
            LinkKind::ToOne => self.set_has_one(model, id, link, Some(target)),
            LinkKind::ToMany => self.add_to_has_many(model, id, link, target),
        }
    }

    pub fn remove_link(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        target: &str,
    ) -> Result<Vec<Operation>, SyncError> {
        match self.schema.link_kind(model, link)? {
            LinkKind::ToOne => self.set_has_one(model, id, link, None),
            LinkKind::ToMany => self.remove_from_has_many(model, id, link, target),
        }
    }

    /// Points a toOne link at `target`, or clears it with `None`.
    pub fn set_has_one(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        target: Option<&str>,
    ) -> Result<Vec<Operation>, SyncError> {
        let path = rel_path(model, id, link);
        if self.cache.retrieve_id(&path).as_deref() == target {
            return Ok(Vec::new());
        }
        let value = target.map_or(Value::Null, |t| Value::String(t.to_string()));
        self.transform(&Operation::add(path, value))
    }

    pub fn add_to_has_many(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        member: &str,
    ) -> Result<Vec<Operation>, SyncError> {
        let path = member_path(model, id, link, member);
        if self.cache.contains(&path) {
            return Ok(Vec::new());
        }
        self.transform(&Operation::add(path, Value::Bool(true)))
    }

    pub fn remove_from_has_many(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        member: &str,
    ) -> Result<Vec<Operation>, SyncError> {
        let path = member_path(model, id, link, member);
        if !self.cache.contains(&path) {
            return Ok(Vec::new());
        }
        self.transform(&Operation::remove(path))
    }

    /// Brings a link to `value`. toOne links are replaced; toMany links are
    /// changed member by member.
    pub fn update_link(
        &mut self,
        model: &str,
        id: &str,
        link: &str,
        value: Option<LinkValue>,
    ) -> Result<Vec<Operation>, SyncError> {
        let path = rel_path(model, id, link);
        match (self.schema.link_kind(model, link)?, value) {
            (LinkKind::ToOne, None) => self.replace_one(path, None),
            (LinkKind::ToOne, Some(LinkValue::One(target))) => self.replace_one(path, Some(target)),
            (LinkKind::ToMany, None) => self.diff_members(path, Vec::new()),
            (LinkKind::ToMany, Some(LinkValue::Many(ids))) => self.diff_members(path, ids),
            (kind, Some(value)) => Err(SyncError::InvalidValue(format!(
                "{model}/{id}/{link}: {value:?} does not fit a {} link",
                kind.as_str()
            ))),
        }
    }

    fn replace_one(&mut self, path: Path, target: Option<String>) -> Result<Vec<Operation>, SyncError> {
        if self.cache.retrieve_id(&path) == target {
            return Ok(Vec::new());
        }
        let value = target.map_or(Value::Null, Value::String);
        self.transform(&Operation::replace(path, value))
    }

    fn diff_members(&mut self, path: Path, next: Vec<String>) -> Result<Vec<Operation>, SyncError> {
        let current = self.cache.retrieve_members(&path);
        let member = |id: &str| {
            let mut member = path.clone();
            member.push(id.to_string());
            member
        };
        let mut applied = Vec::new();
        for added in next.iter().filter(|id| !current.contains(id)) {
            applied.extend(self.transform(&Operation::add(member(added.as_str()), Value::Bool(true)))?);
        }
        for removed in current.iter().filter(|id| !next.contains(id)) {
            applied.extend(self.transform(&Operation::remove(member(removed.as_str())))?);
        }
        Ok(applied)
    }

    // ── Fields ────────────────────────────────────────────────────────────

    pub fn update_attribute(
        &mut self,
        model: &str,
        id: &str,
        attribute: &str,
        value: Value,
    ) -> Result<Vec<Operation>, SyncError> {
        self.update_field(field_path(model, id, attribute), value)
    }

    pub fn update_meta(
        &mut self,
        model: &str,
        id: &str,
        meta: &str,
        value: Value,
    ) -> Result<Vec<Operation>, SyncError> {
        self.update_field(field_path(model, id, meta), value)
    }

    fn update_field(&mut self, path: Path, value: Value) -> Result<Vec<Operation>, SyncError> {
        let unchanged = match self.cache.retrieve(&path) {
            Some(current) => *current == value,
            None => value.is_null(),
        };
        if unchanged {
            return Ok(Vec::new());
        }
        self.transform(&Operation::replace(path, value))
    }
}

fn field_path(model: &str, id: &str, field: &str) -> Path {
    let mut path = record_path(model, id);
    path.push(field.to_string());
    path
}

/// Feeds queue deliveries into a shared store.
#[derive(Debug, Clone)]
pub struct StoreListener(pub Arc<Mutex<LinkedStore>>);

impl OperationListener for StoreListener {
    fn on_operation(&self, op: &Operation) {
        let mut store = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = store.apply(op) {
            warn!(op = %op, %err, "rejected remote operation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelDefinition;
    use serde_json::json;

    fn store() -> LinkedStore {
        let schema = Schema::new()
            .with_model(
                "planet",
                ModelDefinition::new()
                    .attribute("name")
                    .has_many("moons", "moon", "planet"),
            )
            .with_model(
                "moon",
                ModelDefinition::new()
                    .attribute("name")
                    .has_one("planet", "planet", "moons"),
            );
        let mut store = LinkedStore::new(Arc::new(schema));
        store
            .add_records(
                "planet",
                [
                    json!({"id": "10", "name": "Jupiter", "__rel": {"moons": {}}}),
                    json!({"id": "11", "name": "Saturn", "__rel": {"moons": {}}}),
                ],
            )
            .unwrap();
        store
            .add_record("moon", json!({"id": "20", "name": "Titan", "__rel": {"planet": null}}))
            .unwrap();
        store
    }

    fn moons(store: &LinkedStore, planet: &str) -> Vec<String> {
        store.cache().retrieve_members(&rel_path("planet", planet, "moons"))
    }

    #[test]
    fn add_link_sets_both_sides() {
        let mut store = store();
        let applied = store.add_link("moon", "20", "planet", "11").unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(store.retrieve(&rel_path("moon", "20", "planet")), Some(&json!("11")));
        assert_eq!(moons(&store, "11"), vec!["20"]);
    }

    #[test]
    fn moving_a_moon_detaches_old_planet() {
        let mut store = store();
        store.add_to_has_many("planet", "10", "moons", "20").unwrap();
        store.set_has_one("moon", "20", "planet", Some("11")).unwrap();
        assert!(moons(&store, "10").is_empty());
        assert_eq!(moons(&store, "11"), vec!["20"]);
    }

    #[test]
    fn unchanged_links_are_no_ops() {
        let mut store = store();
        store.add_link("moon", "20", "planet", "11").unwrap();
        assert!(store.set_has_one("moon", "20", "planet", Some("11")).unwrap().is_empty());
        assert!(store.add_to_has_many("planet", "11", "moons", "20").unwrap().is_empty());
        assert!(store.remove_from_has_many("planet", "10", "moons", "20").unwrap().is_empty());
    }

    #[test]
    fn remove_link_clears_both_sides() {
        let mut store = store();
        store.add_link("moon", "20", "planet", "11").unwrap();
        store.remove_link("moon", "20", "planet", "11").unwrap();
        assert_eq!(store.retrieve(&rel_path("moon", "20", "planet")), None);
        assert!(moons(&store, "11").is_empty());
    }

    #[test]
    fn update_link_to_many_diff() {
        let mut store = store();
        store
            .add_record("moon", json!({"id": "21", "__rel": {"planet": null}}))
            .unwrap();
        store.add_to_has_many("planet", "10", "moons", "20").unwrap();
        store
            .update_link("planet", "10", "moons", Some(LinkValue::Many(vec!["21".into()])))
            .unwrap();
        assert_eq!(moons(&store, "10"), vec!["21"]);
        assert_eq!(store.retrieve(&rel_path("moon", "20", "planet")), None);
        assert_eq!(store.retrieve(&rel_path("moon", "21", "planet")), Some(&json!("10")));
    }

    #[test]
    fn update_link_rejects_mismatched_value() {
        let mut store = store();
        let result = store.update_link("moon", "20", "planet", Some(LinkValue::Many(vec![])));
        assert!(matches!(result, Err(SyncError::InvalidValue(_))));
    }

    #[test]
    fn update_attribute_skips_unchanged() {
        let mut store = store();
        assert!(store.update_attribute("planet", "10", "name", json!("Jupiter")).unwrap().is_empty());
        store.update_attribute("planet", "10", "name", json!("Zeus")).unwrap();
        let path = field_path("planet", "10", "name");
        assert_eq!(store.retrieve(&path), Some(&json!("Zeus")));
    }

    #[test]
    fn update_meta_adds_missing_field() {
        let mut store = store();
        store.update_meta("planet", "10", "__version", json!(3)).unwrap();
        assert_eq!(store.retrieve(&field_path("planet", "10", "__version")), Some(&json!(3)));
    }

    #[test]
    fn remove_record_missing_is_no_op() {
        let mut store = store();
        assert!(store.remove_record("moon", "99").unwrap().is_empty());
        assert_eq!(store.remove_record("moon", "20").unwrap().len(), 1);
        assert_eq!(store.retrieve(&record_path("moon", "20")), None);
    }

    #[test]
    fn record_without_id_is_rejected() {
        let mut store = store();
        let result = store.add_record("moon", json!({"name": "Io"}));
        assert!(matches!(result, Err(SyncError::InvalidValue(_))));
    }

    #[test]
    fn listener_applies_without_decomposing() {
        let shared = Arc::new(Mutex::new(store()));
        let listener = StoreListener(shared.clone());
        listener.on_operation(&Operation::add(rel_path("moon", "20", "planet"), json!("11")));
        let store = shared.lock().unwrap();
        assert_eq!(store.retrieve(&rel_path("moon", "20", "planet")), Some(&json!("11")));
        assert!(moons(&store, "11").is_empty());
    }
}
