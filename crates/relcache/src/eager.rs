//! Eager relationship loader.
//!
//! Watches applied operations and subscribes to every record that a newly
//! added record or link points at, so related records flow into the cache
//! without being requested one by one. It never touches the cache itself.

use std::sync::Arc;

use relcache_path::PathShape;
use serde_json::Value;
use tracing::{trace, warn};

use crate::cache::CacheObserver;
use crate::schema::{LinkKind, Schema};
use crate::types::{OpKind, Operation, SyncError};

/// Something that can start delivering a record's operations.
pub trait RecordSubscriber: Send + Sync {
    fn subscribe_to_record(&self, model: &str, id: &str) -> Result<(), SyncError>;

    fn subscribe_to_records(&self, model: &str, ids: &[String]) -> Result<(), SyncError> {
        for id in ids {
            self.subscribe_to_record(model, id)?;
        }
        Ok(())
    }
}

pub struct EagerRelationshipLoader {
    schema: Arc<Schema>,
    subscriber: Arc<dyn RecordSubscriber>,
}

impl EagerRelationshipLoader {
    pub fn new(schema: Arc<Schema>, subscriber: Arc<dyn RecordSubscriber>) -> Self {
        Self { schema, subscriber }
    }

    /// Subscribes to the records `op` links to. Only `add` and `replace`
    /// are considered.
    pub fn process(&self, op: &Operation) -> Result<(), SyncError> {
        if !matches!(op.kind, OpKind::Add | OpKind::Replace) {
            return Ok(());
        }
        match PathShape::of(&op.path) {
            PathShape::Record => self.process_record(op),
            PathShape::Link | PathShape::LinkMember => self.process_link(op),
            _ => Ok(()),
        }
    }

    fn process_record(&self, op: &Operation) -> Result<(), SyncError> {
        let model = self.schema.model(&op.path[0])?;
        let Some(links) = op.value().and_then(|record| record.get("__rel")) else {
            return Ok(());
        };
        for (name, def) in &model.links {
            match (def.kind, links.get(name)) {
                (LinkKind::ToOne, Some(Value::String(id))) if !id.is_empty() => {
                    self.subscriber.subscribe_to_record(&def.model, id)?;
                }
                (LinkKind::ToMany, Some(Value::Object(members))) if !members.is_empty() => {
                    let ids: Vec<String> = members.keys().cloned().collect();
                    self.subscriber.subscribe_to_records(&def.model, &ids)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn process_link(&self, op: &Operation) -> Result<(), SyncError> {
        let def = self.schema.lookup_link(&op.path[0], &op.path[3])?;
        match (def.kind, op.path.get(4), op.value()) {
            (LinkKind::ToMany, Some(member), _) => {
                self.subscriber.subscribe_to_record(&def.model, member)
            }
            (LinkKind::ToMany, None, Some(Value::Object(members))) => {
                let ids: Vec<String> = members.keys().cloned().collect();
                self.subscriber.subscribe_to_records(&def.model, &ids)
            }
            (LinkKind::ToOne, None, Some(Value::String(id))) if !id.is_empty() => {
                self.subscriber.subscribe_to_record(&def.model, id)
            }
            _ => {
                trace!(op = %op, "nothing to load");
                Ok(())
            }
        }
    }
}

impl CacheObserver for EagerRelationshipLoader {
    fn did_apply(&self, op: &Operation) {
        if let Err(err) = self.process(op) {
            warn!(op = %op, %err, "eager load failed");
        }
    }
}
