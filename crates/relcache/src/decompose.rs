//! Relationship resolver and operation decomposer.
//!
//! A link mutation touches two records: the one it names and the record on
//! the other end, whose inverse link must follow. [`OperationDecomposer`]
//! expands one operation into the ordered list of primitive operations that
//! keeps both ends consistent against the current cache contents.
//!
//! The resolver walks inverse links recursively. Link graphs may be cyclic
//! (a model can link to itself, e.g. `next`/`previous`), so every visited
//! link path is recorded and a second visit returns immediately.

use std::collections::HashSet;

use indexmap::IndexSet;
use relcache_path::{format_pointer, rel_path, touches_relationship, Path, PathShape};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::cache::Cache;
use crate::schema::{LinkDefinition, LinkKind, Schema};
use crate::types::{OpKind, Operation, SyncError};

/// Normalized payload of a link change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No counterpart: an unset toOne link.
    None,
    /// A single record id: a toOne target or a toMany member.
    Id(String),
    /// A full toMany member set.
    Members(Vec<String>),
}

/// A link operation reshaped so that every (kind, link kind) pair receives
/// the same form: a four-segment link path plus a [`Target`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkChange {
    pub kind: OpKind,
    pub path: Path,
    pub target: Target,
}

pub struct OperationDecomposer<'a> {
    schema: &'a Schema,
    cache: &'a Cache,
}

impl<'a> OperationDecomposer<'a> {
    pub fn new(schema: &'a Schema, cache: &'a Cache) -> Self {
        Self { schema, cache }
    }

    /// Expands `op` into the operations needed to keep both sides of every
    /// affected relationship consistent. The incoming operation comes first.
    ///
    /// Operations that do not touch a relationship are returned unchanged.
    /// On error nothing is returned.
    pub fn decompose(&self, op: &Operation) -> Result<Vec<Operation>, SyncError> {
        if !touches_relationship(&op.path) {
            return Ok(vec![op.clone()]);
        }
        debug!(op = %op, "decomposing");
        let change = self.normalize(op)?;
        let mut resolver = RelationshipResolver::new(self.schema, self.cache, &op.id);
        resolver.visit(change.kind, &change.path, change.target)?;
        Ok(resolver.operations)
    }

    /// Reshapes a link operation.
    ///
    /// - toOne add/replace carry the target id; a `null` target turns the
    ///   operation into a remove.
    /// - toOne remove reads the current target from the cache.
    /// - toMany add/remove move the trailing member id into the target.
    /// - toMany replace turns the member map (or array) into an id list.
    pub fn normalize(&self, op: &Operation) -> Result<LinkChange, SyncError> {
        let shape = PathShape::of(&op.path);
        if !shape.is_link() {
            return Err(match shape {
                PathShape::BareMarker => SyncError::MalformedPath(format!(
                    "relationship not specified: {}",
                    op.pointer()
                )),
                _ => SyncError::InvalidPath(op.pointer()),
            });
        }
        let def = self.schema.lookup_link(&op.path[0], &op.path[3])?;
        let member = shape == PathShape::LinkMember;

        let change = match (def.kind, op.kind) {
            (_, OpKind::Copy | OpKind::Move | OpKind::Test) => {
                return Err(SyncError::UnsupportedOperation(op.kind.to_string()))
            }
            (LinkKind::ToOne, _) if member => return Err(SyncError::InvalidPath(op.pointer())),
            (LinkKind::ToOne, OpKind::Add | OpKind::Replace) => match op.value() {
                Some(Value::String(id)) if !id.is_empty() => LinkChange {
                    kind: op.kind,
                    path: op.path.clone(),
                    target: Target::Id(id.clone()),
                },
                None => self.current_one(&op.path),
                Some(other) => {
                    return Err(SyncError::InvalidValue(format!(
                        "{}: expected a record id, got {other}",
                        op.pointer()
                    )))
                }
            },
            (LinkKind::ToOne, OpKind::Remove) => self.current_one(&op.path),
            (LinkKind::ToMany, OpKind::Add | OpKind::Remove) => {
                if !member {
                    return Err(SyncError::InvalidPath(op.pointer()));
                }
                LinkChange {
                    kind: op.kind,
                    path: op.path[..4].to_vec(),
                    target: Target::Id(op.path[4].clone()),
                }
            }
            (LinkKind::ToMany, OpKind::Replace) => {
                if member {
                    return Err(SyncError::InvalidPath(op.pointer()));
                }
                LinkChange {
                    kind: OpKind::Replace,
                    path: op.path.clone(),
                    target: Target::Members(member_ids(op)?),
                }
            }
        };
        Ok(change)
    }

    fn current_one(&self, path: &[String]) -> LinkChange {
        LinkChange {
            kind: OpKind::Remove,
            path: path.to_vec(),
            target: self.cache.retrieve_id(path).map_or(Target::None, Target::Id),
        }
    }
}

fn member_ids(op: &Operation) -> Result<Vec<String>, SyncError> {
    let invalid = || {
        SyncError::InvalidValue(format!("{}: expected a member map or id list", op.pointer()))
    };
    match op.value() {
        None => Ok(Vec::new()),
        Some(Value::Object(members)) => Ok(members.keys().cloned().collect()),
        Some(Value::Array(ids)) => ids
            .iter()
            .map(|id| id.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

/// Walks one decomposition. Lives for a single top-level call.
struct RelationshipResolver<'a> {
    schema: &'a Schema,
    cache: &'a Cache,
    origin: &'a str,
    visited: HashSet<String>,
    operations: Vec<Operation>,
}

impl<'a> RelationshipResolver<'a> {
    fn new(schema: &'a Schema, cache: &'a Cache, origin: &'a str) -> Self {
        Self {
            schema,
            cache,
            origin,
            visited: HashSet::new(),
            operations: Vec::new(),
        }
    }

    fn visit(&mut self, kind: OpKind, path: &[String], target: Target) -> Result<(), SyncError> {
        if path.len() != 4 {
            return Err(SyncError::InvalidPath(format_pointer(path)));
        }
        if path[1].is_empty() {
            return Err(SyncError::InvalidPath(format!(
                "missing model id: {}",
                format_pointer(path)
            )));
        }
        let def = self.schema.lookup_link(&path[0], &path[3])?.clone();

        // toMany add/remove only touch one member, so they are keyed by it.
        let key = match (def.kind, kind, &target) {
            (LinkKind::ToMany, OpKind::Add | OpKind::Remove, Target::Id(member)) => {
                format_pointer(&member_of(path, member))
            }
            _ => format_pointer(path),
        };
        if !self.visited.insert(key) {
            return Ok(());
        }
        trace!(%kind, path = %format_pointer(path), ?target, "visiting");

        match (def.kind, kind) {
            (LinkKind::ToOne, OpKind::Add | OpKind::Replace) => self.set_one(kind, path, &def, target),
            (LinkKind::ToOne, OpKind::Remove) => self.unset_one(path, &def, target),
            (LinkKind::ToMany, OpKind::Add) => self.add_member(path, &def, target),
            (LinkKind::ToMany, OpKind::Remove) => self.remove_member(path, &def, target),
            (LinkKind::ToMany, OpKind::Replace) => self.replace_members(path, &def, target),
            (_, OpKind::Copy | OpKind::Move | OpKind::Test) => {
                Err(SyncError::UnsupportedOperation(kind.to_string()))
            }
        }
    }

    /// Detach the previous target's inverse before attaching the new one, so
    /// no two records claim the same exclusive partner mid-walk.
    fn set_one(
        &mut self,
        kind: OpKind,
        path: &[String],
        def: &LinkDefinition,
        target: Target,
    ) -> Result<(), SyncError> {
        let id = expect_id(path, target)?;
        let this = &path[1];
        let old = self.cache.retrieve_id(path);

        self.emit(kind, path.to_vec(), Some(Value::String(id.clone())));
        if let Some(old) = old.filter(|old| *old != id) {
            self.visit(OpKind::Remove, &rel_path(&def.model, &old, &def.inverse), Target::Id(this.clone()))?;
        }
        self.visit(OpKind::Add, &rel_path(&def.model, &id, &def.inverse), Target::Id(this.clone()))
    }

    fn unset_one(&mut self, path: &[String], def: &LinkDefinition, target: Target) -> Result<(), SyncError> {
        let passed = match target {
            Target::Id(id) => Some(id),
            _ => None,
        };
        let Some(old) = self.cache.retrieve_id(path).or(passed) else {
            return Ok(());
        };
        self.emit(OpKind::Remove, path.to_vec(), None);
        self.visit(OpKind::Remove, &rel_path(&def.model, &old, &def.inverse), Target::Id(path[1].clone()))
    }

    fn add_member(&mut self, path: &[String], def: &LinkDefinition, target: Target) -> Result<(), SyncError> {
        let member = expect_id(path, target)?;
        self.emit(OpKind::Add, member_of(path, &member), Some(Value::Bool(true)));
        self.visit(OpKind::Add, &rel_path(&def.model, &member, &def.inverse), Target::Id(path[1].clone()))
    }

    fn remove_member(&mut self, path: &[String], def: &LinkDefinition, target: Target) -> Result<(), SyncError> {
        let member = expect_id(path, target)?;
        self.emit(OpKind::Remove, member_of(path, &member), None);
        self.visit(OpKind::Remove, &rel_path(&def.model, &member, &def.inverse), Target::Id(path[1].clone()))
    }

    /// A toMany inverse already mirrors membership per member, so only a
    /// toOne inverse is walked, for the members that changed.
    fn replace_members(&mut self, path: &[String], def: &LinkDefinition, target: Target) -> Result<(), SyncError> {
        let next: IndexSet<String> = match target {
            Target::Members(ids) => ids.into_iter().collect(),
            Target::Id(id) => IndexSet::from([id]),
            Target::None => IndexSet::new(),
        };
        let current: IndexSet<String> = self.cache.retrieve_members(path).into_iter().collect();

        for member in next.iter().chain(current.iter()) {
            self.visited.insert(format_pointer(&member_of(path, member)));
        }

        let membership: Map<String, Value> =
            next.iter().map(|id| (id.clone(), Value::Bool(true))).collect();
        self.emit(OpKind::Replace, path.to_vec(), Some(Value::Object(membership)));

        let inverse = self.schema.lookup_link(&def.model, &def.inverse)?;
        if inverse.kind == LinkKind::ToMany {
            return Ok(());
        }

        let this = &path[1];
        for added in next.difference(&current) {
            self.visit(OpKind::Add, &rel_path(&def.model, added, &def.inverse), Target::Id(this.clone()))?;
        }
        for removed in current.difference(&next) {
            self.visit(OpKind::Remove, &rel_path(&def.model, removed, &def.inverse), Target::Id(this.clone()))?;
        }
        Ok(())
    }

    /// The first emitted operation keeps the incoming id; derived ones get
    /// `<id>:<position>`.
    fn emit(&mut self, kind: OpKind, path: Path, value: Option<Value>) {
        let id = match self.operations.len() {
            0 => self.origin.to_string(),
            n => format!("{}:{n}", self.origin),
        };
        self.operations.push(Operation { id, kind, path, value });
    }
}

fn expect_id(path: &[String], target: Target) -> Result<String, SyncError> {
    match target {
        Target::Id(id) if !id.is_empty() => Ok(id),
        other => Err(SyncError::InvalidValue(format!(
            "{}: expected a record id, got {other:?}",
            format_pointer(path)
        ))),
    }
}

fn member_of(path: &[String], member: &str) -> Path {
    let mut path = path.to_vec();
    path.push(member.to_string());
    path
}
