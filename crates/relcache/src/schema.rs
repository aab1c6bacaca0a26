//! Schema index: models, their attributes and keys, and link definitions.
//!
//! The schema is loaded once and never mutated afterwards. Every link names
//! an inverse on its target model; [`Schema::validate`] checks that each pair
//! points back at itself.

use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

use crate::types::SyncError;

// ── Link kind ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    ToOne,
    ToMany,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::ToOne => "hasOne",
            LinkKind::ToMany => "hasMany",
        }
    }
}

impl FromStr for LinkKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hasOne" | "toOne" => Ok(LinkKind::ToOne),
            "hasMany" | "toMany" => Ok(LinkKind::ToMany),
            other => Err(SyncError::UnsupportedLinkKind(other.to_string())),
        }
    }
}

// ── Definitions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDefinition {
    pub kind: LinkKind,
    /// Target model type.
    pub model: String,
    /// Link name on the target model that mirrors this one.
    pub inverse: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    pub attributes: IndexSet<String>,
    pub keys: IndexSet<String>,
    pub links: IndexMap<String, LinkDefinition>,
}

impl Default for ModelDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelDefinition {
    /// An empty model with the single key `id`.
    pub fn new() -> Self {
        Self {
            attributes: IndexSet::new(),
            keys: IndexSet::from(["id".to_string()]),
            links: IndexMap::new(),
        }
    }

    pub fn attribute(mut self, name: &str) -> Self {
        self.attributes.insert(name.to_string());
        self
    }

    pub fn key(mut self, name: &str) -> Self {
        self.keys.insert(name.to_string());
        self
    }

    pub fn has_one(self, name: &str, model: &str, inverse: &str) -> Self {
        self.link(name, LinkKind::ToOne, model, inverse)
    }

    pub fn has_many(self, name: &str, model: &str, inverse: &str) -> Self {
        self.link(name, LinkKind::ToMany, model, inverse)
    }

    pub fn link(mut self, name: &str, kind: LinkKind, model: &str, inverse: &str) -> Self {
        self.links.insert(
            name.to_string(),
            LinkDefinition {
                kind,
                model: model.to_string(),
                inverse: inverse.to_string(),
            },
        );
        self
    }
}

// ── Schema ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    models: IndexMap<String, ModelDefinition>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, name: &str, model: ModelDefinition) -> Self {
        self.models.insert(name.to_string(), model);
        self
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelDefinition)> {
        self.models.iter().map(|(name, model)| (name.as_str(), model))
    }

    pub fn model(&self, name: &str) -> Result<&ModelDefinition, SyncError> {
        self.models
            .get(name)
            .ok_or_else(|| SyncError::UnknownModel(name.to_string()))
    }

    pub fn lookup_link(&self, model: &str, link: &str) -> Result<&LinkDefinition, SyncError> {
        self.model(model)?
            .links
            .get(link)
            .ok_or_else(|| SyncError::unknown_link(model, link))
    }

    /// Resolves the reciprocal definition on the link's target model.
    pub fn lookup_inverse(&self, model: &str, link: &str) -> Result<&LinkDefinition, SyncError> {
        let def = self.lookup_link(model, link)?;
        self.lookup_link(&def.model, &def.inverse)
    }

    pub fn link_kind(&self, model: &str, link: &str) -> Result<LinkKind, SyncError> {
        Ok(self.lookup_link(model, link)?.kind)
    }

    /// Checks that every link's inverse exists and points back.
    pub fn validate(&self) -> Result<(), SyncError> {
        for (name, model) in &self.models {
            for (link, def) in &model.links {
                let inverse = self.lookup_link(&def.model, &def.inverse).map_err(|e| {
                    SyncError::InvalidSchema(format!("{name}/{link}: {e}"))
                })?;
                if inverse.model != *name || inverse.inverse != *link {
                    return Err(SyncError::InvalidSchema(format!(
                        "{name}/{link}: inverse {}/{} points at {}/{}",
                        def.model, def.inverse, inverse.model, inverse.inverse
                    )));
                }
            }
        }
        Ok(())
    }

    /// Loads a schema from its JSON definition.
    ///
    /// ```json
    /// {
    ///   "modelDefaults": { "keys": { "id": { "primaryKey": true } } },
    ///   "models": {
    ///     "moon": {
    ///       "attributes": { "name": { "type": "string" } },
    ///       "links": { "planet": { "type": "hasOne", "model": "planet", "inverse": "moons" } }
    ///     }
    ///   }
    /// }
    /// ```
    ///
    /// `attributes` and `keys` may be objects (names are the keys) or arrays
    /// of names. The loaded schema is validated before it is returned.
    pub fn from_json(value: &Value) -> Result<Self, SyncError> {
        let root = as_object(value, "schema")?;
        let default_keys = match root.get("modelDefaults").and_then(|d| d.get("keys")) {
            Some(keys) => names(keys, "modelDefaults.keys")?,
            None => IndexSet::from(["id".to_string()]),
        };
        let models = as_object(root.get("models").unwrap_or(value), "models")?;

        let mut schema = Schema::new();
        for (name, def) in models {
            let def = as_object(def, name)?;
            let mut model = ModelDefinition {
                keys: default_keys.clone(),
                ..ModelDefinition::new()
            };
            if let Some(attrs) = def.get("attributes") {
                model.attributes = names(attrs, &format!("{name}.attributes"))?;
            }
            if let Some(keys) = def.get("keys") {
                model.keys.extend(names(keys, &format!("{name}.keys"))?);
            }
            if let Some(links) = def.get("links") {
                for (link, link_def) in as_object(links, &format!("{name}.links"))? {
                    model.links.insert(link.clone(), link_from_json(link_def, name, link)?);
                }
            }
            schema.models.insert(name.clone(), model);
        }
        schema.validate()?;
        Ok(schema)
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, SyncError> {
    value
        .as_object()
        .ok_or_else(|| SyncError::InvalidSchema(format!("{what} must be an object")))
}

fn names(value: &Value, what: &str) -> Result<IndexSet<String>, SyncError> {
    match value {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    SyncError::InvalidSchema(format!("{what} must hold strings"))
                })
            })
            .collect(),
        _ => Err(SyncError::InvalidSchema(format!("{what} must be an object or array"))),
    }
}

fn link_from_json(value: &Value, model: &str, link: &str) -> Result<LinkDefinition, SyncError> {
    let def = as_object(value, &format!("{model}.links.{link}"))?;
    let field = |key: &str| {
        def.get(key).and_then(Value::as_str).ok_or_else(|| {
            SyncError::InvalidSchema(format!("{model}.links.{link}.{key} must be a string"))
        })
    };
    let kind = def.get("type").or_else(|| def.get("kind")).and_then(Value::as_str);
    let kind = kind.ok_or_else(|| {
        SyncError::InvalidSchema(format!("{model}.links.{link}.type must be a string"))
    })?;
    Ok(LinkDefinition {
        kind: kind.parse()?,
        model: field("model")?.to_string(),
        inverse: field("inverse")?.to_string(),
    })
}
