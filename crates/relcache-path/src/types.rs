//! Type definitions for record paths.

/// A single path segment: a model type, a record id, an attribute, the
/// relationship marker, a link name or a member id.
pub type PathStep = String;

/// A record path, e.g. `["planet", "10", "__rel", "moons", "20"]`.
pub type Path = Vec<PathStep>;

/// Reserved segment at index 2 announcing that the following segments
/// address relationship data.
pub const REL_MARKER: &str = "__rel";

/// Segments at index 2 starting with this prefix address record metadata.
pub const META_PREFIX: &str = "__";

/// Shape of a record path, decided by length and the relationship marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape {
    /// `[]`
    Root,
    /// `[type]`
    Type,
    /// `[type, id]`
    Record,
    /// `[type, id, field]`
    Field,
    /// `[type, id, "__rel"]`: marker without a link name.
    BareMarker,
    /// `[type, id, "__rel", link]`
    Link,
    /// `[type, id, "__rel", link, member]`
    LinkMember,
    /// Anything longer, or a 4/5 segment path without the marker.
    Nested,
}

impl PathShape {
    /// Classifies `path` by its structure alone.
    pub fn of(path: &[String]) -> Self {
        let marked = path.get(2).is_some_and(|s| s == REL_MARKER);
        match (path.len(), marked) {
            (0, _) => PathShape::Root,
            (1, _) => PathShape::Type,
            (2, _) => PathShape::Record,
            (3, true) => PathShape::BareMarker,
            (3, false) => PathShape::Field,
            (4, true) => PathShape::Link,
            (5, true) => PathShape::LinkMember,
            _ => PathShape::Nested,
        }
    }

    pub fn is_link(self) -> bool {
        matches!(self, PathShape::Link | PathShape::LinkMember)
    }
}
