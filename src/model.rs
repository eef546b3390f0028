use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

/// Identifier of one entity inside the connection manager's object graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tagged property value as exposed by the connection manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "\"{s}\""),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Full attribute set of one entity
pub type PropertyMap = HashMap<String, PropertyValue>;

/// The four entity kinds mirrored from the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Technology,
    Group,
    Service,
    SavedService,
}

impl EntityKind {
    /// All kinds, in the order removal waves are emitted
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Technology,
        EntityKind::Group,
        EntityKind::Service,
        EntityKind::SavedService,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Technology => "technology",
            Self::Group => "group",
            Self::Service => "service",
            Self::SavedService => "saved service",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Authoritative view of what currently exists for one entity kind.
///
/// Insertion order is kept so removal waves replay entities in the order
/// they were first announced.
#[derive(Debug, Default, Clone)]
pub struct EntitySet {
    entries: Vec<(ObjectPath, PropertyMap)>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.position(path).is_some()
    }

    pub fn get(&self, path: &ObjectPath) -> Option<&PropertyMap> {
        self.position(path).map(|i| &self.entries[i].1)
    }

    /// Announce an entity with its full attribute set. A known path keeps
    /// its position but its previous attributes are dropped.
    pub fn insert(&mut self, path: ObjectPath, properties: PropertyMap) {
        match self.position(&path) {
            Some(i) => self.entries[i].1 = properties,
            None => self.entries.push((path, properties)),
        }
    }

    /// Insert a new entity, or merge properties into an existing one.
    /// Returns `true` when the path was not known before.
    pub fn upsert(&mut self, path: ObjectPath, properties: PropertyMap) -> bool {
        match self.position(&path) {
            Some(i) => {
                self.entries[i].1.extend(properties);
                false
            }
            None => {
                self.entries.push((path, properties));
                true
            }
        }
    }

    /// Apply a single property change. Returns `false` for unknown paths.
    pub fn set_property(&mut self, path: &ObjectPath, name: &str, value: PropertyValue) -> bool {
        match self.position(path) {
            Some(i) => {
                self.entries[i].1.insert(name.to_string(), value);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, path: &ObjectPath) -> Option<PropertyMap> {
        self.position(path).map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectPath, &PropertyMap)> {
        self.entries.iter().map(|(p, m)| (p, m))
    }

    /// Drain every entity, oldest first
    pub fn drain(&mut self) -> Vec<(ObjectPath, PropertyMap)> {
        std::mem::take(&mut self.entries)
    }

    /// First entity whose `name` property equals `value`
    pub fn find_by(&self, name: &str, value: &str) -> Option<(&ObjectPath, &PropertyMap)> {
        self.iter()
            .find(|(_, props)| props.get(name).and_then(PropertyValue::as_str) == Some(value))
    }

    fn position(&self, path: &ObjectPath) -> Option<usize> {
        self.entries.iter().position(|(p, _)| p == path)
    }
}

/// All mirrored entity sets plus manager-level properties
#[derive(Debug, Default, Clone)]
pub struct Mirror {
    pub technologies: EntitySet,
    pub groups: EntitySet,
    pub services: EntitySet,
    pub saved_services: EntitySet,
    pub manager: PropertyMap,
}

impl Mirror {
    pub fn set(&self, kind: EntityKind) -> &EntitySet {
        match kind {
            EntityKind::Technology => &self.technologies,
            EntityKind::Group => &self.groups,
            EntityKind::Service => &self.services,
            EntityKind::SavedService => &self.saved_services,
        }
    }

    pub fn set_mut(&mut self, kind: EntityKind) -> &mut EntitySet {
        match kind {
            EntityKind::Technology => &mut self.technologies,
            EntityKind::Group => &mut self.groups,
            EntityKind::Service => &mut self.services,
            EntityKind::SavedService => &mut self.saved_services,
        }
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|k| self.set(*k).is_empty()) && self.manager.is_empty()
    }

    /// Technology whose `Type` property matches (e.g. "wifi", "ethernet")
    pub fn technology(&self, tech_type: &str) -> Option<(&ObjectPath, &PropertyMap)> {
        self.technologies.find_by("Type", tech_type)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
