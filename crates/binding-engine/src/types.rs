//! Core types for the binding graph
//!
//! Entities, property paths, dependencies and evaluated values shared by
//! the extractor, graph, scheduler and engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PropertyError;

/// Unique identifier for an entity (widget or query instance)
pub type EntityId = String;

/// Kind of an addressable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A widget placed on a page
    #[default]
    Widget,
    /// A data source / query
    Query,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Widget => write!(f, "widget"),
            EntityKind::Query => write!(f, "query"),
        }
    }
}

/// Dotted address of a value owned by an entity
///
/// `path` is the property name optionally followed by a subpath
/// (`data.rows.0.name`). An empty path addresses the whole entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyPath {
    /// Owning entity
    pub entity: EntityId,
    /// Dotted property path inside the entity
    pub path: String,
}

impl PropertyPath {
    /// Create a new property path
    pub fn new(entity: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            path: path.into(),
        }
    }

    /// Path addressing the whole entity
    pub fn whole(entity: impl Into<String>) -> Self {
        Self::new(entity, "")
    }

    /// Path segments (empty for a whole-entity path)
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.path.split('.').filter(|s| !s.is_empty())
    }

    /// Top-level property name, or `""` for a whole-entity path
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or("")
    }

    /// Whether this path addresses the entity as a whole
    pub fn is_whole_entity(&self) -> bool {
        self.path.is_empty()
    }

    /// Whether a change to one of the two paths can affect the other
    ///
    /// True when both live on the same entity and one is a segment-prefix
    /// of the other.
    pub fn overlaps(&self, other: &PropertyPath) -> bool {
        if self.entity != other.entity {
            return false;
        }
        self.segments()
            .zip(other.segments())
            .all(|(a, b)| a == b)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.entity)
        } else {
            write!(f, "{}.{}", self.entity, self.path)
        }
    }
}

/// A reference found in a template: `{ on: entity, property: subpath }`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Referenced entity
    pub on: EntityId,
    /// Referenced dotted property path (may be empty)
    pub property: String,
}

impl Dependency {
    /// Create a new dependency
    pub fn new(on: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            property: property.into(),
        }
    }

    /// The dependency target as a property path
    pub fn to_path(&self) -> PropertyPath {
        PropertyPath::new(self.on.clone(), self.property.clone())
    }
}

/// Result of evaluating one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedValue {
    /// Evaluated value (`null` when evaluation failed)
    pub value: serde_json::Value,
    /// Error recorded for this property, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PropertyError>,
}

impl EvaluatedValue {
    /// A successful evaluation
    pub fn ok(value: serde_json::Value) -> Self {
        Self { value, error: None }
    }

    /// Whether an error was recorded
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Source definition of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub id: EntityId,
    #[serde(default)]
    pub kind: EntityKind,
    /// Raw property values, possibly templated
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl EntityDefinition {
    pub fn new(id: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: serde_json::Map::new(),
        }
    }
}

/// Source definition of an application
///
/// Holds raw values only; evaluated values live in the context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

impl AppDefinition {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Ordering rank of a graph node: (entity insertion, property insertion)
pub type Rank = (u64, u64);

/// Split a dotted path into owned segments, rejecting empty segments
pub(crate) fn split_path(path: &str) -> Option<Vec<String>> {
    if path.is_empty() {
        return None;
    }
    path.split('.')
        .map(|s| (!s.is_empty()).then(|| s.to_string()))
        .collect()
}

/// Look up a dotted subpath inside a JSON value
///
/// Numeric segments index into arrays.
pub(crate) fn value_at<'a, 'b>(
    value: &'a serde_json::Value,
    mut segments: impl Iterator<Item = &'b str>,
) -> Option<&'a serde_json::Value> {
    segments.try_fold(value, |current, segment| match current {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
