//! Evaluation context
//!
//! The context holds the current evaluated property map of every entity.
//! It belongs to the surrounding state store; the engine reads it through
//! [`EvaluationContextProvider`] and writes only via `publish` and the
//! removal methods.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::config::EngineConfig;
use crate::expression::{RootBinding, Scope};
use crate::extractor::EntityLookup;
use crate::types::{EntityId, EntityKind, PropertyPath};

/// Evaluated properties of one entity
pub type EntityValues = Map<String, Value>;

/// Read snapshot of all entities
pub type ContextSnapshot = HashMap<EntityId, EntityValues>;

/// Store of evaluated values visible to expressions
pub trait EvaluationContextProvider: Send {
    /// Copy of the whole context
    fn snapshot(&self) -> ContextSnapshot;

    /// Evaluated properties of one entity
    fn entity(&self, id: &str) -> Option<&EntityValues>;

    /// Write the evaluated value of a top-level property
    fn publish(&mut self, path: &PropertyPath, value: Value);

    /// Drop one property
    fn remove_property(&mut self, path: &PropertyPath);

    /// Drop an entity and all its values
    fn remove_entity(&mut self, id: &str);

    /// Drop everything
    fn clear(&mut self);
}

/// Plain in-memory context
#[derive(Debug, Default, Clone)]
pub struct InMemoryContext {
    entities: ContextSnapshot,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationContextProvider for InMemoryContext {
    fn snapshot(&self) -> ContextSnapshot {
        self.entities.clone()
    }

    fn entity(&self, id: &str) -> Option<&EntityValues> {
        self.entities.get(id)
    }

    fn publish(&mut self, path: &PropertyPath, value: Value) {
        self.entities
            .entry(path.entity.clone())
            .or_default()
            .insert(path.root().to_string(), value);
    }

    fn remove_property(&mut self, path: &PropertyPath) {
        if let Some(values) = self.entities.get_mut(&path.entity) {
            values.remove(path.root());
        }
    }

    fn remove_entity(&mut self, id: &str) {
        self.entities.remove(id);
    }

    fn clear(&mut self) {
        self.entities.clear();
    }
}

/// Expression scope over a context provider
pub(crate) struct ContextScope<'a> {
    pub context: &'a dyn EvaluationContextProvider,
    pub entities: &'a dyn EntityLookup,
    pub config: &'a EngineConfig,
}

impl Scope for ContextScope<'_> {
    fn resolve_root(&self, name: &str) -> Option<RootBinding> {
        if let Some(kind) = self.config.namespace_kind(name) {
            return Some(RootBinding::Namespace(kind));
        }
        (self.config.bare_entity_refs && self.entities.kind_of(name).is_some())
            .then(|| RootBinding::Entity(name.to_string()))
    }

    fn has_entity(&self, kind: EntityKind, id: &str) -> bool {
        self.entities.kind_of(id) == Some(kind)
    }

    fn entity_value(&self, id: &str) -> Option<Value> {
        if self.entities.kind_of(id).is_none() {
            return None;
        }
        Some(Value::Object(self.context.entity(id).cloned().unwrap_or_default()))
    }

    fn property_value(&self, id: &str, property: &str) -> Option<Value> {
        self.context.entity(id)?.get(property).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{evaluate, parse_expression};
    use serde_json::json;

    #[test]
    fn test_publish_and_snapshot() {
        let mut context = InMemoryContext::new();
        context.publish(&PropertyPath::new("a", "text"), json!("hi"));
        context.publish(&PropertyPath::new("a", "count"), json!(1));

        let snapshot = context.snapshot();
        assert_eq!(snapshot["a"]["text"], json!("hi"));

        context.remove_property(&PropertyPath::new("a", "count"));
        assert!(context.entity("a").unwrap().get("count").is_none());

        context.remove_entity("a");
        assert!(context.entity("a").is_none());
    }

    #[test]
    fn test_scope_resolves_namespaces_and_bare_ids() {
        let mut context = InMemoryContext::new();
        context.publish(&PropertyPath::new("users", "data"), json!([{"name": "ada"}]));
        let mut entities = HashMap::new();
        entities.insert("users".to_string(), EntityKind::Query);
        let config = EngineConfig::default();
        let scope = ContextScope {
            context: &context,
            entities: &entities,
            config: &config,
        };

        let expr = parse_expression("queries.users.data[0].name").unwrap();
        assert_eq!(evaluate(&expr, &scope).unwrap(), json!("ada"));

        let expr = parse_expression("users.data.length").unwrap();
        assert_eq!(evaluate(&expr, &scope).unwrap(), json!(1));

        let expr = parse_expression("widgets.users").unwrap();
        assert!(evaluate(&expr, &scope).is_err());
    }
}
