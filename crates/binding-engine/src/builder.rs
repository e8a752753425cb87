//! Fluent builder for application definitions

use serde_json::Value;

use crate::types::{AppDefinition, EntityDefinition, EntityKind};

/// Fluent builder for constructing [`AppDefinition`]s
///
/// # Example
///
/// ```ignore
/// let definition = DefinitionBuilder::new()
///     .widget("name")
///     .with_property("value", json!("world"))
///     .widget("greeting")
///     .with_property("text", json!("hello {{ widgets.name.value }}"))
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct DefinitionBuilder {
    entities: Vec<EntityDefinition>,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a widget
    pub fn widget(self, id: impl Into<String>) -> Self {
        self.entity(id, EntityKind::Widget)
    }

    /// Add a query
    pub fn query(self, id: impl Into<String>) -> Self {
        self.entity(id, EntityKind::Query)
    }

    /// Add an entity of any kind
    pub fn entity(mut self, id: impl Into<String>, kind: EntityKind) -> Self {
        self.entities.push(EntityDefinition::new(id, kind));
        self
    }

    /// Set a raw property on the most recently added entity
    ///
    /// Must be called after `widget`, `query` or `entity`.
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        if let Some(entity) = self.entities.last_mut() {
            entity.properties.insert(name.into(), value);
        }
        self
    }

    /// Build the definition without validation
    pub fn build(self) -> AppDefinition {
        AppDefinition {
            entities: self.entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let definition = DefinitionBuilder::new()
            .query("users")
            .with_property("config", json!({"url": "/users"}))
            .widget("table")
            .with_property("data", json!("{{ queries.users.data }}"))
            .with_property("pageSize", json!(20))
            .build();

        assert_eq!(definition.entities.len(), 2);
        assert_eq!(definition.entities[0].kind, EntityKind::Query);
        let table = &definition.entities[1];
        assert_eq!(table.id, "table");
        assert_eq!(table.properties["pageSize"], json!(20));
    }

    #[test]
    fn test_property_without_entity_is_ignored() {
        let definition = DefinitionBuilder::new().with_property("x", json!(1)).build();
        assert!(definition.entities.is_empty());
    }

    #[test]
    fn test_definition_serializes_camel_case() {
        let definition = DefinitionBuilder::new()
            .query("users")
            .with_property("config", json!({}))
            .build();
        let json = serde_json::to_value(&definition).unwrap();
        assert_eq!(json["entities"][0]["kind"], "query");

        let parsed: AppDefinition =
            serde_json::from_str(r#"{"entities": [{"id": "a", "properties": {"text": "hi"}}]}"#).unwrap();
        assert_eq!(parsed.entities[0].kind, EntityKind::Widget);
    }
}
