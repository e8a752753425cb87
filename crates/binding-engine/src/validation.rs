//! Definition validation
//!
//! Checks an [`AppDefinition`] before it is loaded: entity ids, property
//! names, expression syntax, references and dependency cycles. The engine
//! tolerates all of these at runtime; validation lets editors surface them
//! up front.

use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::extractor::extract_dependencies;
use crate::graph::DependencyGraph;
use crate::scheduler::EvaluationScheduler;
use crate::types::{split_path, AppDefinition, EntityId, EntityKind, PropertyPath, Rank};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// An entity has an empty id
    EmptyEntityId { index: usize },
    /// Two entities share an id
    DuplicateEntity { entity_id: String },
    /// A property name is empty or dotted
    InvalidPropertyName { entity_id: String, property: String },
    /// A `{{ }}` span does not parse
    ParseError {
        entity_id: String,
        property: String,
        message: String,
    },
    /// A template references an entity that is not defined
    UnknownReference {
        entity_id: String,
        property: String,
        reference: String,
    },
    /// Properties that depend on each other
    CycleDetected { members: Vec<String> },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyEntityId { index } => write!(f, "Entity #{} has an empty id", index),
            Self::DuplicateEntity { entity_id } => {
                write!(f, "Entity '{}' is defined more than once", entity_id)
            }
            Self::InvalidPropertyName { entity_id, property } => {
                write!(
                    f,
                    "Property name '{}' on entity '{}' is invalid",
                    property, entity_id
                )
            }
            Self::ParseError {
                entity_id,
                property,
                message,
            } => {
                write!(f, "{}.{}: {}", entity_id, property, message)
            }
            Self::UnknownReference {
                entity_id,
                property,
                reference,
            } => {
                write!(
                    f,
                    "{}.{} references unknown entity '{}'",
                    entity_id, property, reference
                )
            }
            Self::CycleDetected { members } => {
                write!(f, "Circular dependency: {}", members.join(" -> "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a definition
///
/// Returns all validation errors found (not just the first).
pub fn validate_definition(definition: &AppDefinition, config: &EngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let known = validate_entity_ids(definition, &mut errors);
    let graph = validate_properties(definition, &known, config, &mut errors);
    detect_cycles(definition, &graph, &mut errors);
    errors
}

/// Check ids; returns the kind of every usable entity
fn validate_entity_ids(
    definition: &AppDefinition,
    errors: &mut Vec<ValidationError>,
) -> HashMap<EntityId, EntityKind> {
    let mut known = HashMap::new();
    let mut reported = HashSet::new();
    for (index, entity) in definition.entities.iter().enumerate() {
        if entity.id.is_empty() {
            errors.push(ValidationError::EmptyEntityId { index });
            continue;
        }
        if known.contains_key(&entity.id) {
            if reported.insert(entity.id.as_str()) {
                errors.push(ValidationError::DuplicateEntity {
                    entity_id: entity.id.clone(),
                });
            }
            continue;
        }
        known.insert(entity.id.clone(), entity.kind);
    }
    known
}

/// Check names, syntax and references; returns the dependency graph
fn validate_properties(
    definition: &AppDefinition,
    known: &HashMap<EntityId, EntityKind>,
    config: &EngineConfig,
    errors: &mut Vec<ValidationError>,
) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for entity in definition.entities.iter().filter(|e| !e.id.is_empty()) {
        for (name, raw) in &entity.properties {
            if split_path(name).map_or(true, |segments| segments.len() != 1) {
                errors.push(ValidationError::InvalidPropertyName {
                    entity_id: entity.id.clone(),
                    property: name.clone(),
                });
                continue;
            }

            let node = PropertyPath::new(entity.id.clone(), name.clone());
            let extraction = extract_dependencies(raw, &node, known, config);
            for error in &extraction.parse_errors {
                errors.push(ValidationError::ParseError {
                    entity_id: entity.id.clone(),
                    property: name.clone(),
                    message: error.to_string(),
                });
            }
            for reference in extraction.unresolved.iter().chain(&extraction.unknown_names) {
                errors.push(ValidationError::UnknownReference {
                    entity_id: entity.id.clone(),
                    property: name.clone(),
                    reference: reference.clone(),
                });
            }
            graph.set_dependencies(&node, extraction.paths());
        }
    }
    graph
}

/// Detect cycles by planning a pass over every property
fn detect_cycles(definition: &AppDefinition, graph: &DependencyGraph, errors: &mut Vec<ValidationError>) {
    let mut ranks: HashMap<PropertyPath, Rank> = HashMap::new();
    for (entity_rank, entity) in definition.entities.iter().enumerate() {
        for (property_rank, name) in entity.properties.keys().enumerate() {
            ranks
                .entry(PropertyPath::new(entity.id.clone(), name.clone()))
                .or_insert((entity_rank as u64, property_rank as u64));
        }
    }
    let mut seeds: Vec<PropertyPath> = ranks.keys().cloned().collect();
    seeds.sort();

    let mut scheduler = EvaluationScheduler::new();
    let plan = scheduler.plan(graph, &seeds, &|path: &PropertyPath| ranks.get(path).copied());
    scheduler.finish();

    for cycle in plan.cycles {
        errors.push(ValidationError::CycleDetected {
            members: cycle.iter().map(ToString::to_string).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DefinitionBuilder;
    use serde_json::json;

    fn validate(definition: &AppDefinition) -> Vec<ValidationError> {
        validate_definition(definition, &EngineConfig::default())
    }

    #[test]
    fn test_valid_definition() {
        let definition = DefinitionBuilder::new()
            .widget("name")
            .with_property("value", json!("ada"))
            .widget("greeting")
            .with_property("text", json!("hello {{ widgets.name.value }}"))
            .build();
        assert!(validate(&definition).is_empty());
    }

    #[test]
    fn test_duplicate_and_empty_ids() {
        let definition = DefinitionBuilder::new()
            .widget("a")
            .widget("a")
            .widget("a")
            .widget("")
            .build();
        let errors = validate(&definition);
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateEntity {
                    entity_id: "a".to_string()
                },
                ValidationError::EmptyEntityId { index: 3 },
            ]
        );
    }

    #[test]
    fn test_parse_errors_and_unknown_references() {
        let definition = DefinitionBuilder::new()
            .widget("a")
            .with_property("text", json!("{{ 1 + }} {{ widgets.ghost.value }}"))
            .with_property("bad.name", json!(1))
            .build();
        let errors = validate(&definition);

        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[0], ValidationError::InvalidPropertyName { property, .. } if property == "bad.name"));
        assert!(matches!(&errors[1], ValidationError::ParseError { property, .. } if property == "text"));
        assert!(matches!(&errors[2], ValidationError::UnknownReference { reference, .. } if reference == "ghost"));
    }

    #[test]
    fn test_cycle_detected() {
        let definition = DefinitionBuilder::new()
            .widget("a")
            .with_property("text", json!("{{ widgets.b.text }}"))
            .widget("b")
            .with_property("text", json!("{{ widgets.a.text }}"))
            .widget("c")
            .with_property("text", json!("{{ widgets.c.text }}"))
            .build();
        let errors = validate(&definition);

        assert_eq!(
            errors,
            vec![
                ValidationError::CycleDetected {
                    members: vec!["a.text".to_string(), "b.text".to_string()]
                },
                ValidationError::CycleDetected {
                    members: vec!["c.text".to_string()]
                },
            ]
        );
        assert_eq!(errors[0].to_string(), "Circular dependency: a.text -> b.text");
    }
}
