//! Dependency extraction
//!
//! Derives the `{ on, property }` references of one property from its
//! source. Only member chains rooted at a namespace (`widgets.a.b`) or,
//! when enabled, at a bare entity id (`a.b`) produce dependencies; any
//! other expression is pure computation and contributes nothing.

use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::error::PropertyError;
use crate::expression::{Accessor, Expr};
use crate::template::CompiledValue;
use crate::types::{Dependency, EntityId, EntityKind, PropertyPath};

/// Lookup of the entities currently known to the application
pub trait EntityLookup {
    /// Kind of the entity with this id, if it exists
    fn kind_of(&self, id: &str) -> Option<EntityKind>;
}

impl EntityLookup for HashMap<EntityId, EntityKind> {
    fn kind_of(&self, id: &str) -> Option<EntityKind> {
        self.get(id).copied()
    }
}

/// Dependencies derived from one property's source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Distinct references, in first-occurrence order
    pub dependencies: Vec<Dependency>,
    /// Namespaced entity ids (`widgets.<id>`) that do not exist (yet)
    pub unresolved: Vec<EntityId>,
    /// Bare identifiers matching no entity; either a future entity or a typo
    pub unknown_names: Vec<EntityId>,
    /// Local parse errors, one per malformed span
    pub parse_errors: Vec<PropertyError>,
    /// Whether the property references itself
    pub self_referencing: bool,
}

impl Extraction {
    /// Dependency targets as property paths
    pub fn paths(&self) -> HashSet<PropertyPath> {
        self.dependencies.iter().map(Dependency::to_path).collect()
    }

    fn push_dependency(&mut self, dependency: Dependency) {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    fn push_unresolved(&mut self, id: &str) {
        if !self.unresolved.iter().any(|u| u == id) {
            self.unresolved.push(id.to_string());
        }
    }

    fn push_unknown_name(&mut self, name: &str) {
        if !self.unknown_names.iter().any(|u| u == name) {
            self.unknown_names.push(name.to_string());
        }
    }
}

/// Extract the dependencies of a raw property value
pub fn extract_dependencies(
    raw: &serde_json::Value,
    owner: &PropertyPath,
    known: &dyn EntityLookup,
    config: &EngineConfig,
) -> Extraction {
    extract_compiled(&CompiledValue::compile(raw), owner, known, config)
}

/// Extract the dependencies of an already compiled property value
pub fn extract_compiled(
    compiled: &CompiledValue,
    owner: &PropertyPath,
    known: &dyn EntityLookup,
    config: &EngineConfig,
) -> Extraction {
    let mut extraction = Extraction {
        parse_errors: compiled.parse_errors(),
        ..Extraction::default()
    };
    let walker = Walker { known, config };
    for binding in compiled.bindings() {
        if let Ok(expr) = &binding.expr {
            walker.walk(expr, &mut extraction);
        }
    }
    extraction.self_referencing = extraction
        .dependencies
        .iter()
        .any(|d| d.to_path().overlaps(owner));
    if extraction.self_referencing {
        log::debug!("Property '{}' references itself", owner);
    }
    extraction
}

struct Walker<'a> {
    known: &'a dyn EntityLookup,
    config: &'a EngineConfig,
}

impl Walker<'_> {
    fn walk(&self, expr: &Expr, out: &mut Extraction) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                if self.config.namespace_kind(name).is_none() {
                    self.bare_reference(name, &[], out);
                }
            }
            Expr::Array(items) => items.iter().for_each(|item| self.walk(item, out)),
            Expr::Unary(_, operand) => self.walk(operand, out),
            Expr::Binary(_, left, right) => {
                self.walk(left, out);
                self.walk(right, out);
            }
            Expr::Conditional(condition, then, otherwise) => {
                self.walk(condition, out);
                self.walk(then, out);
                self.walk(otherwise, out);
            }
            Expr::Member(_, _) | Expr::Index(_, _) => self.walk_chain(expr, out),
        }
    }

    fn walk_chain(&self, expr: &Expr, out: &mut Extraction) {
        let (base, accessors) = expr.chain();
        match base {
            Expr::Ident(name) => match self.config.namespace_kind(name) {
                Some(kind) => self.namespaced_reference(kind, &accessors, out),
                None => self.bare_reference(name, &accessors, out),
            },
            other => self.walk(other, out),
        }
        for accessor in &accessors {
            if let Accessor::Computed(index) = accessor {
                self.walk(index, out);
            }
        }
    }

    /// `widgets.<id>.<path>`
    fn namespaced_reference(&self, kind: EntityKind, accessors: &[Accessor<'_>], out: &mut Extraction) {
        let Some(Accessor::Static(id)) = accessors.first() else {
            // `widgets[expr]` cannot be resolved statically
            return;
        };
        if self.known.kind_of(id) == Some(kind) {
            out.push_dependency(Dependency::new(id.to_string(), static_path(&accessors[1..])));
        } else {
            out.push_unresolved(id);
        }
    }

    /// `<id>.<path>`
    fn bare_reference(&self, name: &str, accessors: &[Accessor<'_>], out: &mut Extraction) {
        if !self.config.bare_entity_refs {
            return;
        }
        if self.known.kind_of(name).is_some() {
            out.push_dependency(Dependency::new(name, static_path(accessors)));
        } else {
            out.push_unknown_name(name);
        }
    }
}

/// Leading static accessors joined with dots
fn static_path(accessors: &[Accessor<'_>]) -> String {
    accessors
        .iter()
        .map_while(|a| match a {
            Accessor::Static(name) => Some(&**name),
            Accessor::Computed(_) => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> HashMap<EntityId, EntityKind> {
        let mut known = HashMap::new();
        known.insert("a".to_string(), EntityKind::Widget);
        known.insert("b".to_string(), EntityKind::Widget);
        known.insert("users".to_string(), EntityKind::Query);
        known
    }

    fn extract(raw: serde_json::Value) -> Extraction {
        extract_dependencies(
            &raw,
            &PropertyPath::new("owner", "text"),
            &known(),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_member_chain_yields_subpath() {
        let extraction = extract(json!("{{ widgets.a.b.c }}"));
        assert_eq!(extraction.dependencies, vec![Dependency::new("a", "b.c")]);
    }

    #[test]
    fn test_plain_value_has_no_dependencies() {
        assert!(extract(json!("widgets.a.b")).dependencies.is_empty());
        assert!(extract(json!(42)).dependencies.is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        let extraction = extract(json!("{{ widgets.a.value }} {{ widgets.a.value + widgets.b.value }}"));
        assert_eq!(
            extraction.dependencies,
            vec![Dependency::new("a", "value"), Dependency::new("b", "value")]
        );
    }

    #[test]
    fn test_computed_index_stops_static_path() {
        let extraction = extract(json!("{{ queries.users.data[widgets.a.selectedRow].name }}"));
        assert_eq!(
            extraction.dependencies,
            vec![Dependency::new("users", "data"), Dependency::new("a", "selectedRow")]
        );

        let extraction = extract(json!("{{ queries.users.data[0]['name'] }}"));
        assert_eq!(extraction.dependencies, vec![Dependency::new("users", "data.0.name")]);
    }

    #[test]
    fn test_bare_entity_refs() {
        let extraction = extract(json!("{{ a.value * 2 }}"));
        assert_eq!(extraction.dependencies, vec![Dependency::new("a", "value")]);

        let extraction = extract(json!("{{ a }}"));
        assert_eq!(extraction.dependencies, vec![Dependency::new("a", "")]);

        let config = EngineConfig {
            bare_entity_refs: false,
            ..EngineConfig::default()
        };
        let extraction = extract_dependencies(
            &json!("{{ a.value }}"),
            &PropertyPath::new("owner", "text"),
            &known(),
            &config,
        );
        assert!(extraction.dependencies.is_empty());
    }

    #[test]
    fn test_non_entity_expressions_ignored() {
        let extraction = extract(json!("{{ 1 + 2 }} {{ 'x'.length }}"));
        assert!(extraction.dependencies.is_empty());
        assert!(extraction.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_and_wrong_kind_are_unresolved() {
        let extraction = extract(json!("{{ widgets.ghost.value }} {{ widgets.users.data }}"));
        assert!(extraction.dependencies.is_empty());
        assert_eq!(extraction.unresolved, vec!["ghost".to_string(), "users".to_string()]);
        assert!(extraction.unknown_names.is_empty());
    }

    #[test]
    fn test_unknown_bare_names_kept_apart() {
        let extraction = extract(json!("{{ Math.max }} {{ ghost.value }} {{ Math }}"));
        assert!(extraction.dependencies.is_empty());
        assert!(extraction.unresolved.is_empty());
        assert_eq!(extraction.unknown_names, vec!["Math".to_string(), "ghost".to_string()]);
    }

    #[test]
    fn test_parse_error_is_local() {
        let extraction = extract(json!("{{ widgets.a.value + }} {{ widgets.b.value }}"));
        assert_eq!(extraction.parse_errors.len(), 1);
        assert_eq!(extraction.dependencies, vec![Dependency::new("b", "value")]);
    }

    #[test]
    fn test_nested_raw_values() {
        // Object keys are visited in sorted order
        let extraction = extract(json!({"url": "/u/{{ widgets.a.id }}", "body": ["{{ b.text }}"]}));
        assert_eq!(
            extraction.dependencies,
            vec![Dependency::new("b", "text"), Dependency::new("a", "id")]
        );
    }

    #[test]
    fn test_self_reference_detected() {
        let extraction = extract_dependencies(
            &json!("{{ widgets.a.text }}"),
            &PropertyPath::new("a", "text"),
            &known(),
            &EngineConfig::default(),
        );
        assert!(extraction.self_referencing);
        assert!(!extract(json!("{{ widgets.a.text }}")).self_referencing);
    }
}
