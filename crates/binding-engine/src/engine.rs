//! Binding engine facade
//!
//! `BindingEngine` owns the raw property sources, the dependency graph and
//! the scheduler. Hosts feed it edits (`on_property_changed`,
//! `on_entity_removed`, ...) and read evaluated values back; every edit
//! runs one scheduling pass unless it happens inside [`BindingEngine::batch`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ContextScope, EvaluationContextProvider, InMemoryContext};
use crate::error::{EngineError, PropertyError, Result};
use crate::events::{EvaluationEvent, EventSink, NullEventSink};
use crate::extractor::{extract_compiled, EntityLookup};
use crate::graph::DependencyGraph;
use crate::scheduler::{EvaluationScheduler, SchedulerState};
use crate::template::CompiledValue;
use crate::types::{
    split_path, value_at, AppDefinition, EntityDefinition, EntityId, EntityKind, EvaluatedValue,
    PropertyPath, Rank,
};

/// One edit, for [`BindingEngine::apply_changes`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PropertyChange {
    /// Set a raw value (dotted paths set nested values)
    Set {
        entity: EntityId,
        path: String,
        value: Value,
    },
    /// Remove a property or a nested value
    Remove { entity: EntityId, path: String },
    /// Remove an entity
    RemoveEntity { entity: EntityId },
}

/// Outcome of one scheduling pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Unique id, also carried by the pass events
    pub pass_id: String,
    /// Paths that started the pass
    pub seeds: Vec<PropertyPath>,
    /// Properties evaluated, in evaluation order
    pub order: Vec<PropertyPath>,
    /// Result of every evaluated or cycle-flagged property
    pub results: HashMap<PropertyPath, EvaluatedValue>,
    /// Cycles found in the affected subgraph
    pub cycles: Vec<Vec<PropertyPath>>,
    /// Reached paths that were not evaluated because they no longer exist
    pub skipped: Vec<PropertyPath>,
}

impl PassReport {
    /// Result for a top-level property
    pub fn result(&self, entity: &str, property: &str) -> Option<&EvaluatedValue> {
        self.results.get(&PropertyPath::new(entity, property))
    }

    /// Number of properties that ended with an error
    pub fn failed(&self) -> usize {
        self.results.values().filter(|r| r.is_err()).count()
    }
}

struct SourceProperty {
    /// Registration order inside the entity
    seq: u64,
    raw: Value,
    compiled: CompiledValue,
}

struct EntityRecord {
    kind: EntityKind,
    /// Registration order among entities
    seq: u64,
    next_property_seq: u64,
    properties: HashMap<String, SourceProperty>,
}

impl EntityRecord {
    fn new(kind: EntityKind, seq: u64) -> Self {
        Self {
            kind,
            seq,
            next_property_seq: 0,
            properties: HashMap::new(),
        }
    }

    /// Store a source; an existing property keeps its rank
    fn set(&mut self, name: &str, raw: Value, compiled: CompiledValue) {
        let seq = match self.properties.get(name) {
            Some(existing) => existing.seq,
            None => {
                self.next_property_seq += 1;
                self.next_property_seq - 1
            }
        };
        self.properties.insert(name.to_string(), SourceProperty { seq, raw, compiled });
    }

    fn ordered_properties(&self) -> Vec<(&String, &SourceProperty)> {
        let mut properties: Vec<_> = self.properties.iter().collect();
        properties.sort_by_key(|(_, p)| p.seq);
        properties
    }
}

impl EntityLookup for HashMap<EntityId, EntityRecord> {
    fn kind_of(&self, id: &str) -> Option<EntityKind> {
        self.get(id).map(|record| record.kind)
    }
}

/// Reactive binding engine
///
/// Single writer: every method takes `&mut self`, and passes requested
/// while another is being planned wait in the scheduler's queue.
pub struct BindingEngine {
    config: EngineConfig,
    context: Box<dyn EvaluationContextProvider>,
    event_sink: Arc<dyn EventSink>,
    entities: HashMap<EntityId, EntityRecord>,
    next_entity_seq: u64,
    graph: DependencyGraph,
    scheduler: EvaluationScheduler,
    /// missing entity id -> properties whose source references it
    awaiting: HashMap<EntityId, HashSet<PropertyPath>>,
    errors: HashMap<PropertyPath, PropertyError>,
    batch_depth: usize,
    deferred: Vec<PropertyPath>,
}

impl BindingEngine {
    /// Create an engine over a host-owned context
    pub fn new(
        config: EngineConfig,
        context: Box<dyn EvaluationContextProvider>,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, context, event_sink))
    }

    /// Engine with default configuration, an in-memory context and no events
    pub fn with_defaults() -> Self {
        Self::build(
            EngineConfig::default(),
            Box::new(InMemoryContext::new()),
            Arc::new(NullEventSink),
        )
    }

    fn build(
        config: EngineConfig,
        context: Box<dyn EvaluationContextProvider>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            context,
            event_sink,
            entities: HashMap::new(),
            next_entity_seq: 0,
            graph: DependencyGraph::new(),
            scheduler: EvaluationScheduler::new(),
            awaiting: HashMap::new(),
            errors: HashMap::new(),
            batch_depth: 0,
            deferred: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The evaluation context
    pub fn context(&self) -> &dyn EvaluationContextProvider {
        &*self.context
    }

    /// The dependency graph
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn has_entity(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entity_kind(&self, id: &str) -> Option<EntityKind> {
        self.entities.kind_of(id)
    }

    /// Entity ids in registration order
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.iter().map(|(id, r)| (r.seq, id.clone())).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Raw source of a top-level property
    pub fn raw_value(&self, entity: &str, property: &str) -> Option<&Value> {
        self.entities
            .get(entity)?
            .properties
            .get(property)
            .map(|p| &p.raw)
    }

    /// Register an entity with its initial properties
    ///
    /// Adding an id that already exists with the same kind merges the
    /// properties into it.
    pub fn add_entity(
        &mut self,
        id: impl Into<String>,
        kind: EntityKind,
        properties: Map<String, Value>,
    ) -> Result<Vec<PassReport>> {
        let id = id.into();
        let mut seeds = self.stage_entity(&id, kind)?;
        for (name, raw) in properties {
            let segments = single_segment(&id, &name)?;
            seeds.extend(self.stage_property(&id, &segments, raw, false)?);
        }
        Ok(self.run_passes(seeds))
    }

    /// A property's raw source changed
    ///
    /// `path` may be dotted (`style.color`) to set a nested raw value.
    /// Unknown entities are created as widgets.
    pub fn on_property_changed(
        &mut self,
        entity: &str,
        path: &str,
        raw: Value,
    ) -> Result<Vec<PassReport>> {
        let segments = split_path(path).ok_or_else(|| EngineError::invalid_path(entity, path))?;
        let seeds = self.stage_property(entity, &segments, raw, false)?;
        Ok(self.run_passes(seeds))
    }

    /// Set a top-level property to a literal value
    ///
    /// The value is never scanned for `{{ }}` spans; used for results
    /// coming from outside (query responses, user input).
    pub fn set_external_value(
        &mut self,
        entity: &str,
        property: &str,
        value: Value,
    ) -> Result<Vec<PassReport>> {
        if !self.entities.contains_key(entity) {
            return Err(EngineError::UnknownEntity(entity.to_string()));
        }
        let segments = single_segment(entity, property)?;
        let seeds = self.stage_property(entity, &segments, value, true)?;
        Ok(self.run_passes(seeds))
    }

    /// Remove a property, or a nested raw value for dotted paths
    pub fn remove_property(&mut self, entity: &str, path: &str) -> Result<Vec<PassReport>> {
        let segments = split_path(path).ok_or_else(|| EngineError::invalid_path(entity, path))?;
        let seeds = self.stage_removal(entity, &segments)?;
        Ok(self.run_passes(seeds))
    }

    /// An entity was deleted
    ///
    /// Edges from and to it are pruned; dependents are re-evaluated and
    /// will report the reference as undefined. Removing an unknown id is a
    /// no-op.
    pub fn on_entity_removed(&mut self, id: &str) -> Vec<PassReport> {
        let seeds = self.stage_entity_removal(id);
        self.run_passes(seeds)
    }

    /// Apply several edits and run a single pass
    pub fn apply_changes(
        &mut self,
        changes: impl IntoIterator<Item = PropertyChange>,
    ) -> Result<Vec<PassReport>> {
        self.batch(|engine| {
            for change in changes {
                engine.apply_change(change)?;
            }
            Ok(())
        })
    }

    /// Run `edit` with passes deferred, then run one pass for all of it
    ///
    /// Edits made before an error are kept and evaluated; the error is
    /// returned afterwards.
    pub fn batch<F>(&mut self, edit: F) -> Result<Vec<PassReport>>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.batch_depth += 1;
        let outcome = edit(self);
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return outcome.map(|()| Vec::new());
        }
        let seeds = std::mem::take(&mut self.deferred);
        let reports = self.run_passes(seeds);
        outcome.map(|()| reports)
    }

    fn apply_change(&mut self, change: PropertyChange) -> Result<Vec<PassReport>> {
        match change {
            PropertyChange::Set {
                entity,
                path,
                value,
            } => self.on_property_changed(&entity, &path, value),
            PropertyChange::Remove { entity, path } => self.remove_property(&entity, &path),
            PropertyChange::RemoveEntity { entity } => Ok(self.on_entity_removed(&entity)),
        }
    }

    /// Evaluated value at a property path, with its recorded error
    ///
    /// Deep paths are resolved inside the evaluated top-level value.
    /// Returns `None` when nothing was evaluated there.
    pub fn evaluated_value(&self, entity: &str, path: &str) -> Option<EvaluatedValue> {
        let segments = split_path(path)?;
        let (root, rest) = segments.split_first()?;
        let value = self
            .context
            .entity(entity)
            .and_then(|values| values.get(root))
            .and_then(|value| value_at(value, rest.iter().map(String::as_str)))
            .cloned();
        let error = self.errors.get(&PropertyPath::new(entity, root.as_str())).cloned();
        if value.is_none() && error.is_none() {
            return None;
        }
        Some(EvaluatedValue {
            value: value.unwrap_or(Value::Null),
            error,
        })
    }

    /// Errors recorded for an entity, keyed by property
    pub fn errors(&self, entity: &str) -> HashMap<String, PropertyError> {
        self.errors
            .iter()
            .filter(|(path, _)| path.entity == entity)
            .map(|(path, error)| (path.path.clone(), error.clone()))
            .collect()
    }

    /// Paths a property reads, sorted
    pub fn dependencies_of(&self, entity: &str, property: &str) -> Vec<PropertyPath> {
        let mut deps: Vec<_> = self
            .graph
            .dependencies_of(&PropertyPath::new(entity, property))
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default();
        deps.sort();
        deps
    }

    /// Properties directly reading `path`, sorted
    pub fn dependents_of(&self, entity: &str, path: &str) -> Vec<PropertyPath> {
        let mut dependents: Vec<_> = self
            .graph
            .dependents_of(&PropertyPath::new(entity, path))
            .into_iter()
            .collect();
        dependents.sort();
        dependents
    }

    /// Evaluate every property
    pub fn reevaluate_all(&mut self) -> Vec<PassReport> {
        let seeds = self.all_nodes();
        self.run_passes(seeds)
    }

    /// Replace everything with a definition and evaluate it
    ///
    /// All entities are registered before any property is linked, so
    /// forward references resolve regardless of order. A definition with
    /// invalid ids or property names is rejected before anything changes.
    pub fn load_definition(&mut self, definition: AppDefinition) -> Result<Vec<PassReport>> {
        check_definition(&definition)?;
        self.reset();
        for entity in &definition.entities {
            self.stage_entity(&entity.id, entity.kind)?;
        }
        for entity in definition.entities {
            for (name, raw) in entity.properties {
                let segments = single_segment(&entity.id, &name)?;
                self.stage_property(&entity.id, &segments, raw, false)?;
            }
        }
        let seeds = self.all_nodes();
        log::debug!(
            "Loaded definition with {} entities and {} properties",
            self.entities.len(),
            seeds.len()
        );
        Ok(self.run_passes(seeds))
    }

    /// Current raw sources as a definition
    pub fn definition(&self) -> AppDefinition {
        let mut records: Vec<_> = self.entities.iter().collect();
        records.sort_by_key(|(_, r)| r.seq);
        AppDefinition {
            entities: records
                .into_iter()
                .map(|(id, record)| {
                    let mut entity = EntityDefinition::new(id.clone(), record.kind);
                    for (name, property) in record.ordered_properties() {
                        entity.properties.insert(name.clone(), property.raw.clone());
                    }
                    entity
                })
                .collect(),
        }
    }

    /// Drop all entities, edges, errors and context values
    pub fn reset(&mut self) {
        self.entities.clear();
        self.next_entity_seq = 0;
        self.graph = DependencyGraph::new();
        self.awaiting.clear();
        self.errors.clear();
        self.deferred.clear();
        self.context.clear();
    }

    // ---- staging ----

    fn stage_entity(&mut self, id: &str, kind: EntityKind) -> Result<Vec<PropertyPath>> {
        if id.is_empty() {
            return Err(EngineError::InvalidEntityId(id.to_string()));
        }
        match self.entities.get(id) {
            Some(record) if record.kind == kind => return Ok(Vec::new()),
            Some(_) => {
                return Err(EngineError::WrongEntityKind {
                    id: id.to_string(),
                    expected: kind.to_string(),
                })
            }
            None => {}
        }

        let seq = self.next_entity_seq;
        self.next_entity_seq += 1;
        self.entities.insert(id.to_string(), EntityRecord::new(kind, seq));
        log::debug!("Registered {} '{}'", kind, id);

        let mut waiting: Vec<_> = self.awaiting.remove(id).unwrap_or_default().into_iter().collect();
        waiting.sort();
        for node in &waiting {
            log::debug!("Relinking '{}' now that '{}' exists", node, id);
            self.link(node);
        }
        Ok(waiting)
    }

    fn stage_property(
        &mut self,
        entity: &str,
        segments: &[String],
        raw: Value,
        literal: bool,
    ) -> Result<Vec<PropertyPath>> {
        let (root, rest) = segments
            .split_first()
            .ok_or_else(|| EngineError::invalid_path(entity, ""))?;
        let mut seeds = if self.entities.contains_key(entity) {
            Vec::new()
        } else {
            self.stage_entity(entity, EntityKind::Widget)?
        };

        let record = self
            .entities
            .get_mut(entity)
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))?;
        let raw = if rest.is_empty() {
            raw
        } else {
            let mut whole = record
                .properties
                .get(root)
                .map(|p| p.raw.clone())
                .unwrap_or(Value::Null);
            set_nested(&mut whole, rest, raw);
            whole
        };
        let compiled = if literal {
            CompiledValue::Plain(raw.clone())
        } else {
            CompiledValue::compile(&raw)
        };
        record.set(root, raw, compiled);

        let node = PropertyPath::new(entity, root.as_str());
        self.link(&node);
        seeds.push(node);
        Ok(seeds)
    }

    fn stage_removal(&mut self, entity: &str, segments: &[String]) -> Result<Vec<PropertyPath>> {
        let (root, rest) = segments
            .split_first()
            .ok_or_else(|| EngineError::invalid_path(entity, ""))?;
        let record = self
            .entities
            .get_mut(entity)
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))?;
        let node = PropertyPath::new(entity, root.as_str());

        if rest.is_empty() {
            if record.properties.remove(root).is_none() {
                return Ok(Vec::new());
            }
            self.graph.remove_node(&node);
            self.unpark(&node);
            self.errors.remove(&node);
            self.context.remove_property(&node);
            return Ok(vec![node]);
        }

        let Some(source) = record.properties.get(root) else {
            return Ok(Vec::new());
        };
        let mut raw = source.raw.clone();
        if !remove_nested(&mut raw, rest) {
            return Ok(Vec::new());
        }
        let compiled = CompiledValue::compile(&raw);
        record.set(root, raw, compiled);
        self.link(&node);
        Ok(vec![node])
    }

    fn stage_entity_removal(&mut self, id: &str) -> Vec<PropertyPath> {
        let Some(record) = self.entities.remove(id) else {
            log::debug!("Ignoring removal of unknown entity '{}'", id);
            return Vec::new();
        };
        for name in record.properties.keys() {
            let node = PropertyPath::new(id, name.as_str());
            self.unpark(&node);
            self.errors.remove(&node);
        }

        let mut pruned: Vec<_> = self.graph.remove_entity(id).into_iter().collect();
        pruned.sort();
        for node in &pruned {
            log::warn!("Pruned edges from '{}' to removed entity '{}'", node, id);
            // Parks the dangling reference until the id reappears
            self.link(node);
        }
        self.context.remove_entity(id);

        self.emit(EvaluationEvent::EntityRemoved {
            entity_id: id.to_string(),
            pruned_dependents: pruned.iter().map(ToString::to_string).collect(),
        });
        pruned
    }

    /// Re-extract a property's dependencies and replace its edges
    fn link(&mut self, node: &PropertyPath) {
        self.unpark(node);
        let extraction = match self.source(node) {
            Some(source) => extract_compiled(&source.compiled, node, &self.entities, &self.config),
            None => {
                self.graph.remove_node(node);
                return;
            }
        };
        for id in &extraction.unresolved {
            log::warn!("Property '{}' references unknown entity '{}'", node, id);
            self.awaiting.entry(id.clone()).or_default().insert(node.clone());
        }
        // Bare names are often not meant as entities, but still relink
        // when an entity of that name appears
        for name in &extraction.unknown_names {
            log::debug!("Property '{}' reads unknown name '{}'", node, name);
            self.awaiting.entry(name.clone()).or_default().insert(node.clone());
        }
        self.graph.set_dependencies(node, extraction.paths());
    }

    fn unpark(&mut self, node: &PropertyPath) {
        self.awaiting.retain(|_, nodes| {
            nodes.remove(node);
            !nodes.is_empty()
        });
    }

    fn source(&self, node: &PropertyPath) -> Option<&SourceProperty> {
        self.entities.get(&node.entity)?.properties.get(&node.path)
    }

    fn all_nodes(&self) -> Vec<PropertyPath> {
        let mut nodes: Vec<(Rank, PropertyPath)> = self
            .entities
            .iter()
            .flat_map(|(id, record)| {
                record.properties.iter().map(move |(name, property)| {
                    ((record.seq, property.seq), PropertyPath::new(id.clone(), name.clone()))
                })
            })
            .collect();
        nodes.sort();
        nodes.into_iter().map(|(_, node)| node).collect()
    }

    // ---- passes ----

    fn run_passes(&mut self, seeds: Vec<PropertyPath>) -> Vec<PassReport> {
        if self.batch_depth > 0 {
            self.deferred.extend(seeds);
            return Vec::new();
        }
        self.scheduler.enqueue(seeds);
        let mut reports = Vec::new();
        while let Some(seeds) = self.scheduler.next_pending() {
            reports.push(self.run_pass(seeds));
        }
        reports
    }

    fn run_pass(&mut self, mut seeds: Vec<PropertyPath>) -> PassReport {
        seeds.sort();
        seeds.dedup();
        let pass_id = Uuid::new_v4().to_string();
        log::debug!("Pass {} started with {} seed(s)", pass_id, seeds.len());
        self.emit(EvaluationEvent::PassStarted {
            pass_id: pass_id.clone(),
            seeds: seeds.iter().map(ToString::to_string).collect(),
        });

        let entities = &self.entities;
        let rank = |path: &PropertyPath| -> Option<Rank> {
            let record = entities.get(&path.entity)?;
            record.properties.get(&path.path).map(|p| (record.seq, p.seq))
        };
        let plan = self.scheduler.plan(&self.graph, &seeds, &rank);

        let mut report = PassReport {
            pass_id,
            seeds,
            cycles: plan.cycles.clone(),
            skipped: plan.skipped.clone(),
            ..PassReport::default()
        };

        for cycle in &plan.cycles {
            let mut members: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            log::warn!("Circular dependency: {}", members.join(" -> "));
            self.emit(EvaluationEvent::CycleDetected {
                pass_id: report.pass_id.clone(),
                members: members.clone(),
            });
            if let Some(first) = members.first().cloned() {
                members.push(first);
            }
            let error = PropertyError::CircularDependency { cycle: members };
            for member in cycle {
                // Cycle members keep whatever value they had
                let retained = self.published_value(member).unwrap_or(Value::Null);
                self.errors.insert(member.clone(), error.clone());
                self.emit(EvaluationEvent::property_failed(&member.entity, &member.path, error.clone()));
                report.results.insert(
                    member.clone(),
                    EvaluatedValue {
                        value: retained,
                        error: Some(error.clone()),
                    },
                );
            }
        }

        for node in plan.order {
            let (value, mut failures) = {
                let Some(source) = self.source(&node) else {
                    report.skipped.push(node);
                    continue;
                };
                let scope = ContextScope {
                    context: &*self.context,
                    entities: &self.entities,
                    config: &self.config,
                };
                source.compiled.evaluate(&scope)
            };

            // Syntax errors do not depend on data, so they are reported first
            failures.sort_by_key(|error| !matches!(error, PropertyError::Parse { .. }));
            let mut failures = failures.into_iter();
            let result = match failures.next() {
                None => {
                    self.errors.remove(&node);
                    self.context.publish(&node, value.clone());
                    self.emit(EvaluationEvent::property_evaluated(&node.entity, &node.path, value.clone()));
                    EvaluatedValue::ok(value)
                }
                Some(error) => {
                    log::debug!("Property '{}' failed: {}", node, error);
                    for other in failures {
                        log::debug!("Property '{}' also failed: {}", node, other);
                    }
                    self.errors.insert(node.clone(), error.clone());
                    self.context.publish(&node, Value::Null);
                    self.emit(EvaluationEvent::property_failed(&node.entity, &node.path, error.clone()));
                    EvaluatedValue {
                        value: Value::Null,
                        error: Some(error),
                    }
                }
            };
            report.results.insert(node.clone(), result);
            report.order.push(node);
        }

        log::debug!(
            "Pass {} completed: {} evaluated, {} failed, {} skipped",
            report.pass_id,
            report.order.len(),
            report.failed(),
            report.skipped.len()
        );
        self.emit(EvaluationEvent::PassCompleted {
            pass_id: report.pass_id.clone(),
            evaluated: report.order.len(),
            failed: report.failed(),
            skipped: report.skipped.len(),
        });
        self.scheduler.finish();
        report
    }

    fn published_value(&self, node: &PropertyPath) -> Option<Value> {
        self.context.entity(&node.entity)?.get(&node.path).cloned()
    }

    fn emit(&self, event: EvaluationEvent) {
        let _ = self.event_sink.send(event);
    }
}

/// Reject definitions that could not be staged completely
fn check_definition(definition: &AppDefinition) -> Result<()> {
    let mut kinds: HashMap<&str, EntityKind> = HashMap::new();
    for entity in &definition.entities {
        if entity.id.is_empty() {
            return Err(EngineError::InvalidEntityId(entity.id.clone()));
        }
        match kinds.insert(entity.id.as_str(), entity.kind) {
            Some(kind) if kind != entity.kind => {
                return Err(EngineError::WrongEntityKind {
                    id: entity.id.clone(),
                    expected: kind.to_string(),
                })
            }
            _ => {}
        }
        for name in entity.properties.keys() {
            single_segment(&entity.id, name)?;
        }
    }
    Ok(())
}

/// Validate a top-level property name
fn single_segment(entity: &str, name: &str) -> Result<Vec<String>> {
    match split_path(name) {
        Some(segments) if segments.len() == 1 => Ok(segments),
        _ => Err(EngineError::invalid_path(entity, name)),
    }
}

/// Set a nested value, creating objects along the way
///
/// Numeric segments index into existing arrays; anything else that is not
/// an object is replaced by one.
fn set_nested(target: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if let Value::Array(items) = target {
        if let Some(item) = first.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            set_nested(item, rest, value);
            return;
        }
    }
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        set_nested(map.entry(first.clone()).or_insert(Value::Null), rest, value);
    }
}

/// Remove a nested value; returns whether anything was removed
fn remove_nested(target: &mut Value, segments: &[String]) -> bool {
    match segments {
        [] => false,
        [last] => match target {
            Value::Object(map) => map.remove(last).is_some(),
            Value::Array(items) => match last.parse::<usize>() {
                Ok(i) if i < items.len() => {
                    items.remove(i);
                    true
                }
                _ => false,
            },
            _ => false,
        },
        [first, rest @ ..] => match target {
            Value::Object(map) => map.get_mut(first).is_some_and(|v| remove_nested(v, rest)),
            Value::Array(items) => first
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
                .is_some_and(|v| remove_nested(v, rest)),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::VecEventSink;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn value(engine: &BindingEngine, entity: &str, path: &str) -> Value {
        engine.evaluated_value(entity, path).unwrap().value
    }

    #[test]
    fn test_plain_property_evaluates_to_literal() {
        let mut engine = BindingEngine::with_defaults();
        let reports = engine.on_property_changed("a", "count", json!(3)).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result("a", "count"), Some(&EvaluatedValue::ok(json!(3))));
        assert_eq!(engine.entity_kind("a"), Some(EntityKind::Widget));
        assert_eq!(engine.graph().edge_count(), 0);
    }

    #[test]
    fn test_dependent_follows_source() {
        let mut engine = BindingEngine::with_defaults();
        engine.on_property_changed("b", "value", json!(2)).unwrap();
        engine
            .on_property_changed("a", "text", json!("{{ widgets.b.value * 10 }}"))
            .unwrap();
        assert_eq!(value(&engine, "a", "text"), json!(20));

        let reports = engine.on_property_changed("b", "value", json!(4)).unwrap();
        assert_eq!(
            reports[0].order,
            vec![PropertyPath::new("b", "value"), PropertyPath::new("a", "text")]
        );
        assert_eq!(value(&engine, "a", "text"), json!(40));
    }

    #[test]
    fn test_nested_set_and_deep_read() {
        let mut engine = BindingEngine::with_defaults();
        engine
            .on_property_changed("q", "config.url", json!("/users/{{ widgets.input.value }}"))
            .unwrap();
        engine.on_property_changed("input", "value", json!(7)).unwrap();

        assert_eq!(value(&engine, "q", "config.url"), json!("/users/7"));
        assert_eq!(engine.raw_value("q", "config"), Some(&json!({"url": "/users/{{ widgets.input.value }}"})));

        engine.remove_property("q", "config.url").unwrap();
        assert_eq!(engine.raw_value("q", "config"), Some(&json!({})));
        assert!(engine.dependents_of("input", "value").is_empty());
    }

    #[test]
    fn test_forward_reference_relinks_when_entity_appears() {
        let mut engine = BindingEngine::with_defaults();
        engine
            .on_property_changed("a", "text", json!("{{ widgets.later.value }}"))
            .unwrap();
        assert!(engine.errors("a")["text"].to_string().contains("later"));

        let reports = engine.on_property_changed("later", "value", json!("here")).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(value(&engine, "a", "text"), json!("here"));
        assert!(engine.errors("a").is_empty());
        assert_eq!(
            engine.dependencies_of("a", "text"),
            vec![PropertyPath::new("later", "value")]
        );
    }

    #[test]
    fn test_namespace_kind_must_match() {
        let mut engine = BindingEngine::with_defaults();
        engine
            .add_entity("users", EntityKind::Query, props(json!({"data": [1, 2]})))
            .unwrap();
        engine
            .on_property_changed("a", "count", json!("{{ queries.users.data.length }}"))
            .unwrap();
        engine
            .on_property_changed("a", "wrong", json!("{{ widgets.users.data }}"))
            .unwrap();

        assert_eq!(value(&engine, "a", "count"), json!(2));
        assert!(engine.errors("a").contains_key("wrong"));
        assert!(matches!(
            engine.add_entity("users", EntityKind::Widget, Map::new()),
            Err(EngineError::WrongEntityKind { .. })
        ));
    }

    #[test]
    fn test_batch_runs_one_pass() {
        let mut engine = BindingEngine::with_defaults();
        let reports = engine
            .apply_changes(vec![
                PropertyChange::Set {
                    entity: "a".to_string(),
                    path: "text".to_string(),
                    value: json!("{{ b.first }} {{ b.last }}"),
                },
                PropertyChange::Set {
                    entity: "b".to_string(),
                    path: "first".to_string(),
                    value: json!("Ada"),
                },
                PropertyChange::Set {
                    entity: "b".to_string(),
                    path: "last".to_string(),
                    value: json!("Lovelace"),
                },
            ])
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(value(&engine, "a", "text"), json!("Ada Lovelace"));
    }

    #[test]
    fn test_batch_error_still_evaluates_earlier_edits() {
        let mut engine = BindingEngine::with_defaults();
        let outcome = engine.batch(|engine| {
            engine.on_property_changed("a", "value", json!(1))?;
            engine.on_property_changed("a", "", json!(2))?;
            Ok(())
        });
        assert!(matches!(outcome, Err(EngineError::InvalidPropertyPath { .. })));
        assert_eq!(value(&engine, "a", "value"), json!(1));
    }

    #[test]
    fn test_invalid_ids_and_paths() {
        let mut engine = BindingEngine::with_defaults();
        assert!(matches!(
            engine.on_property_changed("", "value", json!(1)),
            Err(EngineError::InvalidEntityId(_))
        ));
        assert!(matches!(
            engine.on_property_changed("a", "x..y", json!(1)),
            Err(EngineError::InvalidPropertyPath { .. })
        ));
        assert!(matches!(
            engine.remove_property("ghost", "value"),
            Err(EngineError::UnknownEntity(_))
        ));
        assert!(matches!(
            engine.set_external_value("ghost", "data", json!(1)),
            Err(EngineError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_external_values_are_not_templated() {
        let mut engine = BindingEngine::with_defaults();
        engine.add_entity("q", EntityKind::Query, Map::new()).unwrap();
        engine.on_property_changed("a", "value", json!(1)).unwrap();
        engine
            .set_external_value("q", "data", json!("{{ widgets.a.value }}"))
            .unwrap();

        assert_eq!(value(&engine, "q", "data"), json!("{{ widgets.a.value }}"));
        assert!(engine.dependencies_of("q", "data").is_empty());
    }

    #[test]
    fn test_removed_property_reads_as_null() {
        let mut engine = BindingEngine::with_defaults();
        engine.on_property_changed("b", "value", json!("x")).unwrap();
        engine
            .on_property_changed("a", "text", json!("[{{ b.value }}]"))
            .unwrap();

        let reports = engine.remove_property("b", "value").unwrap();
        assert_eq!(reports[0].skipped, vec![PropertyPath::new("b", "value")]);
        assert_eq!(value(&engine, "a", "text"), json!("[]"));
        assert!(engine.evaluated_value("b", "value").is_none());
    }

    #[test]
    fn test_definition_round_trip() {
        let mut engine = BindingEngine::with_defaults();
        let definition = AppDefinition {
            entities: vec![
                EntityDefinition {
                    id: "greeting".to_string(),
                    kind: EntityKind::Widget,
                    properties: props(json!({"text": "hi {{ name.value }}"})),
                },
                EntityDefinition {
                    id: "name".to_string(),
                    kind: EntityKind::Widget,
                    properties: props(json!({"value": "ada"})),
                },
            ],
        };
        engine.load_definition(definition.clone()).unwrap();

        assert_eq!(value(&engine, "greeting", "text"), json!("hi ada"));
        assert_eq!(engine.definition(), definition);
        assert_eq!(engine.entity_ids(), vec!["greeting".to_string(), "name".to_string()]);

        engine.load_definition(AppDefinition::new()).unwrap();
        assert!(engine.entity_ids().is_empty());
        assert!(engine.context().snapshot().is_empty());
    }

    #[test]
    fn test_failed_load_keeps_previous_state() {
        let mut engine = BindingEngine::with_defaults();
        engine.on_property_changed("old", "value", json!(1)).unwrap();
        let before = engine.definition();

        let widget = |id: &str, properties: Value| EntityDefinition {
            id: id.to_string(),
            kind: EntityKind::Widget,
            properties: props(properties),
        };
        let bad_name = AppDefinition {
            entities: vec![widget("a", json!({"text": "hi"})), widget("b", json!({"x.y": 1}))],
        };
        let bad_kind = AppDefinition {
            entities: vec![
                widget("a", json!({"text": "hi"})),
                EntityDefinition::new("a", EntityKind::Query),
            ],
        };
        let bad_id = AppDefinition {
            entities: vec![widget("a", json!({})), widget("", json!({}))],
        };

        assert!(matches!(
            engine.load_definition(bad_name),
            Err(EngineError::InvalidPropertyPath { .. })
        ));
        assert!(matches!(
            engine.load_definition(bad_kind),
            Err(EngineError::WrongEntityKind { .. })
        ));
        assert!(matches!(
            engine.load_definition(bad_id),
            Err(EngineError::InvalidEntityId(_))
        ));

        assert_eq!(engine.definition(), before);
        assert!(!engine.has_entity("a"));
        assert_eq!(value(&engine, "old", "value"), json!(1));
    }

    #[test]
    fn test_syntax_error_reported_before_runtime_error() {
        let mut engine = BindingEngine::with_defaults();
        engine
            .on_property_changed("a", "text", json!("{{ widgets.nobody.value }} {{ 1 + }}"))
            .unwrap();
        assert!(matches!(engine.errors("a")["text"], PropertyError::Parse { .. }));
    }

    #[test]
    fn test_events_stream_pass() {
        let sink = Arc::new(VecEventSink::new());
        let mut engine = BindingEngine::new(
            EngineConfig::default(),
            Box::new(InMemoryContext::new()),
            sink.clone(),
        )
        .unwrap();
        engine.on_property_changed("a", "value", json!(1)).unwrap();

        let events = sink.events();
        assert!(matches!(events.first(), Some(EvaluationEvent::PassStarted { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            EvaluationEvent::PropertyEvaluated { entity_id, .. } if entity_id == "a"
        )));
        assert!(matches!(
            events.last(),
            Some(EvaluationEvent::PassCompleted { evaluated: 1, failed: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            query_namespace: "widgets".to_string(),
            ..EngineConfig::default()
        };
        assert!(BindingEngine::new(config, Box::new(InMemoryContext::new()), Arc::new(NullEventSink)).is_err());
    }

    #[test]
    fn test_set_nested_helpers() {
        let mut value = json!({"rows": [{"name": "a"}]});
        set_nested(&mut value, &["rows".to_string(), "0".to_string(), "name".to_string()], json!("b"));
        set_nested(&mut value, &["style".to_string(), "color".to_string()], json!("red"));
        assert_eq!(value, json!({"rows": [{"name": "b"}], "style": {"color": "red"}}));

        assert!(remove_nested(&mut value, &["rows".to_string(), "0".to_string()]));
        assert!(!remove_nested(&mut value, &["missing".to_string(), "x".to_string()]));
        assert_eq!(value, json!({"rows": [], "style": {"color": "red"}}));
    }
}
