//! Binding Engine - reactive property bindings for low-code app builders
//!
//! Widget and query properties may contain `{{ expression }}` spans that
//! read other entities' values. This crate tracks which properties read
//! which, and recomputes evaluated values in dependency order whenever a
//! source changes. It supports:
//!
//! - Fine-grained dependencies down to subpaths (`queries.users.data.0.name`)
//! - Deterministic topological scheduling of only the affected properties
//! - Cycle detection that flags every member and leaves the rest running
//! - Local failures: a bad expression only breaks its own property
//! - Asynchronous query runs publishing `isLoading`, `data` and `error`
//! - Compressed snapshot-based undo/redo of application definitions
//!
//! # Architecture
//!
//! - `extractor`: derives `{ on, property }` references from a raw value
//! - `DependencyGraph`: bidirectional edge index
//! - `EvaluationScheduler`: closure, Kahn ordering, Tarjan cycle split
//! - `BindingEngine`: facade owning sources, graph and scheduler
//! - `EvaluationContextProvider`: the host's store of evaluated values
//! - `EventSink`: event streaming, independent of any UI framework
//!
//! # Example
//!
//! ```ignore
//! use binding_engine::BindingEngine;
//! use serde_json::json;
//!
//! let mut engine = BindingEngine::with_defaults();
//! engine.on_property_changed("name", "value", json!("world"))?;
//! engine.on_property_changed("greeting", "text", json!("hello {{ widgets.name.value }}"))?;
//! assert_eq!(engine.evaluated_value("greeting", "text").unwrap().value, json!("hello world"));
//! ```

pub mod builder;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod extractor;
pub mod graph;
pub mod history;
pub mod runtime;
pub mod scheduler;
pub mod template;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::DefinitionBuilder;
pub use config::EngineConfig;
pub use context::{ContextSnapshot, EntityValues, EvaluationContextProvider, InMemoryContext};
pub use engine::{BindingEngine, PassReport, PropertyChange};
pub use error::{EngineError, EvalError, EvalErrorKind, ParseError, PropertyError, Result};
pub use events::{EvaluationEvent, EventError, EventSink, NullEventSink, VecEventSink};
pub use extractor::{extract_dependencies, EntityLookup, Extraction};
pub use graph::DependencyGraph;
pub use history::DefinitionHistory;
pub use runtime::{QueryOutcome, QueryRun, QueryRunner, QueryRuntime};
pub use scheduler::{EvaluationScheduler, PassPlan, SchedulerState};
pub use types::{
    AppDefinition, Dependency, EntityDefinition, EntityId, EntityKind, EvaluatedValue, PropertyPath,
};
pub use validation::{validate_definition, ValidationError};
