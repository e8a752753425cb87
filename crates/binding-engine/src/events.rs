//! Event types for streaming evaluation results
//!
//! Events are sent from the engine to the host (editor state store,
//! debug panel, tests) to report passes, evaluated values and errors.

use serde::{Deserialize, Serialize};

use crate::error::PropertyError;

/// Trait for sending evaluation events
///
/// This abstracts over the transport mechanism (channel, UI store
/// callback, etc.) so the engine does not depend on a host framework.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g. the
    /// receiving side has gone away)
    fn send(&self, event: EvaluationEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

/// Events emitted while evaluating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EvaluationEvent {
    /// A scheduling pass started
    #[serde(rename_all = "camelCase")]
    PassStarted {
        pass_id: String,
        seeds: Vec<String>,
    },

    /// A property was evaluated successfully
    #[serde(rename_all = "camelCase")]
    PropertyEvaluated {
        entity_id: String,
        property: String,
        value: serde_json::Value,
    },

    /// A property evaluated with an error
    #[serde(rename_all = "camelCase")]
    PropertyFailed {
        entity_id: String,
        property: String,
        error: PropertyError,
    },

    /// Properties excluded from the pass because they form a cycle
    #[serde(rename_all = "camelCase")]
    CycleDetected {
        pass_id: String,
        members: Vec<String>,
    },

    /// A scheduling pass finished
    #[serde(rename_all = "camelCase")]
    PassCompleted {
        pass_id: String,
        evaluated: usize,
        failed: usize,
        skipped: usize,
    },

    /// An entity and its edges were removed
    #[serde(rename_all = "camelCase")]
    EntityRemoved {
        entity_id: String,
        pruned_dependents: Vec<String>,
    },

    /// A query run was started by the query runtime
    #[serde(rename_all = "camelCase")]
    QueryStarted {
        query_id: String,
        run_id: String,
    },

    /// A query run finished and its result was published
    #[serde(rename_all = "camelCase")]
    QueryResolved {
        query_id: String,
        run_id: String,
        error: Option<String>,
    },
}

impl EvaluationEvent {
    /// Create a property failed event
    pub fn property_failed(entity_id: &str, property: &str, error: PropertyError) -> Self {
        Self::PropertyFailed {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            error,
        }
    }

    /// Create a property evaluated event
    pub fn property_evaluated(entity_id: &str, property: &str, value: serde_json::Value) -> Self {
        Self::PropertyEvaluated {
            entity_id: entity_id.to_string(),
            property: property.to_string(),
            value,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: EvaluationEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<EvaluationEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<EvaluationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: EvaluationEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}
