//! Engine configuration
//!
//! Controls how expressions address entities and how much editing history
//! is kept. Hosts usually embed this in their own settings file and hand
//! the engine a deserialized copy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::EntityKind;

/// Default values
pub mod defaults {
    /// Root identifier under which widgets are addressed
    pub const WIDGET_NAMESPACE: &str = "widgets";
    /// Root identifier under which queries are addressed
    pub const QUERY_NAMESPACE: &str = "queries";
    /// Whether `{{ input1.value }}` resolves without a namespace
    pub const BARE_ENTITY_REFS: bool = true;
    /// Number of definition snapshots kept for undo
    pub const HISTORY_DEPTH: usize = 100;
    /// zstd level for history snapshots
    pub const HISTORY_COMPRESSION_LEVEL: i32 = 3;
}

/// Configuration for a [`BindingEngine`](crate::BindingEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Namespace root for widgets (`widgets.input1.value`)
    pub widget_namespace: String,
    /// Namespace root for queries (`queries.users.data`)
    pub query_namespace: String,
    /// Allow referencing an entity by its bare id (`input1.value`)
    pub bare_entity_refs: bool,
    /// Maximum number of undo snapshots
    pub history_depth: usize,
    /// zstd compression level for undo snapshots
    pub history_compression_level: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            widget_namespace: defaults::WIDGET_NAMESPACE.to_string(),
            query_namespace: defaults::QUERY_NAMESPACE.to_string(),
            bare_entity_refs: defaults::BARE_ENTITY_REFS,
            history_depth: defaults::HISTORY_DEPTH,
            history_compression_level: defaults::HISTORY_COMPRESSION_LEVEL,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check that namespace roots are usable identifiers
    pub fn validate(&self) -> Result<()> {
        for name in [&self.widget_namespace, &self.query_namespace] {
            let mut chars = name.chars();
            let valid_start = chars
                .next()
                .is_some_and(|c| c == '_' || c == '$' || c.is_alphabetic());
            if !valid_start || !chars.all(|c| c == '_' || c == '$' || c.is_alphanumeric()) {
                return Err(EngineError::Config(format!(
                    "namespace '{}' is not a valid identifier",
                    name
                )));
            }
        }
        if self.widget_namespace == self.query_namespace {
            return Err(EngineError::Config(
                "widget and query namespaces must differ".to_string(),
            ));
        }
        if !(1..=22).contains(&self.history_compression_level) {
            return Err(EngineError::Config(format!(
                "history compression level {} is outside 1..=22",
                self.history_compression_level
            )));
        }
        Ok(())
    }

    /// The entity kind addressed by a namespace root
    pub fn namespace_kind(&self, name: &str) -> Option<EntityKind> {
        if name == self.widget_namespace {
            Some(EntityKind::Widget)
        } else if name == self.query_namespace {
            Some(EntityKind::Query)
        } else {
            None
        }
    }
}
