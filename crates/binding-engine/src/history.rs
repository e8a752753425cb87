//! Undo/redo over application definitions
//!
//! Each snapshot is the whole [`AppDefinition`] serialized to JSON and
//! compressed with zstd. Restoring a snapshot means loading it into the
//! engine, which rebuilds the graph and re-evaluates everything.

use std::collections::VecDeque;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::AppDefinition;

/// Undo/redo stack of compressed definition snapshots
pub struct DefinitionHistory {
    /// Compressed definitions (zstd)
    snapshots: VecDeque<Vec<u8>>,
    /// Index of the current snapshot
    current: usize,
    max_snapshots: usize,
    compression_level: i32,
}

impl DefinitionHistory {
    /// Create a history keeping at most `max_snapshots` entries
    pub fn new(max_snapshots: usize, compression_level: i32) -> Self {
        Self {
            snapshots: VecDeque::new(),
            current: 0,
            max_snapshots: max_snapshots.max(1),
            compression_level,
        }
    }

    /// Create a history sized by the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.history_depth, config.history_compression_level)
    }

    /// Record a new state
    ///
    /// Truncates any redo history.
    pub fn push(&mut self, definition: &AppDefinition) -> Result<()> {
        let json = serde_json::to_vec(definition)?;
        let compressed = zstd::encode_all(&json[..], self.compression_level)
            .map_err(|e| EngineError::Compression(e.to_string()))?;

        self.snapshots.truncate(self.current + 1);
        self.snapshots.push_back(compressed);
        self.current = self.snapshots.len() - 1;

        while self.snapshots.len() > self.max_snapshots {
            self.snapshots.pop_front();
            self.current = self.current.saturating_sub(1);
        }
        Ok(())
    }

    /// Step back; `None` at the oldest state
    pub fn undo(&mut self) -> Option<Result<AppDefinition>> {
        if !self.can_undo() {
            return None;
        }
        self.current -= 1;
        Some(self.decompress(self.current))
    }

    /// Step forward; `None` at the newest state
    pub fn redo(&mut self) -> Option<Result<AppDefinition>> {
        if !self.can_redo() {
            return None;
        }
        self.current += 1;
        Some(self.decompress(self.current))
    }

    /// The current state without moving
    pub fn current(&self) -> Option<Result<AppDefinition>> {
        (!self.snapshots.is_empty()).then(|| self.decompress(self.current))
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current + 1 < self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.current = 0;
    }

    /// Total compressed size of all snapshots in bytes
    pub fn compressed_size(&self) -> usize {
        self.snapshots.iter().map(Vec::len).sum()
    }

    fn decompress(&self, index: usize) -> Result<AppDefinition> {
        let compressed = self
            .snapshots
            .get(index)
            .ok_or_else(|| EngineError::Compression(format!("no snapshot at {}", index)))?;
        let json = zstd::decode_all(&compressed[..])
            .map_err(|e| EngineError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for DefinitionHistory {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DefinitionBuilder;
    use crate::engine::BindingEngine;
    use serde_json::json;

    fn definition(text: &str) -> AppDefinition {
        DefinitionBuilder::new()
            .widget("label")
            .with_property("text", json!(text))
            .build()
    }

    fn text_of(definition: &AppDefinition) -> &serde_json::Value {
        &definition.entities[0].properties["text"]
    }

    #[test]
    fn test_push_and_undo() {
        let mut history = DefinitionHistory::default();
        history.push(&definition("first")).unwrap();
        history.push(&definition("second")).unwrap();
        history.push(&definition("third")).unwrap();

        assert_eq!(text_of(&history.current().unwrap().unwrap()), "third");
        assert_eq!(text_of(&history.undo().unwrap().unwrap()), "second");
        assert_eq!(text_of(&history.undo().unwrap().unwrap()), "first");
        assert!(history.undo().is_none());
    }

    #[test]
    fn test_redo_and_truncation() {
        let mut history = DefinitionHistory::default();
        history.push(&definition("first")).unwrap();
        history.push(&definition("second")).unwrap();

        history.undo().unwrap().unwrap();
        assert!(history.can_redo());
        assert_eq!(text_of(&history.redo().unwrap().unwrap()), "second");
        assert!(history.redo().is_none());

        history.undo().unwrap().unwrap();
        history.push(&definition("branch")).unwrap();
        assert!(!history.can_redo());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_depth_limit() {
        let mut history = DefinitionHistory::new(2, 3);
        history.push(&definition("a")).unwrap();
        history.push(&definition("b")).unwrap();
        history.push(&definition("c")).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(text_of(&history.undo().unwrap().unwrap()), "b");
        assert!(!history.can_undo());
        assert!(history.compressed_size() > 0);

        history.clear();
        assert!(history.is_empty());
        assert!(history.current().is_none());
    }

    #[test]
    fn test_undo_restores_engine_state() {
        let mut engine = BindingEngine::with_defaults();
        let mut history = DefinitionHistory::default();

        engine.on_property_changed("name", "value", json!("world")).unwrap();
        engine
            .on_property_changed("label", "text", json!("hello {{ name.value }}"))
            .unwrap();
        history.push(&engine.definition()).unwrap();

        engine.on_property_changed("name", "value", json!("mars")).unwrap();
        history.push(&engine.definition()).unwrap();
        assert_eq!(engine.evaluated_value("label", "text").unwrap().value, json!("hello mars"));

        let previous = history.undo().unwrap().unwrap();
        engine.load_definition(previous).unwrap();
        assert_eq!(engine.evaluated_value("label", "text").unwrap().value, json!("hello world"));
    }
}
