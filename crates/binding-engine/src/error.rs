//! Error types for the binding engine
//!
//! `EngineError` covers API misuse and infrastructure failures. Problems
//! inside a single property (bad syntax, cycles, failed evaluation) are
//! `PropertyError` values recorded against that property; they never abort
//! a pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Entity ids must be non-empty
    #[error("Invalid entity id: '{0}'")]
    InvalidEntityId(String),

    /// Property paths must be non-empty dotted names
    #[error("Invalid property path '{path}' on entity '{entity}'")]
    InvalidPropertyPath { entity: String, path: String },

    /// The entity is not registered
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity exists but has a different kind than required
    #[error("Entity '{id}' is not a {expected}")]
    WrongEntityKind { id: String, expected: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// A query run could not be started or completed
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an invalid property path error
    pub fn invalid_path(entity: impl Into<String>, path: impl Into<String>) -> Self {
        Self::InvalidPropertyPath {
            entity: entity.into(),
            path: path.into(),
        }
    }
}

/// Malformed expression syntax inside a `{{ }}` span
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} at offset {offset}")]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
    /// Human-readable description
    pub message: String,
    /// Byte offset inside the expression source
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// Classification of a runtime evaluation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalErrorKind {
    /// Identifier or entity that does not exist in the context
    UndefinedReference,
    /// Operation applied to a value of the wrong type
    TypeMismatch,
}

/// Expression parsed but failed while evaluating
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn undefined(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::UndefinedReference,
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::TypeMismatch,
            message: message.into(),
        }
    }
}

/// Error recorded against a single property
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PropertyError {
    /// A `{{ }}` span failed to parse
    #[error("Parse error in '{{{{ {expression} }}}}': {error}")]
    Parse { expression: String, error: ParseError },

    /// The property transitively depends on itself
    #[error("Circular dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// The expression failed at evaluation time
    #[error("Evaluation error in '{{{{ {expression} }}}}': {error}")]
    Evaluation { expression: String, error: EvalError },
}

impl PropertyError {
    /// Whether this is a circular dependency error
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_error_display() {
        let err = PropertyError::CircularDependency {
            cycle: vec!["a.text".to_string(), "b.text".to_string()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a.text -> b.text");

        let err = PropertyError::Parse {
            expression: "1 +".to_string(),
            error: ParseError::new("unexpected end of expression", 3),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in '{{ 1 + }}': unexpected end of expression at offset 3"
        );
    }

    #[test]
    fn test_property_error_serializes_tagged() {
        let err = PropertyError::Evaluation {
            expression: "widgets.x.value".to_string(),
            error: EvalError::undefined("unknown widget 'x'"),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "evaluation");
        assert_eq!(json["error"]["kind"], "undefined_reference");
    }
}
