//! Templated property values
//!
//! A raw property value is any JSON value. Every string leaf may contain
//! `{{ expression }}` spans; spans are matched non-greedily and do not
//! nest, and an unterminated `{{` is plain text. Values are compiled once
//! when their source changes and evaluated many times.

use serde_json::Value;

use crate::error::{ParseError, PropertyError};
use crate::expression::{evaluate, parse_expression, render, Expr, Scope};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// One `{{ }}` span
#[derive(Debug, Clone)]
pub struct Binding {
    /// Trimmed expression text between the delimiters
    pub source: String,
    /// Parsed expression, or the local parse error
    pub expr: Result<Expr, ParseError>,
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Binding(Binding),
}

/// A string containing at least one binding
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Split a string into text and binding segments
    ///
    /// Returns `None` when the string contains no complete span.
    pub fn parse(text: &str) -> Option<Template> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find(OPEN) {
            let after_open = &rest[open + OPEN.len()..];
            let Some(close) = after_open.find(CLOSE) else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let source = after_open[..close].trim().to_string();
            let expr = parse_expression(&source);
            segments.push(Segment::Binding(Binding { source, expr }));
            rest = &after_open[close + CLOSE.len()..];
        }
        if !segments.iter().any(|s| matches!(s, Segment::Binding(_))) {
            return None;
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Some(Template { segments })
    }

    /// Bindings in source order
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Binding(b) => Some(b),
            Segment::Text(_) => None,
        })
    }

    /// The only binding, when the template is a single span padded by
    /// whitespace at most. Such templates keep the expression's type.
    fn sole_binding(&self) -> Option<&Binding> {
        let mut bindings = self.bindings();
        let only = bindings.next()?;
        if bindings.next().is_some() {
            return None;
        }
        let padding_only = self.segments.iter().all(|s| match s {
            Segment::Text(t) => t.trim().is_empty(),
            Segment::Binding(_) => true,
        });
        padding_only.then_some(only)
    }

    fn evaluate(&self, scope: &dyn Scope, errors: &mut Vec<PropertyError>) -> Value {
        if let Some(binding) = self.sole_binding() {
            return evaluate_binding(binding, scope, errors);
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Binding(binding) => {
                    out.push_str(&render(&evaluate_binding(binding, scope, errors)));
                }
            }
        }
        Value::String(out)
    }
}

fn evaluate_binding(binding: &Binding, scope: &dyn Scope, errors: &mut Vec<PropertyError>) -> Value {
    match &binding.expr {
        Ok(expr) => evaluate(expr, scope).unwrap_or_else(|error| {
            errors.push(PropertyError::Evaluation {
                expression: binding.source.clone(),
                error,
            });
            Value::Null
        }),
        Err(error) => {
            errors.push(PropertyError::Parse {
                expression: binding.source.clone(),
                error: error.clone(),
            });
            Value::Null
        }
    }
}

/// A raw property value with its templates pre-parsed
#[derive(Debug, Clone)]
pub enum CompiledValue {
    /// No bindings anywhere inside
    Plain(Value),
    Template(Template),
    Array(Vec<CompiledValue>),
    Object(Vec<(String, CompiledValue)>),
}

impl CompiledValue {
    /// Compile a raw value
    pub fn compile(raw: &Value) -> CompiledValue {
        match raw {
            Value::String(text) => match Template::parse(text) {
                Some(template) => CompiledValue::Template(template),
                None => CompiledValue::Plain(raw.clone()),
            },
            Value::Array(items) => {
                let compiled: Vec<_> = items.iter().map(CompiledValue::compile).collect();
                if compiled.iter().any(CompiledValue::is_templated) {
                    CompiledValue::Array(compiled)
                } else {
                    CompiledValue::Plain(raw.clone())
                }
            }
            Value::Object(map) => {
                let compiled: Vec<_> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), CompiledValue::compile(v)))
                    .collect();
                if compiled.iter().any(|(_, v)| v.is_templated()) {
                    CompiledValue::Object(compiled)
                } else {
                    CompiledValue::Plain(raw.clone())
                }
            }
            _ => CompiledValue::Plain(raw.clone()),
        }
    }

    /// Whether any string leaf contains a binding
    pub fn is_templated(&self) -> bool {
        !matches!(self, CompiledValue::Plain(_))
    }

    /// All bindings, depth first in source order
    pub fn bindings(&self) -> Vec<&Binding> {
        let mut out = Vec::new();
        self.collect_bindings(&mut out);
        out
    }

    fn collect_bindings<'a>(&'a self, out: &mut Vec<&'a Binding>) {
        match self {
            CompiledValue::Plain(_) => {}
            CompiledValue::Template(template) => out.extend(template.bindings()),
            CompiledValue::Array(items) => items.iter().for_each(|v| v.collect_bindings(out)),
            CompiledValue::Object(entries) => {
                entries.iter().for_each(|(_, v)| v.collect_bindings(out))
            }
        }
    }

    /// Parse errors of all bindings
    pub fn parse_errors(&self) -> Vec<PropertyError> {
        self.bindings()
            .into_iter()
            .filter_map(|b| {
                b.expr.as_ref().err().map(|error| PropertyError::Parse {
                    expression: b.source.clone(),
                    error: error.clone(),
                })
            })
            .collect()
    }

    /// Evaluate against a scope, collecting per-binding errors
    ///
    /// Failed bindings contribute `null` (or the empty string inside
    /// interpolated text); evaluation never stops at the first error.
    pub fn evaluate(&self, scope: &dyn Scope) -> (Value, Vec<PropertyError>) {
        let mut errors = Vec::new();
        let value = self.evaluate_into(scope, &mut errors);
        (value, errors)
    }

    fn evaluate_into(&self, scope: &dyn Scope, errors: &mut Vec<PropertyError>) -> Value {
        match self {
            CompiledValue::Plain(value) => value.clone(),
            CompiledValue::Template(template) => template.evaluate(scope, errors),
            CompiledValue::Array(items) => {
                Value::Array(items.iter().map(|v| v.evaluate_into(scope, errors)).collect())
            }
            CompiledValue::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.evaluate_into(scope, errors)))
                    .collect(),
            ),
        }
    }
}
