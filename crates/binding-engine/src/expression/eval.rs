//! Sandboxed expression evaluation
//!
//! Expressions only see what a [`Scope`] exposes: namespace roots and
//! entity ids resolved against the evaluation context. There is no
//! access to host globals and no way to mutate state.

use serde_json::Value;

use crate::error::EvalError;
use crate::types::EntityKind;

use super::ast::{BinaryOp, Expr, UnaryOp};

/// What an identifier at the root of an expression resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootBinding {
    /// A namespace (`widgets`, `queries`) holding entities of one kind
    Namespace(EntityKind),
    /// A bare entity id
    Entity(String),
}

/// Read-only view of the values visible to expressions
pub trait Scope {
    /// Resolve a root identifier
    fn resolve_root(&self, name: &str) -> Option<RootBinding>;

    /// Whether an entity with this id and kind exists
    fn has_entity(&self, kind: EntityKind, id: &str) -> bool;

    /// Evaluated properties of an entity, as one JSON object
    fn entity_value(&self, id: &str) -> Option<Value>;

    /// One evaluated property of an entity
    fn property_value(&self, id: &str, property: &str) -> Option<Value>;
}

/// Intermediate result while walking a member chain
enum Operand {
    Value(Value),
    Namespace(EntityKind),
    Entity(String),
}

/// Evaluate an expression against a scope
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    let operand = eval_operand(expr, scope)?;
    materialize(operand, scope)
}

fn materialize(operand: Operand, scope: &dyn Scope) -> Result<Value, EvalError> {
    match operand {
        Operand::Value(value) => Ok(value),
        Operand::Entity(id) => scope
            .entity_value(&id)
            .ok_or_else(|| EvalError::undefined(format!("'{}' is not defined", id))),
        Operand::Namespace(kind) => Err(EvalError::type_mismatch(format!(
            "the {} namespace cannot be used as a value",
            kind_label(kind)
        ))),
    }
}

fn eval_operand(expr: &Expr, scope: &dyn Scope) -> Result<Operand, EvalError> {
    match expr {
        Expr::Ident(name) => match scope.resolve_root(name) {
            Some(RootBinding::Namespace(kind)) => Ok(Operand::Namespace(kind)),
            Some(RootBinding::Entity(id)) => Ok(Operand::Entity(id)),
            None => Err(EvalError::undefined(format!("'{}' is not defined", name))),
        },
        Expr::Member(object, name) => {
            let object = eval_operand(object, scope)?;
            access(object, name, scope)
        }
        Expr::Index(object, index) => {
            let object = eval_operand(object, scope)?;
            let key = match evaluate(index, scope)? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(EvalError::type_mismatch(format!(
                        "cannot index with {}",
                        type_name(&other)
                    )))
                }
            };
            access(object, &key, scope)
        }
        other => eval_value(other, scope).map(Operand::Value),
    }
}

fn access(object: Operand, key: &str, scope: &dyn Scope) -> Result<Operand, EvalError> {
    match object {
        Operand::Namespace(kind) => {
            if scope.has_entity(kind, key) {
                Ok(Operand::Entity(key.to_string()))
            } else {
                Err(EvalError::undefined(format!(
                    "{} '{}' is not defined",
                    kind_label(kind),
                    key
                )))
            }
        }
        Operand::Entity(id) => Ok(Operand::Value(
            scope.property_value(&id, key).unwrap_or(Value::Null),
        )),
        Operand::Value(value) => member(&value, key).map(Operand::Value),
    }
}

/// Member access on a plain value; missing keys yield null
fn member(value: &Value, key: &str) -> Result<Value, EvalError> {
    match value {
        Value::Object(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        Value::Array(items) => {
            if key == "length" {
                return Ok(Value::from(items.len()));
            }
            Ok(key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null))
        }
        Value::String(s) if key == "length" => Ok(Value::from(s.chars().count())),
        Value::Null => Err(EvalError::type_mismatch(format!(
            "cannot read property '{}' of null",
            key
        ))),
        _ => Ok(Value::Null),
    }
}

fn eval_value(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => Ok(number_value(-as_number(&value, "-")?)),
                UnaryOp::Plus => Ok(number_value(as_number(&value, "+")?)),
            }
        }
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, scope),
        Expr::Conditional(condition, then, otherwise) => {
            if truthy(&evaluate(condition, scope)?) {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        Expr::Ident(_) | Expr::Member(_, _) | Expr::Index(_, _) => evaluate(expr, scope),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    let lhs = evaluate(left, scope)?;
    match op {
        BinaryOp::And => {
            return if truthy(&lhs) { evaluate(right, scope) } else { Ok(lhs) };
        }
        BinaryOp::Or => {
            return if truthy(&lhs) { Ok(lhs) } else { evaluate(right, scope) };
        }
        BinaryOp::Coalesce => {
            return if lhs.is_null() { evaluate(right, scope) } else { Ok(lhs) };
        }
        _ => {}
    }

    let rhs = evaluate(right, scope)?;
    match op {
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", render(&lhs), render(&rhs))))
            }
            _ => Ok(number_value(as_number(&lhs, "+")? + as_number(&rhs, "+")?)),
        },
        BinaryOp::Sub => Ok(number_value(as_number(&lhs, "-")? - as_number(&rhs, "-")?)),
        BinaryOp::Mul => Ok(number_value(as_number(&lhs, "*")? * as_number(&rhs, "*")?)),
        BinaryOp::Div | BinaryOp::Rem => {
            let divisor = as_number(&rhs, &op.to_string())?;
            if divisor == 0.0 {
                return Err(EvalError::type_mismatch("division by zero"));
            }
            let dividend = as_number(&lhs, &op.to_string())?;
            Ok(number_value(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            }))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_equal(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => as_number(&lhs, &op.to_string())?.partial_cmp(&as_number(&rhs, &op.to_string())?),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!("short-circuit handled above"),
    }
}

/// JavaScript-style truthiness
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value for string interpolation
///
/// Null renders as the empty string; strings are inserted verbatim and
/// everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, EvalError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EvalError::type_mismatch("number out of range")),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(EvalError::type_mismatch(format!(
            "operator '{}' expects numbers, found {}",
            op,
            type_name(other)
        ))),
    }
}

/// Integral results stay integers so `1 + 1` renders as `2`
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn kind_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Widget => "widget",
        EntityKind::Query => "query",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::EvalErrorKind;
    use crate::expression::parse_expression;
    use serde_json::json;

    struct TestScope {
        widgets: HashMap<String, Value>,
    }

    impl TestScope {
        fn new() -> Self {
            let mut widgets = HashMap::new();
            widgets.insert(
                "input1".to_string(),
                json!({"value": "world", "count": 3, "items": [10, 20], "empty": null}),
            );
            Self { widgets }
        }
    }

    impl Scope for TestScope {
        fn resolve_root(&self, name: &str) -> Option<RootBinding> {
            match name {
                "widgets" => Some(RootBinding::Namespace(EntityKind::Widget)),
                id if self.widgets.contains_key(id) => Some(RootBinding::Entity(id.to_string())),
                _ => None,
            }
        }

        fn has_entity(&self, kind: EntityKind, id: &str) -> bool {
            kind == EntityKind::Widget && self.widgets.contains_key(id)
        }

        fn entity_value(&self, id: &str) -> Option<Value> {
            self.widgets.get(id).cloned()
        }

        fn property_value(&self, id: &str, property: &str) -> Option<Value> {
            self.widgets.get(id)?.get(property).cloned()
        }
    }

    fn eval(source: &str) -> Result<Value, EvalError> {
        evaluate(&parse_expression(source).unwrap(), &TestScope::new())
    }

    #[test]
    fn test_member_access_through_namespace() {
        assert_eq!(eval("widgets.input1.value").unwrap(), json!("world"));
        assert_eq!(eval("input1.items[1]").unwrap(), json!(20));
        assert_eq!(eval("widgets['input1'].items.length").unwrap(), json!(2));
        assert_eq!(eval("widgets.input1.missing").unwrap(), json!(null));
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        assert_eq!(eval("1 + 1").unwrap(), json!(2));
        assert_eq!(eval("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval("widgets.input1.count * 2 - 1").unwrap(), json!(5));
        assert_eq!(eval("'n=' + widgets.input1.count").unwrap(), json!("n=3"));
        assert_eq!(eval("-widgets.input1.count").unwrap(), json!(-3));
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval("widgets.input1.count > 2 ? 'big' : 'small'").unwrap(), json!("big"));
        assert_eq!(eval("widgets.input1.empty ?? 'fallback'").unwrap(), json!("fallback"));
        assert_eq!(eval("'' || 'x'").unwrap(), json!("x"));
        assert_eq!(eval("0 && 'x'").unwrap(), json!(0));
        assert_eq!(eval("!widgets.input1.value").unwrap(), json!(false));
        assert_eq!(eval("1 === 1.0").unwrap(), json!(true));
        assert_eq!(eval("'a' < 'b'").unwrap(), json!(true));
    }

    #[test]
    fn test_undefined_references() {
        let err = eval("widgets.missing.value").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);

        let err = eval("window").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UndefinedReference);
    }

    #[test]
    fn test_type_mismatches() {
        assert_eq!(eval("widgets.input1.empty.x").unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(eval("'a' * 2").unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(eval("1 / 0").unwrap_err().kind, EvalErrorKind::TypeMismatch);
        assert_eq!(eval("widgets").unwrap_err().kind, EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&json!(null)), "");
        assert_eq!(render(&json!("x")), "x");
        assert_eq!(render(&json!(2)), "2");
        assert_eq!(render(&json!([1, 2])), "[1,2]");
    }
}
