//! Binding expression language
//!
//! Expressions appear inside `{{ }}` spans of templated properties. The
//! language is a narrow, pure subset of JavaScript expressions that can
//! only read from the evaluation context.

mod ast;
mod eval;
mod parser;

pub use ast::{Accessor, BinaryOp, Expr, UnaryOp};
pub use eval::{evaluate, render, truthy, RootBinding, Scope};
pub use parser::parse_expression;
