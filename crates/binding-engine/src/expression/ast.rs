//! Expression syntax tree

use std::borrow::Cow;
use std::fmt;

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

/// Binary operators, including the short-circuiting ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    /// Binding power; higher binds tighter
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Coalesce => 1,
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq | BinaryOp::NotEq => 4,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 7,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        };
        f.write_str(symbol)
    }
}

/// A parsed expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal JSON value (number, string, bool, null)
    Literal(serde_json::Value),
    /// Bare identifier (namespace root or entity id)
    Ident(String),
    /// `[a, b, c]`
    Array(Vec<Expr>),
    /// `object.name`
    Member(Box<Expr>, String),
    /// `object[index]`
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// One step of a member-access chain
#[derive(Debug, Clone)]
pub enum Accessor<'a> {
    /// `.name`, `["name"]` or `[0]`
    Static(Cow<'a, str>),
    /// `[expr]` with a non-literal index
    Computed(&'a Expr),
}

impl Expr {
    /// Flatten a member-access chain into its base and accessors
    ///
    /// `a.b[0][c].d` yields base `a` and accessors
    /// `[Static("b"), Static("0"), Computed(c), Static("d")]`.
    pub fn chain(&self) -> (&Expr, Vec<Accessor<'_>>) {
        let mut accessors = Vec::new();
        let mut current = self;
        loop {
            match current {
                Expr::Member(object, name) => {
                    accessors.push(Accessor::Static(Cow::Borrowed(name.as_str())));
                    current = object.as_ref();
                }
                Expr::Index(object, index) => {
                    accessors.push(match index.as_ref() {
                        Expr::Literal(serde_json::Value::String(s)) => {
                            Accessor::Static(Cow::Borrowed(s.as_str()))
                        }
                        Expr::Literal(serde_json::Value::Number(n)) if n.is_u64() => {
                            Accessor::Static(Cow::Owned(n.to_string()))
                        }
                        _ => Accessor::Computed(index.as_ref()),
                    });
                    current = object.as_ref();
                }
                _ => break,
            }
        }
        accessors.reverse();
        (current, accessors)
    }
}
