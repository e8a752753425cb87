//! Lexer and precedence-climbing parser for binding expressions
//!
//! The grammar is a small, side-effect free subset of JavaScript
//! expressions: literals, identifiers, member/index access, array
//! literals, unary and binary operators, and the conditional operator.
//! Function calls, assignments and object literals are rejected.

use crate::error::ParseError;

use super::ast::{BinaryOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(serde_json::Number),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

/// Multi-character punctuators first so the longest match wins
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "+", "-", "*", "/", "%", "<", ">",
    "!", "?", ":", ".", ",", "(", ")", "[", "]",
];

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.rest().chars().next() {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c.is_ascii_digit() {
                tokens.push((self.number()?, start));
            } else if c == '"' || c == '\'' {
                tokens.push((self.string(c)?, start));
            } else if c == '_' || c == '$' || c.is_alphabetic() {
                let len = self
                    .rest()
                    .find(|ch: char| !(ch == '_' || ch == '$' || ch.is_alphanumeric()))
                    .unwrap_or(self.rest().len());
                tokens.push((Token::Ident(self.rest()[..len].to_string()), start));
                self.pos += len;
            } else if let Some(punct) = PUNCTUATORS.iter().find(|p| self.rest().starts_with(**p)) {
                tokens.push((Token::Punct(*punct), start));
                self.pos += punct.len();
            } else if c == '{' || c == '}' {
                return Err(ParseError::new("object literals are not supported", start));
            } else {
                return Err(ParseError::new(format!("unexpected character '{}'", c), start));
            }
        }
        Ok(tokens)
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let rest = self.rest();
        let mut len = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        // A fraction needs a digit after the dot, otherwise `0.length` style
        // member access would be swallowed
        let mut is_float = false;
        if rest[len..].starts_with('.')
            && rest[len + 1..].chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            len += 1;
            len += rest[len..]
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(rest.len() - len);
        }
        let text = &rest[..len];
        self.pos += len;

        let number = if is_float {
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
        } else {
            text.parse::<u64>().ok().map(serde_json::Number::from)
        };
        number
            .map(Token::Number)
            .ok_or_else(|| ParseError::new(format!("invalid number '{}'", text), start))
    }

    fn string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                c if c == quote => {
                    self.pos += i + 1;
                    return Ok(Token::Str(value));
                }
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                }
                c => value.push(c),
            }
        }
        Err(ParseError::new("unterminated string literal", start))
    }
}

/// Deepest accepted nesting of parser recursion and of the parsed tree
const MAX_DEPTH: usize = 128;

/// Parse one expression (the contents of a `{{ }}` span)
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: source.len(),
        nesting: 0,
    };
    if parser.tokens.is_empty() {
        return Err(ParseError::new("empty expression", 0));
    }
    let node = parser.conditional()?;
    match parser.peek() {
        None => Ok(node.expr),
        Some((token, offset)) => Err(ParseError::new(
            format!("unexpected {}", describe(token)),
            offset,
        )),
    }
}

/// A parsed subtree and its height
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Self { expr, depth: 1 }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
    /// Current recursion depth
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.index).map(|(t, o)| (t, *o))
    }

    fn offset(&self) -> usize {
        self.peek().map(|(_, o)| o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some((Token::Punct(p), _)) if *p == punct) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat(punct) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(|(t, _)| describe(t))
            .unwrap_or_else(|| "end of expression".to_string());
        Err(ParseError::new(
            format!("expected '{}', found {}", punct, found),
            self.offset(),
        ))
    }

    fn too_deep(&self) -> ParseError {
        ParseError::new("expression nested too deeply", self.offset())
    }

    /// Step one level deeper into the grammar
    ///
    /// A failed parse is abandoned, so only successful paths call `leave`.
    fn enter(&mut self) -> Result<(), ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn node(&self, expr: Expr, depth: usize) -> Result<Node, ParseError> {
        if depth > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok(Node { expr, depth })
    }

    fn conditional(&mut self) -> Result<Node, ParseError> {
        self.enter()?;
        let condition = self.binary(0)?;
        let node = if self.eat("?") {
            let then = self.conditional()?;
            self.expect(":")?;
            let otherwise = self.conditional()?;
            let depth = condition.depth.max(then.depth).max(otherwise.depth) + 1;
            self.node(
                Expr::Conditional(
                    Box::new(condition.expr),
                    Box::new(then.expr),
                    Box::new(otherwise.expr),
                ),
                depth,
            )?
        } else {
            condition
        };
        self.leave();
        Ok(node)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Node, ParseError> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek_binary_op() {
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.index += 1;
            let right = self.binary(precedence)?;
            let depth = left.depth.max(right.depth) + 1;
            left = self.node(
                Expr::Binary(op, Box::new(left.expr), Box::new(right.expr)),
                depth,
            )?;
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let Some((Token::Punct(p), _)) = self.peek() else {
            return None;
        };
        Some(match *p {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "==" | "===" => BinaryOp::Eq,
            "!=" | "!==" => BinaryOp::NotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::GtEq,
            "&&" => BinaryOp::And,
            "||" => BinaryOp::Or,
            "??" => BinaryOp::Coalesce,
            _ => return None,
        })
    }

    fn unary(&mut self) -> Result<Node, ParseError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else if self.eat("+") {
            UnaryOp::Plus
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        self.node(Expr::Unary(op, Box::new(operand.expr)), operand.depth + 1)
    }

    fn postfix(&mut self) -> Result<Node, ParseError> {
        let mut node = self.primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Some((Token::Ident(name), _)) => {
                        node = self.node(Expr::Member(Box::new(node.expr), name), node.depth + 1)?;
                    }
                    Some((token, offset)) => {
                        return Err(ParseError::new(
                            format!("expected property name, found {}", describe(&token)),
                            offset,
                        ));
                    }
                    None => {
                        return Err(ParseError::new(
                            "expected property name, found end of expression",
                            self.end,
                        ));
                    }
                }
            } else if self.eat("[") {
                let index = self.conditional()?;
                self.expect("]")?;
                let depth = node.depth.max(index.depth) + 1;
                node = self.node(Expr::Index(Box::new(node.expr), Box::new(index.expr)), depth)?;
            } else if matches!(self.peek(), Some((Token::Punct("("), _))) {
                return Err(ParseError::new("function calls are not supported", self.offset()));
            } else {
                return Ok(node);
            }
        }
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        let Some((token, offset)) = self.next() else {
            return Err(ParseError::new("unexpected end of expression", self.end));
        };
        match token {
            Token::Number(n) => Ok(Node::leaf(Expr::Literal(serde_json::Value::Number(n)))),
            Token::Str(s) => Ok(Node::leaf(Expr::Literal(serde_json::Value::String(s)))),
            Token::Ident(name) => Ok(Node::leaf(match name.as_str() {
                "true" => Expr::Literal(serde_json::Value::Bool(true)),
                "false" => Expr::Literal(serde_json::Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(serde_json::Value::Null),
                _ => Expr::Ident(name),
            })),
            Token::Punct("(") => {
                let inner = self.conditional()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                let mut depth = 0;
                if !self.eat("]") {
                    loop {
                        let item = self.conditional()?;
                        depth = depth.max(item.depth);
                        items.push(item.expr);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                self.node(Expr::Array(items), depth + 1)
            }
            other => Err(ParseError::new(
                format!("unexpected {}", describe(&other)),
                offset,
            )),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Str(_) => "string literal".to_string(),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Punct(p) => format!("'{}'", p),
    }
}
