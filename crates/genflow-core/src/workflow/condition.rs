//! Comparison grammar for the `condition` step.
//!
//! A small hand-written lexer and recursive-descent parser; nothing is ever
//! evaluated dynamically.
//!
//! ```text
//! expr       := and_expr (("or" | "||") and_expr)*
//! and_expr   := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | comparison
//! comparison := operand (op operand)?
//! op         := "==" | "!=" | "<" | "<=" | ">" | ">=" | "contains"
//! operand    := "{{" name "}}" | name | number | string
//!             | "true" | "false" | "null" | "(" expr ")"
//! ```
//!
//! Names resolve against the workflow context (`a.b` walks into objects);
//! unknown names are `null`. A lone operand is tested for truthiness.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use genflow_types::workflow::JsonMap;
use serde_json::Value;
use thiserror::Error;

/// Parenthesis/`not` nesting limit.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("empty condition")]
    Empty,

    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unterminated placeholder starting at offset {0}")]
    UnterminatedPlaceholder(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of condition")]
    UnexpectedEnd,

    #[error("condition nested too deeply")]
    TooDeep,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Contains => "contains",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Op(CompareOp),
    Name(String),
    Literal(Value),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::And => f.write_str("'and'"),
            Self::Or => f.write_str("'or'"),
            Self::Not => f.write_str("'not'"),
            Self::Op(op) => write!(f, "operator '{op}'"),
            Self::Name(name) => write!(f, "name '{name}'"),
            Self::Literal(value) => write!(f, "literal {value}"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |j: usize| chars.get(j).map(|&(_, c)| c);

    while let Some(&(pos, c)) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' if peek(i + 1) == Some('{') => {
                let body_start = i + 2;
                let mut j = body_start;
                while j < chars.len() && !(chars[j].1 == '}' && peek(j + 1) == Some('}')) {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(ConditionError::UnterminatedPlaceholder(pos));
                }
                let name: String = chars[body_start..j].iter().map(|&(_, c)| c).collect();
                let name = name.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(ConditionError::UnexpectedChar { ch: '{', pos });
                }
                tokens.push(Token::Name(name.to_string()));
                i = j + 2;
            }
            '=' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if peek(i + 1) == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let or_equal = peek(i + 1) == Some('=');
                tokens.push(Token::Op(match (c, or_equal) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    (_, false) => CompareOp::Gt,
                    (_, true) => CompareOp::Ge,
                }));
                i += if or_equal { 2 } else { 1 };
            }
            '&' if peek(i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match peek(j) {
                        None => return Err(ConditionError::UnterminatedString(pos)),
                        Some('\\') => {
                            match peek(j + 1) {
                                Some('n') => text.push('\n'),
                                Some('t') => text.push('\t'),
                                Some(other) => text.push(other),
                                None => return Err(ConditionError::UnterminatedString(pos)),
                            }
                            j += 2;
                        }
                        Some(ch) if ch == quote => break,
                        Some(ch) => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && peek(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let mut j = i + 1;
                while peek(j).is_some_and(|n| n.is_ascii_digit() || n == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|&(_, c)| c).collect();
                let number: f64 = text
                    .parse()
                    .map_err(|_| ConditionError::InvalidNumber(text.clone()))?;
                let value = serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or(ConditionError::InvalidNumber(text))?;
                tokens.push(Token::Literal(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i + 1;
                while peek(j).is_some_and(|n| n.is_alphanumeric() || n == '_' || n == '.') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().map(|&(_, c)| c).collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Op(CompareOp::Contains),
                    "true" | "True" => Token::Literal(Value::Bool(true)),
                    "false" | "False" => Token::Literal(Value::Bool(false)),
                    "null" | "None" => Token::Literal(Value::Null),
                    _ => Token::Name(word),
                });
                i = j;
            }
            other => return Err(ConditionError::UnexpectedChar { ch: other, pos }),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.operand()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn operand(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Name(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ConditionError::UnexpectedToken(other.to_string())),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ConditionError::UnexpectedToken(other.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Python-like truthiness of a JSON value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn lookup(context: &JsonMap, name: &str) -> Value {
    let mut parts = name.split('.');
    let Some(first) = parts.next() else {
        return Value::Null;
    };
    let mut current = match context.get(first) {
        Some(v) => v,
        None => return Value::Null,
    };
    for part in parts {
        current = match current {
            Value::Object(map) => match map.get(part) {
                Some(v) => v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => loose_eq(left, right),
        CompareOp::Ne => !loose_eq(left, right),
        CompareOp::Lt => ordering(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

impl Expr {
    fn eval(&self, context: &JsonMap) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Var(name) => lookup(context, name),
            Self::Not(inner) => Value::Bool(!is_truthy(&inner.eval(context))),
            Self::And(a, b) => {
                Value::Bool(is_truthy(&a.eval(context)) && is_truthy(&b.eval(context)))
            }
            Self::Or(a, b) => {
                Value::Bool(is_truthy(&a.eval(context)) || is_truthy(&b.eval(context)))
            }
            Self::Compare(a, op, b) => Value::Bool(compare(&a.eval(context), *op, &b.eval(context))),
        }
    }
}

/// A parsed condition, ready to evaluate against any context.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(ConditionError::UnexpectedToken(extra.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &JsonMap) -> bool {
        is_truthy(&self.expr.eval(context))
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
