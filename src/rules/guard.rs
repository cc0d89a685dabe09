//! Guard compiler: a closed boolean/arithmetic expression language.
//!
//! Rule files are user-edited, so the grammar is deliberately tiny. Operands
//! are the identity token `x`, `true`, `false`, decimal integers, and capture
//! references `$0`..`$9`. Binary operators are
//! `+ - * ** / % == <= >=` and `&&`, grouped with parentheses. `&&` is what
//! `compare+:` composes with. There are no unary operators, so `x ++ $1`,
//! `x + + $1`, and `x == -1` are all rejected before anything is evaluated.
//!
//! Compilation validates the token stream in a single left-to-right pass and
//! then builds an expression tree once. Evaluation walks that tree; no text
//! from the rule file ever reaches an evaluator of any other kind.

use crate::error::GuardSyntaxError;
use std::cmp::Ordering;
use std::fmt;

/// Operators allowed between operands. Anything not listed is a syntax error.
const OPERATORS: &[(&str, BinOp)] = &[
    ("+", BinOp::Add),
    ("-", BinOp::Sub),
    ("*", BinOp::Mul),
    ("**", BinOp::Pow),
    ("/", BinOp::Div),
    ("%", BinOp::Rem),
    ("==", BinOp::Eq),
    ("<=", BinOp::Le),
    (">=", BinOp::Ge),
    ("&&", BinOp::And),
];

/// Deepest parenthesis nesting accepted.
const MAX_NESTING: usize = 64;

/// Most operators in one guard. Bounds the depth of the expression tree.
const MAX_OPERATORS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Pow,
    Div,
    Rem,
    Eq,
    Le,
    Ge,
    And,
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::And => 2,
            BinOp::Eq => 3,
            BinOp::Le | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
            BinOp::Pow => 7,
        }
    }

    fn right_associative(self) -> bool {
        self == BinOp::Pow
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identity,
    Literal(Value),
    Group(usize),
    Op(BinOp),
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Identity,
    Literal(Value),
    Group(usize),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// A dynamically typed value produced while evaluating a guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Truthiness used by `&&` and the final guard result.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => self.to_number() == other.to_number(),
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A compiled guard predicate over `(identity, captured groups)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

impl Guard {
    /// Compile `source`, rejecting anything outside the guard grammar.
    ///
    /// # Example
    ///
    /// ```
    /// use triggertty::rules::Guard;
    ///
    /// let guard = Guard::compile("x == $2").unwrap();
    /// let groups = vec!["line".to_string(), "Steve".to_string(), "12345".to_string()];
    /// assert!(guard.evaluate("12345", &groups));
    /// assert!(Guard::compile("x ++ $1").is_err());
    /// ```
    pub fn compile(source: &str) -> Result<Self, GuardSyntaxError> {
        let tokens = tokenize(source)?;
        validate(&tokens, source.len())?;
        let mut parser = Parser {
            tokens: &tokens,
            index: 0,
        };
        let expr = parser.expression(0)?;
        if let Some(extra) = tokens.get(parser.index) {
            return Err(GuardSyntaxError::new(extra.pos, "unexpected token"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// A guard that accepts every match.
    pub fn always() -> Self {
        Self {
            source: "true".to_string(),
            expr: Expr::Literal(Value::Bool(true)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `identity` bound to `x` and `groups[n]` bound to `$n`.
    /// References to groups that did not participate read as `""`.
    pub fn evaluate(&self, identity: &str, groups: &[String]) -> bool {
        eval(&self.expr, identity, groups).truthy()
    }
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, GuardSyntaxError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                Token::Open
            }
            b')' => {
                i += 1;
                Token::Close
            }
            b'$' => {
                let digit = bytes.get(i + 1).copied().filter(u8::is_ascii_digit);
                let Some(digit) = digit else {
                    return Err(GuardSyntaxError::new(i, "`$` must be followed by a digit 0-9"));
                };
                if bytes.get(i + 2).is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_') {
                    return Err(GuardSyntaxError::new(i, "capture references are limited to $0-$9"));
                }
                i += 2;
                Token::Group(usize::from(digit - b'0'))
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if bytes.get(i).is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') {
                    return Err(GuardSyntaxError::new(i, "malformed integer literal"));
                }
                let number = source[start..i]
                    .parse()
                    .map_err(|_| GuardSyntaxError::new(start, "malformed integer literal"))?;
                Token::Literal(Value::Number(number))
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                match &source[start..i] {
                    "x" => Token::Identity,
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    word => {
                        return Err(GuardSyntaxError::new(
                            start,
                            format!("unknown identifier `{word}`"),
                        ));
                    }
                }
            }
            c if is_operator_char(c) => {
                while i < bytes.len() && is_operator_char(bytes[i]) {
                    i += 1;
                }
                let text = &source[start..i];
                let op = OPERATORS
                    .iter()
                    .find(|(symbol, _)| *symbol == text)
                    .map(|(_, op)| *op)
                    .ok_or_else(|| {
                        GuardSyntaxError::new(start, format!("operator `{text}` is not allowed"))
                    })?;
                Token::Op(op)
            }
            _ => {
                let ch = source[start..].chars().next().unwrap_or('?');
                return Err(GuardSyntaxError::new(
                    start,
                    format!("unexpected character `{ch}`"),
                ));
            }
        };
        tokens.push(Spanned { token, pos: start });
    }

    Ok(tokens)
}

fn is_operator_char(c: u8) -> bool {
    matches!(c, b'+' | b'-' | b'*' | b'/' | b'%' | b'=' | b'!' | b'<' | b'>' | b'&' | b'|')
}

/// Check operand/operator alternation, parenthesis balance, and size limits.
fn validate(tokens: &[Spanned], end: usize) -> Result<(), GuardSyntaxError> {
    if tokens.is_empty() {
        return Err(GuardSyntaxError::new(0, "empty expression"));
    }

    let mut expect_operand = true;
    let mut depth: usize = 0;
    let mut operators = 0;
    for Spanned { token, pos } in tokens {
        match token {
            Token::Open => {
                if !expect_operand {
                    return Err(GuardSyntaxError::new(*pos, "missing operator before `(`"));
                }
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(GuardSyntaxError::new(*pos, "parentheses nested too deeply"));
                }
            }
            Token::Close => {
                if expect_operand {
                    return Err(GuardSyntaxError::new(*pos, "expected an operand before `)`"));
                }
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| GuardSyntaxError::new(*pos, "unbalanced `)`"))?;
            }
            Token::Op(_) => {
                if expect_operand {
                    return Err(GuardSyntaxError::new(*pos, "operator has no left operand"));
                }
                operators += 1;
                if operators > MAX_OPERATORS {
                    return Err(GuardSyntaxError::new(*pos, "too many operators"));
                }
                expect_operand = true;
            }
            Token::Identity | Token::Literal(_) | Token::Group(_) => {
                if !expect_operand {
                    return Err(GuardSyntaxError::new(*pos, "missing operator between operands"));
                }
                expect_operand = false;
            }
        }
    }

    if expect_operand {
        return Err(GuardSyntaxError::new(end, "expression ends with an operator"));
    }
    if depth != 0 {
        return Err(GuardSyntaxError::new(end, "unclosed `(`"));
    }
    Ok(())
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    index: usize,
}

impl Parser<'_> {
    fn expression(&mut self, min_precedence: u8) -> Result<Expr, GuardSyntaxError> {
        let mut lhs = self.operand()?;
        while let Some(Token::Op(op)) = self.tokens.get(self.index).map(|t| &t.token) {
            let op = *op;
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.index += 1;
            let next_min = if op.right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.expression(next_min)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn operand(&mut self) -> Result<Expr, GuardSyntaxError> {
        let Some(Spanned { token, pos }) = self.tokens.get(self.index) else {
            return Err(GuardSyntaxError::new(0, "unexpected end of expression"));
        };
        self.index += 1;
        match token {
            Token::Identity => Ok(Expr::Identity),
            Token::Literal(value) => Ok(Expr::Literal(value.clone())),
            Token::Group(n) => Ok(Expr::Group(*n)),
            Token::Open => {
                let inner = self.expression(0)?;
                match self.tokens.get(self.index) {
                    Some(Spanned {
                        token: Token::Close,
                        ..
                    }) => {
                        self.index += 1;
                        Ok(inner)
                    }
                    _ => Err(GuardSyntaxError::new(*pos, "unclosed `(`")),
                }
            }
            Token::Close | Token::Op(_) => Err(GuardSyntaxError::new(*pos, "expected an operand")),
        }
    }
}

fn eval(expr: &Expr, identity: &str, groups: &[String]) -> Value {
    match expr {
        Expr::Identity => Value::Text(identity.to_string()),
        Expr::Literal(value) => value.clone(),
        Expr::Group(n) => Value::Text(groups.get(*n).cloned().unwrap_or_default()),
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let lhs = eval(lhs, identity, groups);
            if lhs.truthy() {
                eval(rhs, identity, groups)
            } else {
                lhs
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, identity, groups);
            let rhs = eval(rhs, identity, groups);
            apply(*op, &lhs, &rhs)
        }
    }
}

fn apply(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    match op {
        BinOp::Add => match (lhs, rhs) {
            (Value::Text(_), _) | (_, Value::Text(_)) => Value::Text(format!("{lhs}{rhs}")),
            _ => Value::Number(lhs.to_number() + rhs.to_number()),
        },
        BinOp::Sub => Value::Number(lhs.to_number() - rhs.to_number()),
        BinOp::Mul => Value::Number(lhs.to_number() * rhs.to_number()),
        BinOp::Div => Value::Number(lhs.to_number() / rhs.to_number()),
        BinOp::Rem => Value::Number(lhs.to_number() % rhs.to_number()),
        BinOp::Pow => Value::Number(lhs.to_number().powf(rhs.to_number())),
        BinOp::Eq => Value::Bool(lhs.loose_eq(rhs)),
        BinOp::Le => Value::Bool(matches!(
            lhs.compare(rhs),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinOp::Ge => Value::Bool(matches!(
            lhs.compare(rhs),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        // Short-circuits in `eval`.
        BinOp::And => Value::Bool(lhs.truthy() && rhs.truthy()),
    }
}
