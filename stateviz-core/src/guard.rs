//! Guard evaluation.
//!
//! A transition guard is either a named guard, resolved against a
//! [`GuardEvaluator`] when the transition is considered, or a boolean
//! expression over the machine context and the event payload:
//!
//! - `ctx.field` / `event.field` - truthy check (nested paths allowed)
//! - `ctx.field == value`, `ctx.field != value` - strings, numbers, booleans, null
//! - `ctx.field > n`, `>=`, `<`, `<=` - numeric comparison
//! - `!expr`, `expr && expr`, `expr || expr`, `(expr)`
//!
//! `&&` binds tighter than `||`.
//!
//! Examples:
//! - `ctx.count > 0`
//! - `ctx.user.verified && !event.force`
//! - `(ctx.a || ctx.b) && ctx.c`

use crate::error::CoreError;
use crate::event::Event;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// Where a guard field is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Context,
    Event,
}

/// A dotted field reference such as `ctx.order.paid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub source: FieldSource,
    pub path: String,
}

impl Field {
    fn resolve<'a>(&self, ctx: &'a Value, event: &'a Value) -> &'a Value {
        let mut current = match self.source {
            FieldSource::Context => ctx,
            FieldSource::Event => event,
        };

        for part in self.path.split('.') {
            match current {
                Value::Object(map) => current = map.get(part).unwrap_or(&NULL),
                _ => return &NULL,
            }
        }

        current
    }
}

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
        }
    }
}

/// A parsed guard expression.
#[derive(Debug, Clone)]
pub enum GuardExpr {
    /// Field is truthy.
    Truthy(Field),
    /// Equality comparison.
    Eq(Field, Value),
    /// Inequality comparison.
    Ne(Field, Value),
    /// Numeric comparison. Non-numeric fields never match.
    Compare(Field, CmpOp, f64),
    /// Logical AND.
    And(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical OR.
    Or(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical NOT.
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("empty guard expression"));
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(invalid(format!(
                "unexpected input at position {}: '{}'",
                parser.pos,
                &s[parser.pos..]
            )));
        }
        Ok(expr)
    }

    /// Evaluates the expression against a context and an event payload.
    pub fn evaluate(&self, ctx: &Value, event: &Value) -> bool {
        match self {
            GuardExpr::Truthy(field) => is_truthy(field.resolve(ctx, event)),
            GuardExpr::Eq(field, expected) => values_equal(field.resolve(ctx, event), expected),
            GuardExpr::Ne(field, expected) => !values_equal(field.resolve(ctx, event), expected),
            GuardExpr::Compare(field, op, expected) => field
                .resolve(ctx, event)
                .as_f64()
                .map(|v| op.apply(v, *expected))
                .unwrap_or(false),
            GuardExpr::And(left, right) => {
                left.evaluate(ctx, event) && right.evaluate(ctx, event)
            }
            GuardExpr::Or(left, right) => left.evaluate(ctx, event) || right.evaluate(ctx, event),
            GuardExpr::Not(inner) => !inner.evaluate(ctx, event),
        }
    }
}

/// A transition guard as written in a machine definition.
#[derive(Debug, Clone)]
pub enum Guard {
    /// Inline expression, kept with its source text for display.
    Expr { source: String, expr: GuardExpr },
    /// Named guard looked up in a [`GuardEvaluator`].
    Named(String),
}

impl Guard {
    /// Parses a guard string. Bare identifiers (`canDo`) are named guards,
    /// anything else must be a valid expression.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if is_identifier(s) && s != "ctx" && s != "event" {
            return Ok(Guard::Named(s.to_string()));
        }

        Ok(Guard::Expr {
            source: s.to_string(),
            expr: GuardExpr::parse(s)?,
        })
    }

    pub fn named(name: impl Into<String>) -> Self {
        Guard::Named(name.into())
    }

    /// Label used in edge captions, e.g. `ctx.count > 0` or `canDo`.
    pub fn label(&self) -> &str {
        match self {
            Guard::Expr { source, .. } => source,
            Guard::Named(name) => name,
        }
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Signature of a named guard. An `Err` aborts the transition.
pub type GuardFn = Arc<dyn Fn(&Value, &Event) -> Result<bool, String> + Send + Sync>;

/// Evaluates guards, holding the named guard implementations.
#[derive(Clone, Default)]
pub struct GuardEvaluator {
    named: HashMap<String, GuardFn>,
}

impl GuardEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named guard, replacing any previous one with that name.
    pub fn with_guard<F>(mut self, name: impl Into<String>, guard: F) -> Self
    where
        F: Fn(&Value, &Event) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.register(name, guard);
        self
    }

    pub fn register<F>(&mut self, name: impl Into<String>, guard: F)
    where
        F: Fn(&Value, &Event) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.named.insert(name.into(), Arc::new(guard));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    /// Evaluates a guard against context and event.
    pub fn evaluate(&self, guard: &Guard, ctx: &Value, event: &Event) -> Result<bool, CoreError> {
        match guard {
            Guard::Expr { expr, .. } => Ok(expr.evaluate(ctx, &event.payload)),
            Guard::Named(name) => {
                let guard_fn = self.named.get(name).ok_or_else(|| CoreError::Guard {
                    guard: name.clone(),
                    reason: "guard is not registered".to_string(),
                })?;
                guard_fn(ctx, event).map_err(|reason| CoreError::Guard {
                    guard: name.clone(),
                    reason,
                })
            }
        }
    }

    /// Evaluates an optional guard (None = always true).
    pub fn evaluate_opt(
        &self,
        guard: Option<&Guard>,
        ctx: &Value,
        event: &Event,
    ) -> Result<bool, CoreError> {
        match guard {
            Some(guard) => self.evaluate(guard, ctx, event),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for GuardEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.named.keys().collect();
        names.sort();
        f.debug_struct("GuardEvaluator").field("named", &names).finish()
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidGuard {
        reason: reason.into(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Null, Value::Null)
        | (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_)) => a == b,
        _ => false,
    }
}

/// Recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        // `!=` never starts an operand, so a leading `!` is always negation
        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let expr = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(invalid("expected ')'"));
            }
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let field = self.parse_field()?;
        self.skip_whitespace();

        if self.eat("==") {
            return Ok(GuardExpr::Eq(field, self.parse_value()?));
        }
        if self.eat("!=") {
            return Ok(GuardExpr::Ne(field, self.parse_value()?));
        }

        // Two-character operators first so `>=` is not read as `>`
        for (token, op) in [
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ] {
            if self.eat(token) {
                return Ok(GuardExpr::Compare(field, op, self.parse_number()?));
            }
        }

        Ok(GuardExpr::Truthy(field))
    }

    fn parse_field(&mut self) -> Result<Field, CoreError> {
        self.skip_whitespace();

        let source = if self.eat("ctx.") {
            FieldSource::Context
        } else if self.eat("event.") {
            FieldSource::Event
        } else {
            return Err(invalid("field must start with 'ctx.' or 'event.'"));
        };

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let path = &self.input[start..self.pos];
        if path.is_empty() || path.starts_with('.') || path.ends_with('.') {
            return Err(invalid(format!("invalid field name: '{}'", path)));
        }

        Ok(Field {
            source,
            path: path.to_string(),
        })
    }

    fn parse_value(&mut self) -> Result<Value, CoreError> {
        self.skip_whitespace();

        for (literal, value) in [
            ("true", Value::Bool(true)),
            ("false", Value::Bool(false)),
            ("null", Value::Null),
        ] {
            if self.eat(literal) {
                return Ok(value);
            }
        }

        if self.peek_char() == Some('"') {
            return self.parse_string_value();
        }

        let num = self.parse_number()?;
        serde_json::Number::from_f64(num)
            .map(Value::Number)
            .ok_or_else(|| invalid(format!("number out of range: {}", num)))
    }

    fn parse_string_value(&mut self) -> Result<Value, CoreError> {
        // Opening quote
        self.pos += 1;

        let mut out = String::new();
        let mut chars = self.input[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(Value::String(out));
                }
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c => out.push(c),
            }
        }

        Err(invalid("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<f64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        self.skip_digits();
        if self.peek_char() == Some('.') {
            self.pos += 1;
            self.skip_digits();
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| invalid(format!("invalid number: '{}'", num_str)))
    }

    fn skip_digits(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }
}
