//! Workflow expression language
//!
//! Covers the subset of GitHub Actions expressions used by workflow files:
//! `if:` conditions and `${{ }}` interpolation in commands, inputs and cache
//! keys. Expressions are parsed once at load time and evaluated per step
//! against an [`EvalContext`].

use crate::core::context::EvalContext;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while parsing an expression
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SyntaxError(pub String);

/// Errors raised while evaluating an expression
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("hashFiles failed: {0}")]
    HashFiles(#[from] std::io::Error),

    #[error("hashFiles requires a workspace")]
    NoWorkspace,
}

/// Runtime value of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            Value::Number(n) => *n,
            Value::String(s) if s.trim().is_empty() => 0.0,
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Loose equality: strings compare case-insensitively, mixed types
    /// are coerced to numbers.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => self.as_number() == other.as_number(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted property path such as `steps.cache.outputs.cache-hit`
    Property(Vec<String>),
    Call { name: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

const STATUS_FUNCTIONS: [&str; 4] = ["success", "failure", "always", "cancelled"];

impl Expr {
    /// Parse an expression, accepting an optional `${{ }}` wrapper
    pub fn parse(source: &str) -> Result<Expr, SyntaxError> {
        let trimmed = source.trim();
        let inner = trimmed
            .strip_prefix("${{")
            .and_then(|s| s.strip_suffix("}}"))
            .unwrap_or(trimmed);

        let tokens = tokenize(inner)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(SyntaxError(format!(
                "unexpected token {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    /// Whether the expression calls the named function anywhere
    pub fn calls(&self, function: &str) -> bool {
        match self {
            Expr::Literal(_) | Expr::Property(_) => false,
            Expr::Call { name, args } => {
                name.eq_ignore_ascii_case(function) || args.iter().any(|a| a.calls(function))
            }
            Expr::Not(e) => e.calls(function),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) => {
                a.calls(function) || b.calls(function)
            }
        }
    }

    /// Whether the expression checks job status explicitly
    pub fn uses_status_function(&self) -> bool {
        STATUS_FUNCTIONS.iter().any(|f| self.calls(f))
    }

    /// Step ids referenced through `steps.<id>...`
    pub fn step_references(&self) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_step_refs(&mut refs);
        refs
    }

    fn collect_step_refs(&self, refs: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Property(path) => {
                if path.len() > 1 && path[0] == "steps" {
                    refs.push(path[1].clone());
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_step_refs(refs)),
            Expr::Not(e) => e.collect_step_refs(refs),
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Eq(a, b) | Expr::Ne(a, b) => {
                a.collect_step_refs(refs);
                b.collect_step_refs(refs);
            }
        }
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Property(path) => Ok(ctx
                .lookup(&path.join("."))
                .map(|s| Value::String(s.to_string()))
                .unwrap_or(Value::Null)),
            Expr::Not(e) => Ok(Value::Bool(!e.evaluate(ctx)?.is_truthy())),
            Expr::And(a, b) => {
                let left = a.evaluate(ctx)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                b.evaluate(ctx)
            }
            Expr::Or(a, b) => {
                let left = a.evaluate(ctx)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                b.evaluate(ctx)
            }
            Expr::Eq(a, b) => Ok(Value::Bool(a.evaluate(ctx)?.loose_eq(&b.evaluate(ctx)?))),
            Expr::Ne(a, b) => Ok(Value::Bool(!a.evaluate(ctx)?.loose_eq(&b.evaluate(ctx)?))),
            Expr::Call { name, args } => call(name, args, ctx),
        }
    }
}

fn expect_args(name: &str, args: &[Expr], expected: &'static str, ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn call(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<Value, EvalError> {
    let eval_strings = |args: &[Expr]| -> Result<Vec<String>, EvalError> {
        args.iter()
            .map(|a| a.evaluate(ctx).map(|v| v.to_string()))
            .collect()
    };

    match name.to_ascii_lowercase().as_str() {
        "success" => {
            expect_args(name, args, "0", args.is_empty())?;
            Ok(Value::Bool(!ctx.job_failed && !ctx.cancelled))
        }
        "failure" => {
            expect_args(name, args, "0", args.is_empty())?;
            Ok(Value::Bool(ctx.job_failed))
        }
        "always" => {
            expect_args(name, args, "0", args.is_empty())?;
            Ok(Value::Bool(true))
        }
        "cancelled" => {
            expect_args(name, args, "0", args.is_empty())?;
            Ok(Value::Bool(ctx.cancelled))
        }
        "contains" => {
            expect_args(name, args, "2", args.len() == 2)?;
            let v = eval_strings(args)?;
            Ok(Value::Bool(v[0].to_lowercase().contains(&v[1].to_lowercase())))
        }
        "startswith" => {
            expect_args(name, args, "2", args.len() == 2)?;
            let v = eval_strings(args)?;
            Ok(Value::Bool(v[0].to_lowercase().starts_with(&v[1].to_lowercase())))
        }
        "endswith" => {
            expect_args(name, args, "2", args.len() == 2)?;
            let v = eval_strings(args)?;
            Ok(Value::Bool(v[0].to_lowercase().ends_with(&v[1].to_lowercase())))
        }
        "format" => {
            expect_args(name, args, "at least 1", !args.is_empty())?;
            let v = eval_strings(args)?;
            let mut out = v[0].clone();
            for (i, arg) in v[1..].iter().enumerate() {
                out = out.replace(&format!("{{{}}}", i), arg);
            }
            Ok(Value::String(out))
        }
        "hashfiles" => {
            expect_args(name, args, "at least 1", !args.is_empty())?;
            let patterns = eval_strings(args)?;
            let workspace = ctx.workspace.as_deref().ok_or(EvalError::NoWorkspace)?;
            let digest = crate::cache::key::hash_files(workspace, &patterns)?;
            Ok(Value::String(digest))
        }
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
    Dot,
    Not,
    And,
    Or,
    Eq,
    Ne,
}

fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' => {
                // '' inside a literal is an escaped quote
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(SyntaxError("unterminated string literal".to_string())),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse()
                    .map_err(|_| SyntaxError(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(SyntaxError(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(SyntaxError(format!("expected {:?}, found {:?}", expected, t))),
            None => Err(SyntaxError(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Eq) => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = Expr::Eq(Box::new(left), Box::new(right));
                }
                Some(Token::Ne) => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = Expr::Ne(Box::new(left), Box::new(right));
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_or()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.pos += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Call { name, args })
                }
                _ => {
                    let mut path = vec![name];
                    while self.peek() == Some(&Token::Dot) {
                        self.pos += 1;
                        match self.next() {
                            Some(Token::Ident(segment)) => path.push(segment),
                            other => {
                                return Err(SyntaxError(format!(
                                    "expected property name after '.', found {:?}",
                                    other
                                )))
                            }
                        }
                    }
                    Ok(Expr::Property(path))
                }
            },
            Some(other) => Err(SyntaxError(format!("unexpected token {:?}", other))),
            None => Err(SyntaxError("unexpected end of expression".to_string())),
        }
    }
}

/// A string with embedded `${{ }}` expressions
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // The body may span lines, and `}}` inside a quoted literal does not close it
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\{((?:[^'}]|'[^']*'|\}(?:[^}']|'[^']*'))*)\}\}").expect("static template regex")
    })
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, SyntaxError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in template_pattern().captures_iter(source) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Expr(Expr::parse(inner.as_str())?));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }

        Ok(Template {
            source: source.to_string(),
            segments,
        })
    }

    /// The original, unrendered text
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    pub fn step_references(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Expr(e) => Some(e.step_references()),
                Segment::Text(_) => None,
            })
            .flatten()
            .collect()
    }

    pub fn render(&self, ctx: &EvalContext) -> Result<String, EvalError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Expr(e) => out.push_str(&e.evaluate(ctx)?.to_string()),
            }
        }
        Ok(out)
    }
}
