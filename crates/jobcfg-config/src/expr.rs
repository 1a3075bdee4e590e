//! Expression and template language for deferred values in KDL declarations.
//!
//! An expression is a literal (`'text'`, `"text"`, `42`, `true`) or a function call such
//! as `when(var('debugMode'), '--debug', '')`. A template is text with `${expr}`
//! placeholders; `$$` produces a literal `$`.
//!
//! Available functions:
//! - `var(name)` - variable lookup in the current scope
//! - `env(name)` - sanitized environment variable, must be set and non-empty
//! - `env_or_default(name, default)` - sanitized environment variable or `default`
//! - `job_start_date()` - timestamp captured once per process
//! - `when(cond, then[, else])` - `else` defaults to `''`
//! - `or(a, ...)` - first truthy argument, else the last one
//! - `eq(a, b)`, `not(a)`
//! - `concat(a, ...)` - string concatenation
//! - `quote(s)` - wrap in double quotes unless already quoted
//! - `item()`, `position()` - current item and its 1-based position in `generate-runs`

use jobcfg_core::{EvalContext, Literal, Value};
use std::sync::Arc;

use crate::{ConfigError, ConfigResult};

/// Per-item bindings while instantiating a `generate-runs` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locals {
    pub item: String,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Var,
    Env,
    EnvOrDefault,
    JobStartDate,
    When,
    Or,
    Eq,
    Not,
    Concat,
    Quote,
    Item,
    Position,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "var" => Func::Var,
            "env" => Func::Env,
            "env_or_default" => Func::EnvOrDefault,
            "job_start_date" => Func::JobStartDate,
            "when" => Func::When,
            "or" => Func::Or,
            "eq" => Func::Eq,
            "not" => Func::Not,
            "concat" => Func::Concat,
            "quote" => Func::Quote,
            "item" => Func::Item,
            "position" => Func::Position,
            _ => return None,
        })
    }

    /// Minimum and (optional) maximum argument count.
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Func::JobStartDate | Func::Item | Func::Position => (0, Some(0)),
            Func::Var | Func::Env | Func::Not | Func::Quote => (1, Some(1)),
            Func::EnvOrDefault | Func::Eq => (2, Some(2)),
            Func::When => (2, Some(3)),
            Func::Or | Func::Concat => (1, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Bool(bool),
    Call(Func, Vec<Expr>),
}

type EvalResult<T> = jobcfg_core::Result<T>;

fn eval_error(message: impl Into<String>) -> jobcfg_core::Error {
    jobcfg_core::Error::Expression(message.into())
}

impl Expr {
    /// Parse a complete expression.
    pub fn parse(source: &str) -> ConfigResult<Self> {
        let mut parser = Parser::new(source);
        let expr = parser.expr()?;
        parser.skip_ws();
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn as_constant(&self) -> Option<Literal> {
        match self {
            Expr::Str(s) => Some(Literal::Str(s.clone())),
            Expr::Int(i) => Some(Literal::Int(*i)),
            Expr::Bool(b) => Some(Literal::Bool(*b)),
            Expr::Call(..) => None,
        }
    }

    pub fn eval(&self, ctx: &dyn EvalContext, locals: Option<&Locals>) -> EvalResult<Literal> {
        let (func, args) = match self {
            Expr::Call(func, args) => (*func, args),
            constant => return constant.as_constant().ok_or_else(|| eval_error("not a constant")),
        };
        let arg = |i: usize| args[i].eval(ctx, locals);
        let string_arg = |i: usize| -> EvalResult<String> {
            match arg(i)? {
                Literal::Str(s) => Ok(s),
                other => Err(eval_error(format!(
                    "expected a string argument, got '{}'",
                    other
                ))),
            }
        };

        match func {
            Func::Var => ctx.var(&string_arg(0)?),
            Func::Env => ctx.env(&string_arg(0)?).map(Literal::Str),
            Func::EnvOrDefault => ctx.env_or_default(&string_arg(0)?, arg(1)?),
            Func::JobStartDate => Ok(Literal::Str(ctx.job_start_date())),
            Func::When => {
                if arg(0)?.is_truthy() {
                    arg(1)
                } else if args.len() > 2 {
                    arg(2)
                } else {
                    Ok(Literal::Str(String::new()))
                }
            }
            Func::Or => {
                let mut last = Literal::Str(String::new());
                for a in args {
                    last = a.eval(ctx, locals)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Func::Eq => Ok(Literal::Bool(arg(0)? == arg(1)?)),
            Func::Not => Ok(Literal::Bool(!arg(0)?.is_truthy())),
            Func::Concat => {
                let mut out = String::new();
                for a in args {
                    out.push_str(&a.eval(ctx, locals)?.to_string());
                }
                Ok(Literal::Str(out))
            }
            Func::Quote => {
                let s = arg(0)?.to_string();
                if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
                    Ok(Literal::Str(s))
                } else {
                    Ok(Literal::Str(format!("\"{}\"", s)))
                }
            }
            Func::Item => locals
                .map(|l| Literal::Str(l.item.clone()))
                .ok_or_else(|| eval_error("item() is only available inside generate-runs")),
            Func::Position => locals
                .map(|l| Literal::Int(l.position as i64))
                .ok_or_else(|| eval_error("position() is only available inside generate-runs")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Expr),
}

/// Text with `${expr}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(source: &str) -> ConfigResult<Self> {
        let mut parser = Parser::new(source);
        let mut parts = Vec::new();
        let mut text = String::new();

        while let Some(c) = parser.bump() {
            if c != '$' {
                text.push(c);
                continue;
            }
            match parser.peek() {
                Some('$') => {
                    parser.bump();
                    text.push('$');
                }
                Some('{') => {
                    parser.bump();
                    if !text.is_empty() {
                        parts.push(Part::Text(std::mem::take(&mut text)));
                    }
                    let expr = parser.expr()?;
                    parser.skip_ws();
                    parser.expect('}')?;
                    parts.push(Part::Expr(expr));
                }
                _ => text.push('$'),
            }
        }
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }

        Ok(Self { parts })
    }

    fn as_constant(&self) -> Option<Literal> {
        match self.parts.as_slice() {
            [] => Some(Literal::Str(String::new())),
            [Part::Expr(e)] => e.as_constant(),
            parts => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        Part::Text(t) => out.push_str(t),
                        Part::Expr(e) => out.push_str(&e.as_constant()?.to_string()),
                    }
                }
                Some(Literal::Str(out))
            }
        }
    }

    /// A template that is exactly one placeholder keeps the expression's literal type.
    pub fn eval(&self, ctx: &dyn EvalContext, locals: Option<&Locals>) -> EvalResult<Literal> {
        if let [Part::Expr(e)] = self.parts.as_slice() {
            return e.eval(ctx, locals);
        }
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Expr(e) => out.push_str(&e.eval(ctx, locals)?.to_string()),
            }
        }
        Ok(Literal::Str(out))
    }
}

/// A compiled leaf of a KDL declaration.
#[derive(Debug, Clone)]
pub enum Compiled {
    Literal(Literal),
    Expr { source: String, expr: Arc<Expr> },
    Template { source: String, template: Arc<Template> },
}

impl Compiled {
    /// Compile a bare expression, folding constants into literals.
    pub fn expression(source: &str) -> ConfigResult<Self> {
        let expr = Expr::parse(source)?;
        Ok(match expr.as_constant() {
            Some(lit) => Compiled::Literal(lit),
            None => Compiled::Expr {
                source: source.to_string(),
                expr: Arc::new(expr),
            },
        })
    }

    /// Compile a template, folding placeholder-free text into a literal.
    pub fn template(source: &str) -> ConfigResult<Self> {
        let template = Template::parse(source)?;
        Ok(match template.as_constant() {
            Some(lit) => Compiled::Literal(lit),
            None => Compiled::Template {
                source: source.to_string(),
                template: Arc::new(template),
            },
        })
    }

    pub fn evaluate(&self, ctx: &dyn EvalContext, locals: Option<&Locals>) -> EvalResult<Literal> {
        match self {
            Compiled::Literal(lit) => Ok(lit.clone()),
            Compiled::Expr { expr, .. } => expr.eval(ctx, locals),
            Compiled::Template { template, .. } => template.eval(ctx, locals),
        }
    }

    /// Turn the leaf into a document value, binding `locals` into deferred closures.
    pub fn to_value(&self, locals: Option<Arc<Locals>>) -> Value {
        match self {
            Compiled::Literal(lit) => Value::Literal(lit.clone()),
            Compiled::Expr { source, expr } => {
                let expr = Arc::clone(expr);
                Value::deferred(source.clone(), move |ctx| expr.eval(ctx, locals.as_deref()))
            }
            Compiled::Template { source, template } => {
                let template = Arc::clone(template);
                Value::deferred(source.clone(), move |ctx| {
                    template.eval(ctx, locals.as_deref())
                })
            }
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidExpression {
            source_text: self.source.to_string(),
            message: format!("{} at position {}", message.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> ConfigResult<()> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn expr(&mut self) -> ConfigResult<Expr> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.bump();
                self.string(q)
            }
            Some(c) if c.is_ascii_digit() || c == '-' => self.int(),
            Some(c) if c.is_alphabetic() || c == '_' => self.call(),
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("expected an expression")),
        }
    }

    fn string(&mut self, quote: char) -> ConfigResult<Expr> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(Expr::Str(out)),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn int(&mut self) -> ConfigResult<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse()
            .map(Expr::Int)
            .map_err(|_| self.error(format!("invalid integer '{}'", text)))
    }

    fn call(&mut self) -> ConfigResult<Expr> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.skip_ws();

        if self.peek() != Some('(') {
            return match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                _ => Err(self.error(format!("expected '(' after '{}'", name))),
            };
        }
        self.bump();

        let func = Func::from_name(&name)
            .ok_or_else(|| self.error(format!("unknown function '{}'", name)))?;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
        } else {
            loop {
                args.push(self.expr()?);
                self.skip_ws();
                match self.bump() {
                    Some(',') => continue,
                    Some(')') => break,
                    _ => return Err(self.error("expected ',' or ')' in argument list")),
                }
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(self.error(format!(
                "wrong number of arguments for '{}': {}",
                name,
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}
