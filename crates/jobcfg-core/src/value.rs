//! Leaf values of a job declaration: literals and deferred expressions.
//!
//! A deferred expression is an opaque closure that produces a [`Literal`] when it is
//! handed an [`EvalContext`]. The context is always passed explicitly, so the same
//! expression can be evaluated under different variable scopes.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::Result;

/// A fully resolved scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(untagged)]
pub enum Literal {
    #[display("{_0}")]
    Str(String),
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Int(i64),
}

impl Literal {
    /// Empty strings, `false` and `0` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Literal::Str(s) => !s.is_empty(),
            Literal::Bool(b) => *b,
            Literal::Int(i) => *i != 0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

/// Accessors available to a deferred expression while it is being evaluated.
pub trait EvalContext {
    /// Look up a variable in the scope of the field currently being resolved.
    fn var(&self, name: &str) -> Result<Literal>;

    /// Read a (sanitized) environment variable. Unset or empty values are an error.
    fn env(&self, name: &str) -> Result<String>;

    /// Read a (sanitized) environment variable, falling back to `default` when unset.
    fn env_or_default(&self, name: &str, default: Literal) -> Result<Literal>;

    /// The timestamp captured once when the process started resolving jobs.
    fn job_start_date(&self) -> String;
}

type DeferredFn = dyn Fn(&dyn EvalContext) -> Result<Literal> + Send + Sync;

/// An expression whose literal value is only known once it is evaluated.
#[derive(Clone)]
pub struct Deferred {
    source: Arc<str>,
    func: Arc<DeferredFn>,
}

impl Deferred {
    pub fn new<F>(source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&dyn EvalContext) -> Result<Literal> + Send + Sync + 'static,
    {
        Self {
            source: Arc::from(source.into()),
            func: Arc::new(func),
        }
    }

    /// Human-readable description of the expression, used in logs and errors.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &dyn EvalContext) -> Result<Literal> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Deferred").field(&self.source).finish()
    }
}

/// A leaf of the configuration graph: either already literal or still deferred.
#[derive(Debug, Clone)]
pub enum Value {
    Literal(Literal),
    Deferred(Deferred),
}

impl Value {
    pub fn deferred<F>(source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&dyn EvalContext) -> Result<Literal> + Send + Sync + 'static,
    {
        Value::Deferred(Deferred::new(source, func))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Value::Deferred(_))
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Literal(lit) => Some(lit),
            Value::Deferred(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(lit) => write!(f, "{}", lit),
            Value::Deferred(d) => write!(f, "<deferred: {}>", d.source()),
        }
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        Value::Literal(lit)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Value::Deferred(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(b.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Literal(i.into())
    }
}
