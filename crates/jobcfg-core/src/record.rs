//! Loosely-typed declaration tree.
//!
//! Loaders (the KDL reader, or Rust code building a declaration by hand) produce a
//! [`Record`]; [`crate::job::JobDocument::from_record`] turns it into typed nodes.
//! Generated runs come back from a [`RunsGenerator`] as records too, so both kinds of
//! runs share one conversion.

use std::fmt;
use std::sync::Arc;

use crate::value::{EvalContext, Value};
use crate::Result;

/// An ordered key-value mapping.
#[derive(Debug, Clone, Default)]
pub struct Record {
    entries: Vec<(String, RawValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a key, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RawValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A node of the declaration tree.
#[derive(Debug, Clone)]
pub enum RawValue {
    Value(Value),
    List(Vec<RawValue>),
    Map(Record),
    Generator(RunsGenerator),
}

impl RawValue {
    pub fn generator<F>(source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&dyn EvalContext) -> Result<Vec<Record>> + Send + Sync + 'static,
    {
        RawValue::Generator(RunsGenerator::new(source, func))
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<RawValue>,
    {
        RawValue::List(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the node kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Value(Value::Literal(_)) => "literal",
            RawValue::Value(Value::Deferred(_)) => "deferred expression",
            RawValue::List(_) => "sequence",
            RawValue::Map(_) => "mapping",
            RawValue::Generator(_) => "run generator",
        }
    }
}

impl From<Value> for RawValue {
    fn from(v: Value) -> Self {
        RawValue::Value(v)
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Value(s.into())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Value(s.into())
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Value(b.into())
    }
}

impl From<i64> for RawValue {
    fn from(i: i64) -> Self {
        RawValue::Value(i.into())
    }
}

impl From<Record> for RawValue {
    fn from(r: Record) -> Self {
        RawValue::Map(r)
    }
}

impl From<Vec<RawValue>> for RawValue {
    fn from(items: Vec<RawValue>) -> Self {
        RawValue::List(items)
    }
}

type GeneratorFn = dyn Fn(&dyn EvalContext) -> Result<Vec<Record>> + Send + Sync;

/// A deferred producer of run records.
#[derive(Clone)]
pub struct RunsGenerator {
    source: Arc<str>,
    func: Arc<GeneratorFn>,
}

impl RunsGenerator {
    pub fn new<F>(source: impl Into<String>, func: F) -> Self
    where
        F: Fn(&dyn EvalContext) -> Result<Vec<Record>> + Send + Sync + 'static,
    {
        Self {
            source: Arc::from(source.into()),
            func: Arc::new(func),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn generate(&self, ctx: &dyn EvalContext) -> Result<Vec<Record>> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for RunsGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunsGenerator").field(&self.source).finish()
    }
}
