//! Job document, runs and post-action settings.

use tracing::debug;

use crate::command::CommandType;
use crate::record::{RawValue, Record, RunsGenerator};
use crate::value::{Literal, Value};
use crate::{Error, Result};

/// Name of the built-in job start date variable.
pub const JOB_START_DATE_KEY: &str = "JOB_START_DATE";

/// Variable names supplied by the engine itself; declarations may not redefine them.
pub const BUILT_IN_VARIABLES: &[&str] = &[JOB_START_DATE_KEY];

/// Ordered variable mapping. Keys keep their declaration order.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    entries: Vec<(String, Value)>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace a value; a replaced key keeps its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Variables::new();
        for (k, v) in iter {
            vars.set(k, v);
        }
        vars
    }
}

/// Mail post-action of a run.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub enabled: bool,
    pub send_attachment: bool,
    pub subject: Value,
    pub sender: Value,
    pub attachment_file_name: Value,
    pub body_file: Value,
}

impl MailSettings {
    fn from_record(path: &str, record: &Record) -> Result<Self> {
        Ok(Self {
            enabled: bool_field(path, record, "enabled")?,
            send_attachment: bool_field(path, record, "send_attachment")?,
            subject: required_value(path, record, "subject")?,
            sender: required_value(path, record, "sender")?,
            attachment_file_name: optional_value(path, record, "attachment_file_name")?,
            body_file: optional_value(path, record, "body_file")?,
        })
    }
}

/// Upload post-action of a run.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub enabled: bool,
    pub file_name: Value,
}

impl UploadSettings {
    fn from_record(path: &str, record: &Record) -> Result<Self> {
        Ok(Self {
            enabled: bool_field(path, record, "enabled")?,
            file_name: required_value(path, record, "file_name")?,
        })
    }
}

/// One independently configured invocation within a job.
#[derive(Debug, Clone)]
pub struct Run {
    pub name: String,
    pub mail_settings: Option<MailSettings>,
    pub upload_settings: Option<UploadSettings>,
    pub arguments: Vec<Value>,
    pub variables: Variables,
}

impl Run {
    /// Convert a run record. `path` prefixes error messages (e.g. `runs[2]`).
    pub fn from_record(path: &str, record: &Record) -> Result<Self> {
        let name = match record.get("name") {
            Some(raw) => literal_string(&format!("{}.name", path), raw)?,
            None => return Err(Error::MissingField(format!("{}.name", path))),
        };

        let mut mail_settings = None;
        let mut upload_settings = None;
        let mut arguments = Vec::new();
        let mut variables = Variables::new();

        for (key, raw) in record.iter() {
            let field = format!("{}.{}", path, key);
            match key {
                "name" => {}
                "mail_settings" => {
                    mail_settings = Some(MailSettings::from_record(&field, map(&field, raw)?)?)
                }
                "upload_settings" => {
                    upload_settings = Some(UploadSettings::from_record(&field, map(&field, raw)?)?)
                }
                "arguments" => arguments = value_list(&field, raw)?,
                "variables" => variables = variable_map(&field, raw)?,
                _ => debug!(field = %field, "Ignoring unknown run field"),
            }
        }

        Ok(Self {
            name,
            mail_settings,
            upload_settings,
            arguments,
            variables,
        })
    }
}

/// The `runs` section: declared up front, or produced by a deferred generator.
#[derive(Debug, Clone)]
pub enum Runs {
    Static(Vec<Run>),
    Generated(RunsGenerator),
}

/// The root of a job declaration, mutated in place until every field is literal.
#[derive(Debug, Clone)]
pub struct JobDocument {
    pub job_name: String,
    pub command_type: CommandType,
    pub runs: Runs,
    pub mandatory_env_vars: Vec<String>,
    pub optional_env_vars: Vec<String>,
    pub arguments: Vec<Value>,
    pub global_variables: Variables,
    pub env_sanitize_exceptions: Vec<String>,
}

impl JobDocument {
    /// Build a document from the root mapping of a declaration.
    pub fn from_record(record: &Record) -> Result<Self> {
        let job_name = match record.get("job_name") {
            Some(raw) => literal_string("job_name", raw)?,
            None => return Err(Error::MissingField("job_name".to_string())),
        };
        let command_type: CommandType = match record.get("command_type") {
            Some(raw) => literal_string("command_type", raw)?.parse()?,
            None => return Err(Error::MissingField("command_type".to_string())),
        };

        let mut doc = JobDocument {
            job_name,
            command_type,
            runs: Runs::Static(Vec::new()),
            mandatory_env_vars: Vec::new(),
            optional_env_vars: Vec::new(),
            arguments: Vec::new(),
            global_variables: Variables::new(),
            env_sanitize_exceptions: Vec::new(),
        };

        for (key, raw) in record.iter() {
            match key {
                "job_name" | "command_type" => {}
                "runs" => doc.runs = runs_section(raw)?,
                "mandatory_env_vars" => doc.mandatory_env_vars = string_list(key, raw)?,
                "optional_env_vars" => doc.optional_env_vars = string_list(key, raw)?,
                "arguments" => doc.arguments = value_list(key, raw)?,
                "global_variables" => doc.global_variables = variable_map(key, raw)?,
                "env_sanitize_exceptions" => doc.env_sanitize_exceptions = string_list(key, raw)?,
                _ => debug!(field = %key, "Ignoring unknown job field"),
            }
        }

        Ok(doc)
    }

    /// Statically known runs; empty while runs are still a generator.
    pub fn runs(&self) -> &[Run] {
        match &self.runs {
            Runs::Static(runs) => runs,
            Runs::Generated(_) => &[],
        }
    }

    pub fn runs_mut(&mut self) -> &mut [Run] {
        match &mut self.runs {
            Runs::Static(runs) => runs,
            Runs::Generated(_) => Default::default(),
        }
    }

    pub fn has_generated_runs(&self) -> bool {
        matches!(self.runs, Runs::Generated(_))
    }
}

fn runs_section(raw: &RawValue) -> Result<Runs> {
    match raw {
        RawValue::Generator(generator) => Ok(Runs::Generated(generator.clone())),
        RawValue::List(items) => {
            let runs = items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    let path = format!("runs[{}]", idx);
                    Run::from_record(&path, map(&path, item)?)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Runs::Static(runs))
        }
        other => Err(Error::invalid_value(
            "runs",
            format!("expected a sequence of runs or a run generator, got {}", other.kind()),
        )),
    }
}

fn map<'a>(field: &str, raw: &'a RawValue) -> Result<&'a Record> {
    match raw {
        RawValue::Map(record) => Ok(record),
        other => Err(Error::invalid_value(
            field,
            format!("expected a mapping, got {}", other.kind()),
        )),
    }
}

fn literal_string(field: &str, raw: &RawValue) -> Result<String> {
    match raw {
        RawValue::Value(Value::Literal(Literal::Str(s))) => Ok(s.clone()),
        other => Err(Error::invalid_value(
            field,
            format!("expected a literal string, got {}", other.kind()),
        )),
    }
}

fn string_list(field: &str, raw: &RawValue) -> Result<Vec<String>> {
    match raw {
        RawValue::List(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| literal_string(&format!("{}[{}]", field, idx), item))
            .collect(),
        other => Err(Error::invalid_value(
            field,
            format!("expected a sequence of strings, got {}", other.kind()),
        )),
    }
}

fn value_list(field: &str, raw: &RawValue) -> Result<Vec<Value>> {
    match raw {
        RawValue::List(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| match item {
                RawValue::Value(v) => Ok(v.clone()),
                other => Err(Error::invalid_value(
                    format!("{}[{}]", field, idx),
                    format!("expected a string or deferred expression, got {}", other.kind()),
                )),
            })
            .collect(),
        other => Err(Error::invalid_value(
            field,
            format!("expected a sequence, got {}", other.kind()),
        )),
    }
}

fn variable_map(field: &str, raw: &RawValue) -> Result<Variables> {
    let record = map(field, raw)?;
    let mut vars = Variables::new();
    for (name, item) in record.iter() {
        match item {
            RawValue::Value(v) => vars.set(name, v.clone()),
            other => {
                return Err(Error::invalid_value(
                    format!("{}.{}", field, name),
                    format!("expected a literal or deferred expression, got {}", other.kind()),
                ));
            }
        }
    }
    Ok(vars)
}

fn bool_field(path: &str, record: &Record, key: &str) -> Result<bool> {
    match record.get(key) {
        None => Ok(false),
        Some(RawValue::Value(Value::Literal(Literal::Bool(b)))) => Ok(*b),
        Some(other) => Err(Error::invalid_value(
            format!("{}.{}", path, key),
            format!("expected a literal boolean, got {}", other.kind()),
        )),
    }
}

fn required_value(path: &str, record: &Record, key: &str) -> Result<Value> {
    match record.get(key) {
        None => Err(Error::MissingField(format!("{}.{}", path, key))),
        Some(RawValue::Value(v)) => Ok(v.clone()),
        Some(other) => Err(Error::invalid_value(
            format!("{}.{}", path, key),
            format!("expected a string or deferred expression, got {}", other.kind()),
        )),
    }
}

fn optional_value(path: &str, record: &Record, key: &str) -> Result<Value> {
    match record.get(key) {
        None => Ok(Value::from("")),
        Some(_) => required_value(path, record, key),
    }
}
