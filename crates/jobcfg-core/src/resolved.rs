//! Execution-ready snapshot of a fully resolved job.
//!
//! This is what command runners, mail senders and uploaders consume. Every field is a
//! plain literal; building it fails if any deferred expression survived resolution.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::command::CommandType;
use crate::job::{JobDocument, MailSettings, Run, Runs, UploadSettings, Variables};
use crate::value::{Literal, Value};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedJob {
    pub job_name: String,
    pub command_type: CommandType,
    pub global_variables: ResolvedVariables,
    pub runs: Vec<ResolvedRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRun {
    pub name: String,
    pub mail_settings: Option<ResolvedMailSettings>,
    pub upload_settings: Option<ResolvedUploadSettings>,
    pub arguments: Vec<String>,
    pub variables: ResolvedVariables,
}

impl ResolvedRun {
    /// Arguments joined into a single invocation string.
    pub fn command_line(&self) -> String {
        self.arguments.join(" ")
    }
}

/// Resolved variables in declaration order. Serializes as a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedVariables(Vec<(String, Literal)>);

impl ResolvedVariables {
    pub fn get(&self, name: &str) -> Option<&Literal> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Literal)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Literal)> for ResolvedVariables {
    fn from_iter<I: IntoIterator<Item = (String, Literal)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ResolvedVariables {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResolvedVariables {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ResolvedVariables;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of variable names to literals")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut vars = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, Literal>()? {
                    vars.push(entry);
                }
                Ok(ResolvedVariables(vars))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMailSettings {
    pub enabled: bool,
    pub send_attachment: bool,
    pub subject: String,
    pub sender: String,
    pub attachment_file_name: String,
    pub body_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedUploadSettings {
    pub enabled: bool,
    pub file_name: String,
}

impl JobDocument {
    /// Snapshot the document, failing on the first field that is still deferred.
    pub fn to_resolved(&self) -> Result<ResolvedJob> {
        let runs = match &self.runs {
            Runs::Static(runs) => runs,
            Runs::Generated(_) => return Err(Error::UnresolvedField("runs".to_string())),
        };

        Ok(ResolvedJob {
            job_name: self.job_name.clone(),
            command_type: self.command_type,
            global_variables: literal_map("global_variables", &self.global_variables)?,
            runs: runs
                .iter()
                .enumerate()
                .map(|(idx, run)| resolve_run(&format!("runs[{}]", idx), run))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

fn resolve_run(path: &str, run: &Run) -> Result<ResolvedRun> {
    let mail_settings = run
        .mail_settings
        .as_ref()
        .map(|mail| resolve_mail(&format!("{}.mail_settings", path), mail))
        .transpose()?;
    let upload_settings = run
        .upload_settings
        .as_ref()
        .map(|upload| resolve_upload(&format!("{}.upload_settings", path), upload))
        .transpose()?;

    Ok(ResolvedRun {
        name: run.name.clone(),
        mail_settings,
        upload_settings,
        arguments: run
            .arguments
            .iter()
            .enumerate()
            .map(|(idx, arg)| string(&format!("{}.arguments[{}]", path, idx), arg))
            .collect::<Result<Vec<_>>>()?,
        variables: literal_map(&format!("{}.variables", path), &run.variables)?,
    })
}

fn resolve_mail(path: &str, mail: &MailSettings) -> Result<ResolvedMailSettings> {
    Ok(ResolvedMailSettings {
        enabled: mail.enabled,
        send_attachment: mail.send_attachment,
        subject: string(&format!("{}.subject", path), &mail.subject)?,
        sender: string(&format!("{}.sender", path), &mail.sender)?,
        attachment_file_name: string(
            &format!("{}.attachment_file_name", path),
            &mail.attachment_file_name,
        )?,
        body_file: string(&format!("{}.body_file", path), &mail.body_file)?,
    })
}

fn resolve_upload(path: &str, upload: &UploadSettings) -> Result<ResolvedUploadSettings> {
    Ok(ResolvedUploadSettings {
        enabled: upload.enabled,
        file_name: string(&format!("{}.file_name", path), &upload.file_name)?,
    })
}

fn literal(path: &str, value: &Value) -> Result<Literal> {
    value
        .as_literal()
        .cloned()
        .ok_or_else(|| Error::UnresolvedField(path.to_string()))
}

fn string(path: &str, value: &Value) -> Result<String> {
    literal(path, value).map(|lit| lit.to_string())
}

fn literal_map(path: &str, vars: &Variables) -> Result<ResolvedVariables> {
    vars.iter()
        .map(|(name, value)| {
            let lit = literal(&format!("{}.{}", path, name), value)?;
            Ok((name.to_string(), lit))
        })
        .collect()
}
