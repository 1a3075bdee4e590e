//! KDL job declaration loading.
//!
//! ```kdl
//! job "Reviewsync" command="REVIEWSYNC"
//! mandatory-env-vars "MAIL_ACC_USER"
//! global-variables {
//!     debugMode (expr)"env_or_default('DEBUG_ENABLED', true)"
//! }
//! arguments {
//!     - (tpl)"${when(var('debugMode'), '--debug', '')}"
//! }
//! runs {
//!     run "run1" {
//!         mail-settings enabled=#true {
//!             subject (tpl)"Report ${job_start_date()}"
//!             sender "reviewsync"
//!         }
//!     }
//! }
//! ```
//!
//! Values annotated `(tpl)` or `(template)` are templates, `(expr)` marks a bare
//! expression, anything else is a literal. `generate-runs` replaces `runs` with a run
//! template instantiated once per item.

use jobcfg_core::{Literal, RawValue, Record};
use kdl::{KdlDocument, KdlEntry, KdlNode};
use std::sync::Arc;
use tracing::debug;

use crate::expr::{Compiled, Locals};
use crate::{ConfigError, ConfigResult};

/// A parsed but not yet instantiated declaration subtree.
#[derive(Debug, Clone)]
enum Draft {
    Leaf(Compiled),
    List(Vec<Draft>),
    Map(Vec<(String, Draft)>),
}

impl Draft {
    fn instantiate(&self, locals: Option<&Arc<Locals>>) -> RawValue {
        match self {
            Draft::Leaf(leaf) => RawValue::Value(leaf.to_value(locals.cloned())),
            Draft::List(items) => {
                RawValue::List(items.iter().map(|d| d.instantiate(locals)).collect())
            }
            Draft::Map(entries) => {
                let mut record = Record::new();
                for (key, draft) in entries {
                    record.insert(key.clone(), draft.instantiate(locals));
                }
                RawValue::Map(record)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct RunDraft {
    name: Compiled,
    body: Vec<(String, Draft)>,
}

impl RunDraft {
    fn to_record(&self) -> Record {
        let mut record = Record::new().with("name", self.name.to_value(None));
        for (key, draft) in &self.body {
            record.insert(key.clone(), draft.instantiate(None));
        }
        record
    }

    /// Instantiate for one generated item. The name is evaluated right away.
    fn instantiate(
        &self,
        ctx: &dyn jobcfg_core::EvalContext,
        locals: &Arc<Locals>,
    ) -> jobcfg_core::Result<Record> {
        let name = self.name.evaluate(ctx, Some(locals))?.to_string();
        let mut record = Record::new().with("name", name);
        for (key, draft) in &self.body {
            record.insert(key.clone(), draft.instantiate(Some(locals)));
        }
        Ok(record)
    }
}

/// Parse a KDL job declaration into a declaration record.
pub fn parse_declaration(kdl: &str) -> ConfigResult<Record> {
    let doc: KdlDocument = kdl.parse()?;
    let mut record = Record::new();

    for node in doc.nodes() {
        match node.name().value() {
            "job" => {
                let name = first_string_arg(node)
                    .ok_or_else(|| ConfigError::invalid_value("job", "missing job name"))?;
                record.insert("job_name", name);
                if let Some(command) = node.get("command").and_then(|v| v.as_string()) {
                    record.insert("command_type", command);
                }
            }
            key @ ("mandatory-env-vars" | "optional-env-vars" | "env-sanitize-exceptions") => {
                record.insert(snake_case(key), RawValue::list(string_args(node)));
            }
            "arguments" => {
                let args = parse_list(node, "arguments")?;
                record.insert("arguments", Draft::List(args).instantiate(None));
            }
            "global-variables" => {
                let vars = parse_mapping(node, "global_variables")?;
                record.insert("global_variables", Draft::Map(vars).instantiate(None));
            }
            "runs" => {
                let runs = children(node)
                    .filter(|child| child.name().value() == "run")
                    .enumerate()
                    .map(|(idx, child)| parse_run(child, &format!("runs[{}]", idx)))
                    .collect::<ConfigResult<Vec<_>>>()?;
                record.insert(
                    "runs",
                    RawValue::list(runs.iter().map(|run| RawValue::Map(run.to_record()))),
                );
            }
            "generate-runs" => {
                record.insert("runs", parse_generator(node)?);
            }
            other => debug!(node = %other, "Ignoring unknown declaration node"),
        }
    }

    Ok(record)
}

fn parse_generator(node: &KdlNode) -> ConfigResult<RawValue> {
    let items = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .enumerate()
        .map(|(idx, entry)| compile(entry, &format!("generate-runs[{}]", idx)))
        .collect::<ConfigResult<Vec<_>>>()?;

    let templates: Vec<&KdlNode> = children(node)
        .filter(|child| child.name().value() == "run")
        .collect();
    let [template] = templates.as_slice() else {
        return Err(ConfigError::invalid_value(
            "generate-runs",
            format!("expected exactly one run template, found {}", templates.len()),
        ));
    };
    let template = Arc::new(parse_run(template, "generate-runs.run")?);

    let source = format!("generate-runs ({} item entries)", items.len());
    Ok(RawValue::generator(source, move |ctx| {
        let mut names = Vec::new();
        for item in &items {
            match item {
                Compiled::Literal(lit) => names.push(lit.to_string()),
                deferred => names.extend(
                    deferred
                        .evaluate(ctx, None)?
                        .to_string()
                        .split_whitespace()
                        .map(String::from),
                ),
            }
        }
        debug!(items = ?names, "Generating runs");

        names
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let locals = Arc::new(Locals {
                    item,
                    position: idx + 1,
                });
                template.instantiate(ctx, &locals)
            })
            .collect()
    }))
}

fn parse_run(node: &KdlNode, path: &str) -> ConfigResult<RunDraft> {
    let name_entry = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| ConfigError::invalid_value(path, "missing run name"))?;
    let name = compile(name_entry, &format!("{}.name", path))?;

    let mut body = Vec::new();
    for child in children(node) {
        let key = snake_case(child.name().value());
        let field = format!("{}.{}", path, key);
        let draft = match key.as_str() {
            "variables" => Draft::Map(parse_mapping(child, &field)?),
            "arguments" => Draft::List(parse_list(child, &field)?),
            "mail_settings" | "upload_settings" => Draft::Map(parse_settings(child, &field)?),
            _ => {
                debug!(field = %field, "Ignoring unknown run node");
                continue;
            }
        };
        body.push((key, draft));
    }

    Ok(RunDraft { name, body })
}

/// Properties and child nodes of a settings block, keyed in snake case.
fn parse_settings(node: &KdlNode, path: &str) -> ConfigResult<Vec<(String, Draft)>> {
    let mut entries = Vec::new();
    for entry in node.entries() {
        if let Some(name) = entry.name() {
            let key = snake_case(name.value());
            let leaf = compile(entry, &format!("{}.{}", path, key))?;
            entries.push((key, Draft::Leaf(leaf)));
        }
    }
    for child in children(node) {
        let key = snake_case(child.name().value());
        let leaf = single_value(child, &format!("{}.{}", path, key))?;
        entries.push((key, Draft::Leaf(leaf)));
    }
    Ok(entries)
}

/// A `name value` child per entry. Variable names are kept verbatim.
fn parse_mapping(node: &KdlNode, path: &str) -> ConfigResult<Vec<(String, Draft)>> {
    children(node)
        .map(|child| {
            let name = child.name().value().to_string();
            let leaf = single_value(child, &format!("{}.{}", path, name))?;
            Ok((name, Draft::Leaf(leaf)))
        })
        .collect()
}

/// Positional entries of the node itself, then of each child (`- value`).
fn parse_list(node: &KdlNode, path: &str) -> ConfigResult<Vec<Draft>> {
    let entries = node
        .entries()
        .iter()
        .chain(children(node).flat_map(|child| child.entries().iter()))
        .filter(|e| e.name().is_none());

    entries
        .enumerate()
        .map(|(idx, entry)| Ok(Draft::Leaf(compile(entry, &format!("{}[{}]", path, idx))?)))
        .collect()
}

fn single_value(node: &KdlNode, path: &str) -> ConfigResult<Compiled> {
    let positional: Vec<&KdlEntry> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .collect();
    match positional.as_slice() {
        [entry] => compile(entry, path),
        _ => Err(ConfigError::invalid_value(
            path,
            format!("expected exactly one value, found {}", positional.len()),
        )),
    }
}

/// Compile an entry according to its type annotation.
fn compile(entry: &KdlEntry, path: &str) -> ConfigResult<Compiled> {
    let value = entry.value();
    let annotated_text = || {
        value
            .as_string()
            .ok_or_else(|| ConfigError::invalid_value(path, "annotated values must be strings"))
    };

    match entry.ty().map(|t| t.value()) {
        Some("tpl" | "template") => Compiled::template(annotated_text()?),
        Some("expr") => Compiled::expression(annotated_text()?),
        Some(other) => Err(ConfigError::invalid_value(
            path,
            format!("unknown type annotation '({})'", other),
        )),
        None => {
            if let Some(s) = value.as_string() {
                Ok(Compiled::Literal(Literal::from(s)))
            } else if let Some(b) = value.as_bool() {
                Ok(Compiled::Literal(Literal::Bool(b)))
            } else if let Some(i) = value.as_integer() {
                i64::try_from(i)
                    .map(|i| Compiled::Literal(Literal::Int(i)))
                    .map_err(|_| ConfigError::invalid_value(path, "integer out of range"))
            } else {
                Err(ConfigError::invalid_value(
                    path,
                    format!("unsupported value '{}'", value),
                ))
            }
        }
    }
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes().iter())
}

fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn snake_case(name: &str) -> String {
    name.replace('-', "_")
}
