//! Field path resolution over the typed job document.
//!
//! The document is a closed set of node kinds (document, run, mail settings, upload
//! settings). Each kind has a hand-written attribute table used both for reading a
//! snapshot of a field and for writing a resolved value back.

use jobcfg_core::{JobDocument, Runs, Value, Variables};
use tracing::debug;

use crate::field_path::{FieldPathInstance, Segment};
use crate::{ConfigError, ConfigResult};

/// A structured node of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Document,
    Run(usize),
    MailSettings(usize),
    UploadSettings(usize),
}

/// Attributes addressable by field paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    JobName,
    CommandType,
    Runs,
    MandatoryEnvVars,
    OptionalEnvVars,
    EnvSanitizeExceptions,
    Arguments,
    GlobalVariables,
    Name,
    Variables,
    Enabled,
    SendAttachment,
    Subject,
    Sender,
    AttachmentFileName,
    BodyFile,
    FileName,
}

/// Where a walk currently points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Node(Node),
    Field { owner: Node, attr: Attr },
    Item { owner: Node, attr: Attr, index: usize },
    /// An optional section that is not present on this element.
    Absent,
}

impl Slot {
    /// The node owning this slot.
    pub fn parent(&self) -> Option<Node> {
        match self {
            Slot::Node(Node::Document) | Slot::Absent => None,
            Slot::Node(Node::Run(_)) => Some(Node::Document),
            Slot::Node(Node::MailSettings(i)) | Slot::Node(Node::UploadSettings(i)) => {
                Some(Node::Run(*i))
            }
            Slot::Field { owner, .. } | Slot::Item { owner, .. } => Some(*owner),
        }
    }
}

/// Snapshot of the value found at a slot.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Scalar(Value),
    Sequence(Vec<Value>),
    Mapping(Variables),
    Node(Node),
    Runs(usize),
    Generator(String),
    Absent,
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Scalar(Value::Literal(_)) => "literal",
            FieldValue::Scalar(Value::Deferred(_)) => "deferred expression",
            FieldValue::Sequence(_) => "sequence",
            FieldValue::Mapping(_) => "mapping",
            FieldValue::Node(_) => "object",
            FieldValue::Runs(_) => "run sequence",
            FieldValue::Generator(_) => "run generator",
            FieldValue::Absent => "absent section",
        }
    }
}

/// The result of walking a field path.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub path: String,
    /// Terminal attribute name.
    pub name: String,
    pub target: Target,
}

#[derive(Debug, Clone)]
pub enum Target {
    Single {
        parent: Option<Node>,
        slot: Slot,
        value: FieldValue,
    },
    /// Parallel per-element parents, slots and values after a repeat marker.
    Broadcast {
        parents: Vec<Option<Node>>,
        slots: Vec<Slot>,
        values: Vec<FieldValue>,
    },
}

enum Step {
    One(Slot),
    Many(Vec<Slot>),
}

enum Cursor {
    Single(Slot),
    Broadcast(Vec<Slot>),
}

/// Walk `doc` following `fsi`.
pub fn resolve_field(doc: &JobDocument, fsi: &FieldPathInstance) -> ConfigResult<ResolvedField> {
    let path = fsi.to_string();
    let mut cursor = Cursor::Single(Slot::Node(Node::Document));

    for segment in fsi.segments() {
        cursor = match cursor {
            Cursor::Single(slot) => match descend(doc, slot, segment, &path)? {
                Step::One(Slot::Absent) => {
                    return Err(ConfigError::UnresolvableFieldPath(path));
                }
                Step::One(next) => Cursor::Single(next),
                Step::Many(items) => Cursor::Broadcast(items),
            },
            Cursor::Broadcast(slots) => {
                let mut next = Vec::with_capacity(slots.len());
                for slot in slots {
                    match descend(doc, slot, segment, &path)? {
                        Step::One(s) => next.push(s),
                        Step::Many(_) => {
                            return Err(ConfigError::InconsistentFieldPath {
                                path,
                                message: "cannot broadcast twice".to_string(),
                            });
                        }
                    }
                }
                Cursor::Broadcast(next)
            }
        };
    }

    let name = fsi
        .segments()
        .last()
        .map(|s| s.name().to_string())
        .ok_or_else(|| ConfigError::UnresolvableFieldPath(path.clone()))?;

    let target = match cursor {
        Cursor::Single(slot) => Target::Single {
            parent: slot.parent(),
            value: read(doc, &slot),
            slot,
        },
        Cursor::Broadcast(slots) => {
            let parents: Vec<_> = slots.iter().map(Slot::parent).collect();
            let values: Vec<_> = slots.iter().map(|s| read(doc, s)).collect();
            Target::Broadcast {
                parents,
                slots,
                values,
            }
        }
    };

    debug!(path = %path, name = %name, "Resolved field path");
    Ok(ResolvedField { path, name, target })
}

fn descend(doc: &JobDocument, slot: Slot, segment: &Segment, path: &str) -> ConfigResult<Step> {
    let owner = match slot {
        Slot::Node(node) => node,
        Slot::Absent => return Ok(Step::One(Slot::Absent)),
        Slot::Field { .. } | Slot::Item { .. } => {
            return Err(ConfigError::UnresolvableFieldPath(path.to_string()));
        }
    };

    let child = child(doc, owner, segment.name())
        .ok_or_else(|| ConfigError::UnresolvableFieldPath(path.to_string()))?;

    match segment {
        Segment::Attr(_) => Ok(Step::One(child)),
        Segment::Repeat(_) => Ok(Step::Many(elements(doc, child, path)?)),
        Segment::Index(_, idx) => {
            if child == Slot::Absent {
                return Ok(Step::One(Slot::Absent));
            }
            elements(doc, child, path)?
                .get(*idx)
                .copied()
                .map(Step::One)
                .ok_or_else(|| ConfigError::UnresolvableFieldPath(path.to_string()))
        }
    }
}

/// Expand a sequence-valued slot into one slot per element.
fn elements(doc: &JobDocument, slot: Slot, path: &str) -> ConfigResult<Vec<Slot>> {
    match (slot, read(doc, &slot)) {
        (_, FieldValue::Runs(len)) => Ok((0..len).map(|i| Slot::Node(Node::Run(i))).collect()),
        (Slot::Field { owner, attr }, FieldValue::Sequence(values)) => Ok((0..values.len())
            .map(|index| Slot::Item { owner, attr, index })
            .collect()),
        (_, FieldValue::Absent) => Ok(Vec::new()),
        (_, FieldValue::Generator(_)) => Err(ConfigError::InconsistentFieldPath {
            path: path.to_string(),
            message: "runs are still a generator and cannot be indexed".to_string(),
        }),
        (_, other) => Err(ConfigError::InconsistentFieldPath {
            path: path.to_string(),
            message: format!("expected a sequence, found {}", other.kind()),
        }),
    }
}

fn child(doc: &JobDocument, node: Node, name: &str) -> Option<Slot> {
    let field = |attr| Some(Slot::Field { owner: node, attr });
    match (node, name) {
        (Node::Document, "job_name") => field(Attr::JobName),
        (Node::Document, "command_type") => field(Attr::CommandType),
        (Node::Document, "runs") => field(Attr::Runs),
        (Node::Document, "mandatory_env_vars") => field(Attr::MandatoryEnvVars),
        (Node::Document, "optional_env_vars") => field(Attr::OptionalEnvVars),
        (Node::Document, "env_sanitize_exceptions") => field(Attr::EnvSanitizeExceptions),
        (Node::Document, "arguments") => field(Attr::Arguments),
        (Node::Document, "global_variables") => field(Attr::GlobalVariables),

        (Node::Run(_), "name") => field(Attr::Name),
        (Node::Run(_), "arguments") => field(Attr::Arguments),
        (Node::Run(_), "variables") => field(Attr::Variables),
        (Node::Run(i), "mail_settings") => Some(match doc.runs().get(i)?.mail_settings {
            Some(_) => Slot::Node(Node::MailSettings(i)),
            None => Slot::Absent,
        }),
        (Node::Run(i), "upload_settings") => Some(match doc.runs().get(i)?.upload_settings {
            Some(_) => Slot::Node(Node::UploadSettings(i)),
            None => Slot::Absent,
        }),

        (Node::MailSettings(_), "enabled") => field(Attr::Enabled),
        (Node::MailSettings(_), "send_attachment") => field(Attr::SendAttachment),
        (Node::MailSettings(_), "subject") => field(Attr::Subject),
        (Node::MailSettings(_), "sender") => field(Attr::Sender),
        (Node::MailSettings(_), "attachment_file_name") => field(Attr::AttachmentFileName),
        (Node::MailSettings(_), "body_file") => field(Attr::BodyFile),

        (Node::UploadSettings(_), "enabled") => field(Attr::Enabled),
        (Node::UploadSettings(_), "file_name") => field(Attr::FileName),

        _ => None,
    }
}

fn strings(values: &[String]) -> FieldValue {
    FieldValue::Sequence(values.iter().map(|s| Value::from(s.as_str())).collect())
}

/// Read a snapshot of the value at `slot`.
pub fn read(doc: &JobDocument, slot: &Slot) -> FieldValue {
    match *slot {
        Slot::Node(node) => FieldValue::Node(node),
        Slot::Absent => FieldValue::Absent,
        Slot::Field { owner, attr } => read_attr(doc, owner, attr),
        Slot::Item { owner, attr, index } => match read_attr(doc, owner, attr) {
            FieldValue::Sequence(values) => values
                .get(index)
                .cloned()
                .map(FieldValue::Scalar)
                .unwrap_or(FieldValue::Absent),
            _ => FieldValue::Absent,
        },
    }
}

fn read_attr(doc: &JobDocument, owner: Node, attr: Attr) -> FieldValue {
    let run = |i: usize| doc.runs().get(i);
    match (owner, attr) {
        (Node::Document, Attr::JobName) => FieldValue::Scalar(doc.job_name.as_str().into()),
        (Node::Document, Attr::CommandType) => {
            FieldValue::Scalar(doc.command_type.to_string().into())
        }
        (Node::Document, Attr::Runs) => match &doc.runs {
            Runs::Static(runs) => FieldValue::Runs(runs.len()),
            Runs::Generated(generator) => FieldValue::Generator(generator.source().to_string()),
        },
        (Node::Document, Attr::MandatoryEnvVars) => strings(&doc.mandatory_env_vars),
        (Node::Document, Attr::OptionalEnvVars) => strings(&doc.optional_env_vars),
        (Node::Document, Attr::EnvSanitizeExceptions) => strings(&doc.env_sanitize_exceptions),
        (Node::Document, Attr::Arguments) => FieldValue::Sequence(doc.arguments.clone()),
        (Node::Document, Attr::GlobalVariables) => {
            FieldValue::Mapping(doc.global_variables.clone())
        }

        (Node::Run(i), Attr::Name) => match run(i) {
            Some(r) => FieldValue::Scalar(r.name.as_str().into()),
            None => FieldValue::Absent,
        },
        (Node::Run(i), Attr::Arguments) => match run(i) {
            Some(r) => FieldValue::Sequence(r.arguments.clone()),
            None => FieldValue::Absent,
        },
        (Node::Run(i), Attr::Variables) => match run(i) {
            Some(r) => FieldValue::Mapping(r.variables.clone()),
            None => FieldValue::Absent,
        },

        (Node::MailSettings(i), attr) => match run(i).and_then(|r| r.mail_settings.as_ref()) {
            Some(mail) => match attr {
                Attr::Enabled => FieldValue::Scalar(mail.enabled.into()),
                Attr::SendAttachment => FieldValue::Scalar(mail.send_attachment.into()),
                Attr::Subject => FieldValue::Scalar(mail.subject.clone()),
                Attr::Sender => FieldValue::Scalar(mail.sender.clone()),
                Attr::AttachmentFileName => FieldValue::Scalar(mail.attachment_file_name.clone()),
                Attr::BodyFile => FieldValue::Scalar(mail.body_file.clone()),
                _ => FieldValue::Absent,
            },
            None => FieldValue::Absent,
        },
        (Node::UploadSettings(i), attr) => {
            match run(i).and_then(|r| r.upload_settings.as_ref()) {
                Some(upload) => match attr {
                    Attr::Enabled => FieldValue::Scalar(upload.enabled.into()),
                    Attr::FileName => FieldValue::Scalar(upload.file_name.clone()),
                    _ => FieldValue::Absent,
                },
                None => FieldValue::Absent,
            }
        }

        _ => FieldValue::Absent,
    }
}

fn scalar_mut(doc: &mut JobDocument, owner: Node, attr: Attr) -> Option<&mut Value> {
    match owner {
        Node::MailSettings(i) => {
            let mail = doc.runs_mut().get_mut(i)?.mail_settings.as_mut()?;
            match attr {
                Attr::Subject => Some(&mut mail.subject),
                Attr::Sender => Some(&mut mail.sender),
                Attr::AttachmentFileName => Some(&mut mail.attachment_file_name),
                Attr::BodyFile => Some(&mut mail.body_file),
                _ => None,
            }
        }
        Node::UploadSettings(i) => {
            let upload = doc.runs_mut().get_mut(i)?.upload_settings.as_mut()?;
            match attr {
                Attr::FileName => Some(&mut upload.file_name),
                _ => None,
            }
        }
        _ => None,
    }
}

fn sequence_mut(doc: &mut JobDocument, owner: Node, attr: Attr) -> Option<&mut Vec<Value>> {
    match (owner, attr) {
        (Node::Document, Attr::Arguments) => Some(&mut doc.arguments),
        (Node::Run(i), Attr::Arguments) => Some(&mut doc.runs_mut().get_mut(i)?.arguments),
        _ => None,
    }
}

fn mapping_mut(doc: &mut JobDocument, owner: Node, attr: Attr) -> Option<&mut Variables> {
    match (owner, attr) {
        (Node::Document, Attr::GlobalVariables) => Some(&mut doc.global_variables),
        (Node::Run(i), Attr::Variables) => Some(&mut doc.runs_mut().get_mut(i)?.variables),
        _ => None,
    }
}

/// Write `value` back into the document at `slot`.
pub fn write_field(
    doc: &mut JobDocument,
    path: &str,
    slot: &Slot,
    value: FieldValue,
) -> ConfigResult<()> {
    let found = value.kind();
    let written = match (*slot, value) {
        (Slot::Field { owner, attr }, FieldValue::Scalar(v)) => scalar_mut(doc, owner, attr)
            .map(|target| *target = v)
            .is_some(),
        (Slot::Field { owner, attr }, FieldValue::Sequence(v)) => {
            sequence_mut(doc, owner, attr).map(|target| *target = v).is_some()
        }
        (Slot::Field { owner, attr }, FieldValue::Mapping(v)) => {
            mapping_mut(doc, owner, attr).map(|target| *target = v).is_some()
        }
        (Slot::Item { owner, attr, index }, FieldValue::Scalar(v)) => {
            sequence_mut(doc, owner, attr)
                .and_then(|seq| seq.get_mut(index))
                .map(|target| *target = v)
                .is_some()
        }
        _ => false,
    };

    if written {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedFieldValueType {
            path: path.to_string(),
            found: format!("cannot write {} to {:?}", found, slot),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_path::FieldPath;
    use jobcfg_core::{RawValue, Record};

    fn doc() -> JobDocument {
        let run = |name: &str, with_mail: bool| {
            let mut record = Record::new()
                .with("name", name)
                .with("arguments", RawValue::list(["--a", "--b"]))
                .with("variables", Record::new().with("x", "1"));
            if with_mail {
                record.insert(
                    "mail_settings",
                    Record::new()
                        .with("subject", format!("subject-{}", name))
                        .with("sender", "bot"),
                );
            }
            record
        };
        let record = Record::new()
            .with("job_name", "job")
            .with("command_type", "REVIEWSYNC")
            .with("arguments", RawValue::list(["--debug"]))
            .with("global_variables", Record::new().with("a", "x"))
            .with(
                "runs",
                RawValue::list([run("r1", true), run("r2", false), run("r3", true)]),
            );
        JobDocument::from_record(&record).unwrap()
    }

    fn resolve(doc: &JobDocument, path: &str) -> ConfigResult<ResolvedField> {
        resolve_field(doc, &FieldPath::parse(path)?.instance(None)?)
    }

    #[test]
    fn test_plain_attribute() {
        let doc = doc();
        let resolved = resolve(&doc, "global_variables").unwrap();
        assert_eq!(resolved.name, "global_variables");
        match resolved.target {
            Target::Single {
                parent,
                value: FieldValue::Mapping(vars),
                ..
            } => {
                assert_eq!(parent, Some(Node::Document));
                assert_eq!(vars.len(), 1);
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_over_runs() {
        let doc = doc();
        let resolved = resolve(&doc, "runs[].arguments").unwrap();
        match resolved.target {
            Target::Broadcast {
                parents, values, ..
            } => {
                assert_eq!(
                    parents,
                    vec![
                        Some(Node::Run(0)),
                        Some(Node::Run(1)),
                        Some(Node::Run(2))
                    ]
                );
                assert!(values
                    .iter()
                    .all(|v| matches!(v, FieldValue::Sequence(s) if s.len() == 2)));
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_marks_missing_sections_absent() {
        let doc = doc();
        let resolved = resolve(&doc, "runs[].mail_settings.subject").unwrap();
        let Target::Broadcast { values, .. } = resolved.target else {
            panic!("expected broadcast");
        };
        assert!(matches!(values[0], FieldValue::Scalar(_)));
        assert!(matches!(values[1], FieldValue::Absent));
        assert!(matches!(values[2], FieldValue::Scalar(_)));
    }

    #[test]
    fn test_indexed_segment() {
        let doc = doc();
        let resolved = resolve(&doc, "runs[2].mail_settings.subject").unwrap();
        match resolved.target {
            Target::Single {
                parent,
                value: FieldValue::Scalar(v),
                ..
            } => {
                assert_eq!(parent, Some(Node::MailSettings(2)));
                assert_eq!(v.to_string(), "subject-r3");
            }
            other => panic!("unexpected target: {:?}", other),
        }

        let resolved = resolve(&doc, "runs[0].arguments[1]").unwrap();
        assert!(matches!(
            resolved.target,
            Target::Single { value: FieldValue::Scalar(ref v), .. } if v.to_string() == "--b"
        ));
    }

    #[test]
    fn test_unresolvable_paths() {
        let doc = doc();
        for path in [
            "nope",
            "runs[].nope",
            "runs[7].arguments",
            "runs[1].mail_settings.subject",
            "global_variables.a",
        ] {
            assert!(
                matches!(resolve(&doc, path), Err(ConfigError::UnresolvableFieldPath(_))),
                "expected '{}' to be unresolvable",
                path
            );
        }
    }

    #[test]
    fn test_repeat_on_non_sequence_is_inconsistent() {
        let doc = doc();
        assert!(matches!(
            resolve(&doc, "global_variables[]"),
            Err(ConfigError::InconsistentFieldPath { .. })
        ));
    }

    #[test]
    fn test_repeat_on_generator_is_inconsistent() {
        let record = Record::new()
            .with("job_name", "job")
            .with("command_type", "REVIEWSYNC")
            .with("runs", RawValue::generator("later", |_| Ok(Vec::new())));
        let doc = JobDocument::from_record(&record).unwrap();
        assert!(matches!(
            resolve(&doc, "runs[].arguments"),
            Err(ConfigError::InconsistentFieldPath { .. })
        ));
    }

    #[test]
    fn test_write_back() {
        let mut doc = doc();
        let resolved = resolve(&doc, "runs[0].mail_settings.subject").unwrap();
        let Target::Single { slot, .. } = resolved.target else {
            panic!("expected single target");
        };
        write_field(
            &mut doc,
            "runs[0].mail_settings.subject",
            &slot,
            FieldValue::Scalar("new".into()),
        )
        .unwrap();
        let subject = &doc.runs()[0].mail_settings.as_ref().unwrap().subject;
        assert_eq!(subject.to_string(), "new");

        let resolved = resolve(&doc, "job_name").unwrap();
        let Target::Single { slot, .. } = resolved.target else {
            panic!("expected single target");
        };
        let err = write_field(&mut doc, "job_name", &slot, FieldValue::Scalar("x".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFieldValueType { .. }));
    }
}
