//! Replaces deferred values at declared field paths with their evaluated literals.

use jobcfg_core::{JobDocument, Value};
use tracing::{debug, warn};

use crate::field_path::FieldPath;
use crate::resolver::{resolve_field, write_field, FieldValue, Node, ResolvedField, Slot, Target};
use crate::variables::{Scope, VariableResolver};
use crate::{ConfigError, ConfigResult};

/// Substitute every field in `paths`, in order.
pub fn substitute_fields(
    doc: &mut JobDocument,
    vars: &VariableResolver,
    paths: &[&str],
) -> ConfigResult<()> {
    for raw in paths {
        let path = FieldPath::parse(raw)?;
        substitute_field(doc, vars, &path)?;
    }
    Ok(())
}

/// Substitute one field path, broadcasting over its repeat marker if it has one.
pub fn substitute_field(
    doc: &mut JobDocument,
    vars: &VariableResolver,
    path: &FieldPath,
) -> ConfigResult<()> {
    let ResolvedField { path: raw, name, target } = resolve_field(doc, &path.instance(None)?)?;

    match target {
        Target::Single {
            parent,
            slot,
            value,
        } => substitute_single(doc, vars, &raw, &name, parent, &slot, value),
        Target::Broadcast {
            parents,
            slots,
            values,
        } => {
            let scalars = values
                .iter()
                .all(|v| matches!(v, FieldValue::Scalar(_) | FieldValue::Absent));
            let containers = values.iter().all(|v| {
                matches!(
                    v,
                    FieldValue::Sequence(_) | FieldValue::Mapping(_) | FieldValue::Absent
                )
            });

            if scalars {
                for ((parent, slot), value) in parents.into_iter().zip(&slots).zip(values) {
                    let FieldValue::Scalar(value) = value else {
                        continue;
                    };
                    let scope = Scope::for_field(&name, parent);
                    let lit = vars.evaluate(doc, &value, scope, None)?;
                    write_field(doc, &raw, slot, FieldValue::Scalar(lit.into()))?;
                }
                Ok(())
            } else if containers {
                for (idx, value) in values.iter().enumerate() {
                    if matches!(value, FieldValue::Absent) {
                        continue;
                    }
                    let instance = path.instance(Some(idx))?;
                    let resolved = resolve_field(doc, &instance)?;
                    let Target::Single {
                        parent,
                        slot,
                        value,
                    } = resolved.target
                    else {
                        return Err(ConfigError::InconsistentFieldPath {
                            path: resolved.path,
                            message: "indexed path still broadcasts".to_string(),
                        });
                    };
                    substitute_single(doc, vars, &resolved.path, &name, parent, &slot, value)?;
                }
                Ok(())
            } else {
                Err(ConfigError::UnsupportedFieldValueType {
                    path: raw,
                    found: "mixed element kinds".to_string(),
                })
            }
        }
    }
}

fn substitute_single(
    doc: &mut JobDocument,
    vars: &VariableResolver,
    path: &str,
    name: &str,
    parent: Option<Node>,
    slot: &Slot,
    value: FieldValue,
) -> ConfigResult<()> {
    let scope = Scope::for_field(name, parent);
    debug!(path = %path, scope = %scope, "Substituting field");

    match value {
        FieldValue::Sequence(values) => {
            let resolved = values
                .iter()
                .map(|v| Ok(Value::Literal(vars.evaluate(doc, v, scope, None)?)))
                .collect::<ConfigResult<Vec<_>>>()?;
            write_field(doc, path, slot, FieldValue::Sequence(resolved))
        }
        FieldValue::Mapping(entries) => {
            let mut current = entries.clone();
            for (key, value) in entries.iter() {
                let lit = vars.evaluate(doc, value, scope, Some(key))?;
                current.set(key, lit);
                write_field(doc, path, slot, FieldValue::Mapping(current.clone()))?;
            }
            Ok(())
        }
        FieldValue::Scalar(value @ Value::Deferred(_)) => {
            let lit = vars.evaluate(doc, &value, scope, None)?;
            if lit.is_truthy() {
                write_field(doc, path, slot, FieldValue::Scalar(lit.into()))
            } else {
                warn!(
                    path = %path,
                    value = %lit,
                    "Field resolved to a falsy value, leaving it unresolved"
                );
                Ok(())
            }
        }
        other => Err(ConfigError::UnsupportedFieldValueType {
            path: path.to_string(),
            found: other.kind().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use jobcfg_core::{Literal, RawValue, Record};

    fn var(name: &'static str) -> Value {
        Value::deferred(format!("var('{}')", name), move |ctx| ctx.var(name))
    }

    fn env(name: &'static str) -> Value {
        Value::deferred(format!("env('{}')", name), move |ctx| ctx.env(name).map(Literal::from))
    }

    fn run(name: &str, subject: Value, with_mail: bool) -> Record {
        let mut record = Record::new()
            .with("name", name)
            .with("arguments", RawValue::list([RawValue::from(var("branch"))]))
            .with("variables", Record::new().with("branch", format!("{}-branch", name)));
        if with_mail {
            record.insert(
                "mail_settings",
                Record::new().with("subject", subject).with("sender", "bot"),
            );
        }
        record
    }

    fn document(globals: Record, runs: Vec<Record>) -> JobDocument {
        let record = Record::new()
            .with("job_name", "job")
            .with("command_type", "REVIEWSYNC")
            .with("global_variables", globals)
            .with("runs", RawValue::list(runs));
        JobDocument::from_record(&record).unwrap()
    }

    fn resolver(env: Environment) -> VariableResolver {
        VariableResolver::new(env, Vec::new())
    }

    #[test]
    fn test_mapping_entries_resolved_in_order() {
        let mut doc = document(
            Record::new().with("a", "x").with("b", var("a")).with("c", var("b")),
            vec![run("r1", "s".into(), false)],
        );
        substitute_fields(&mut doc, &resolver(Environment::new()), &["global_variables"]).unwrap();

        let keys: Vec<&str> = doc.global_variables.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(doc.global_variables.iter().all(|(_, v)| !v.is_deferred()));
        assert_eq!(doc.global_variables.get("c").unwrap().to_string(), "x");
    }

    #[test]
    fn test_broadcast_scalars_leave_nothing_deferred() {
        let mut doc = document(
            Record::new().with("title", "Report"),
            vec![
                run("r1", var("title"), true),
                run("r2", "plain".into(), false),
                run("r3", var("title"), true),
            ],
        );
        substitute_fields(
            &mut doc,
            &resolver(Environment::new()),
            &["runs[].mail_settings.subject"],
        )
        .unwrap();

        for run in doc.runs() {
            if let Some(mail) = &run.mail_settings {
                assert!(!mail.subject.is_deferred());
                assert_eq!(mail.subject.to_string(), "Report");
            }
        }
    }

    #[test]
    fn test_broadcast_sequences_use_their_own_run_scope() {
        let mut doc = document(
            Record::new().with("branch", "global"),
            vec![run("r1", "s".into(), false), run("r2", "s".into(), false)],
        );
        substitute_fields(&mut doc, &resolver(Environment::new()), &["runs[].arguments"]).unwrap();

        assert_eq!(doc.runs()[0].arguments[0].to_string(), "r1-branch");
        assert_eq!(doc.runs()[1].arguments[0].to_string(), "r2-branch");
    }

    #[test]
    fn test_falsy_single_scalar_is_not_written_back_suspect() {
        let mut doc = document(
            Record::new(),
            vec![run("r1", env("EMPTY_SUBJECT"), true)],
        );
        let env = Environment::new().with("EMPTY_SUBJECT", "x");
        let vars = VariableResolver::new(env, Vec::new());

        // A truthy result is written back.
        substitute_fields(&mut doc, &vars, &["runs[0].mail_settings.subject"]).unwrap();
        assert!(!doc.runs()[0].mail_settings.as_ref().unwrap().subject.is_deferred());

        // A falsy result leaves the deferred value in place.
        let mut doc = document(
            Record::new().with("empty", ""),
            vec![run("r1", var("empty"), true)],
        );
        substitute_fields(&mut doc, &vars, &["runs[0].mail_settings.subject"]).unwrap();
        assert!(doc.runs()[0].mail_settings.as_ref().unwrap().subject.is_deferred());
    }

    #[test]
    fn test_literal_scalar_is_unsupported() {
        let mut doc = document(Record::new(), vec![run("r1", "plain".into(), true)]);
        let err = substitute_fields(
            &mut doc,
            &resolver(Environment::new()),
            &["runs[0].mail_settings.subject"],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFieldValueType { .. }));
    }

    #[test]
    fn test_unknown_variable_fails() {
        let mut doc = document(
            Record::new().with("a", var("missing")),
            vec![run("r1", "s".into(), false)],
        );
        let err = substitute_fields(&mut doc, &resolver(Environment::new()), &["global_variables"])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Core(jobcfg_core::Error::UnresolvedVariable { .. })
        ));
    }
}
