//! Builds a fully resolved job document from a declaration.

use jobcfg_core::{JobDocument, Record, Run, Runs, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::environment::{validate_env, Environment};
use crate::loader::parse_declaration;
use crate::substitution::substitute_fields;
use crate::variables::{shadowed_builtins, VariableResolver};
use crate::{ConfigError, ConfigResult};

/// Fields resolved before runs are known.
pub const GLOBAL_FIELDS: &[&str] = &["global_variables", "arguments"];

/// Fields resolved on every run.
pub const RUN_FIELDS: &[&str] = &[
    "runs[].mail_settings.subject",
    "runs[].mail_settings.sender",
    "runs[].mail_settings.attachment_file_name",
    "runs[].mail_settings.body_file",
    "runs[].upload_settings.file_name",
    "runs[].arguments",
    "runs[].variables",
];

/// Reads job declarations and resolves them against an environment snapshot.
#[derive(Debug, Clone)]
pub struct JobConfigReader {
    env: Environment,
}

impl JobConfigReader {
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    /// A reader over the current process environment.
    pub fn from_process_env() -> Self {
        Self::new(Environment::from_process())
    }

    pub fn read_from_file(&self, path: impl AsRef<Path>) -> ConfigResult<JobDocument> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Reading job declaration");
        let kdl = std::fs::read_to_string(path)?;
        self.read_from_str(&kdl)
    }

    pub fn read_from_str(&self, kdl: &str) -> ConfigResult<JobDocument> {
        let record = parse_declaration(kdl)?;
        self.read(&record)
    }

    /// Build and resolve a document. Any failure aborts the whole build.
    pub fn read(&self, record: &Record) -> ConfigResult<JobDocument> {
        let mut doc = JobDocument::from_record(record)?;
        info!(job = %doc.job_name, command = %doc.command_type, "Loaded job declaration");

        check_builtins(&doc)?;
        if let Runs::Static(runs) = &doc.runs {
            if runs.is_empty() {
                return Err(ConfigError::MissingRunsSection);
            }
            check_unique_names(runs)?;
        }
        validate_env(&doc, &self.env)?;

        let vars = VariableResolver::new(self.env.clone(), doc.env_sanitize_exceptions.clone());
        substitute_fields(&mut doc, &vars, GLOBAL_FIELDS)?;
        debug!(job = %doc.job_name, "Resolved global fields");

        if let Runs::Generated(generator) = &doc.runs {
            let records = vars.generate_runs(&doc, generator)?;
            let runs = records
                .iter()
                .enumerate()
                .map(|(idx, record)| Run::from_record(&format!("runs[{}]", idx), record))
                .collect::<jobcfg_core::Result<Vec<_>>>()?;
            if runs.is_empty() {
                return Err(ConfigError::MissingRunsSection);
            }
            check_unique_names(&runs)?;
            info!(job = %doc.job_name, runs = runs.len(), "Generated runs");
            doc.runs = Runs::Static(runs);
            check_builtins(&doc)?;
        }

        substitute_fields(&mut doc, &vars, RUN_FIELDS)?;
        finalize_arguments(&mut doc)?;

        info!(job = %doc.job_name, runs = doc.runs().len(), "Job configuration resolved");
        Ok(doc)
    }
}

fn check_builtins(doc: &JobDocument) -> ConfigResult<()> {
    let names = doc
        .global_variables
        .keys()
        .chain(doc.runs().iter().flat_map(|run| run.variables.keys()));
    let shadowed = shadowed_builtins(names);
    if shadowed.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::BuiltinVariableShadowed(shadowed))
    }
}

fn check_unique_names(runs: &[Run]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for run in runs {
        if !seen.insert(run.name.as_str()) && !duplicates.contains(&run.name) {
            duplicates.push(run.name.clone());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::DuplicateRunName(duplicates))
    }
}

/// Merge top-level arguments into every run, keyed by their first token.
///
/// Top-level arguments keep their order and run-only arguments are appended. A run
/// argument with the same key replaces the top-level one in place. Argument text is
/// kept exactly as written.
fn finalize_arguments(doc: &mut JobDocument) -> ConfigResult<()> {
    let common = literal_arguments("arguments", &doc.arguments)?;

    for (idx, run) in doc.runs_mut().iter_mut().enumerate() {
        let own = literal_arguments(&format!("runs[{}].arguments", idx), &run.arguments)?;

        let mut merged: Vec<(String, String)> = Vec::new();
        merge_arguments(&mut merged, &common, None);
        merge_arguments(&mut merged, &own, Some(run.name.as_str()));

        debug!(run = %run.name, arguments = merged.len(), "Merged arguments");
        run.arguments = merged.into_iter().map(|(_, arg)| Value::from(arg)).collect();
    }
    Ok(())
}

fn merge_arguments(merged: &mut Vec<(String, String)>, args: &[String], run: Option<&str>) {
    for arg in args {
        let Some(key) = arg.split_whitespace().next() else {
            continue;
        };

        match merged.iter_mut().find(|(k, _)| k.as_str() == key) {
            Some(entry) => {
                if let Some(run) = run {
                    warn!(run = %run, argument = %key, "Run argument overrides a job argument");
                }
                entry.1 = arg.clone();
            }
            None => merged.push((key.to_string(), arg.clone())),
        }
    }
}

fn literal_arguments(path: &str, args: &[Value]) -> ConfigResult<Vec<String>> {
    args.iter()
        .enumerate()
        .map(|(idx, arg)| match arg {
            Value::Literal(lit) => Ok(lit.to_string()),
            Value::Deferred(_) => Err(ConfigError::Core(jobcfg_core::Error::UnresolvedField(
                format!("{}[{}]", path, idx),
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobcfg_core::{Error, Literal, RawValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::Level;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn var(name: &'static str) -> Value {
        Value::deferred(format!("var('{}')", name), move |ctx| ctx.var(name))
    }

    fn env(name: &'static str) -> Value {
        Value::deferred(format!("env('{}')", name), move |ctx| {
            ctx.env(name).map(Literal::from)
        })
    }

    fn reader() -> JobConfigReader {
        JobConfigReader::new(Environment::new())
    }

    fn job(runs: impl Into<RawValue>) -> Record {
        Record::new()
            .with("job_name", "Reviewsync")
            .with("command_type", "REVIEWSYNC")
            .with("runs", runs)
    }

    fn run(name: &str) -> Record {
        Record::new().with("name", name)
    }

    fn arguments_of(doc: &JobDocument, idx: usize) -> Vec<String> {
        doc.runs()[idx]
            .arguments
            .iter()
            .map(|a| a.to_string())
            .collect()
    }

    #[test]
    fn test_global_variable_chain() {
        let record = job(RawValue::list([run("r1")])).with(
            "global_variables",
            Record::new().with("a", "x").with("b", var("a")),
        );
        let doc = reader().read(&record).unwrap();
        assert_eq!(doc.global_variables.get("b").unwrap().to_string(), "x");
    }

    #[test]
    fn test_run_argument_uses_run_variable() {
        let record = job(RawValue::list([run("r1")
            .with("variables", Record::new().with("branch", "main"))
            .with("arguments", RawValue::list([RawValue::from(var("branch"))]))]))
        .with("global_variables", Record::new().with("branch", "global"));

        let doc = reader().read(&record).unwrap();
        assert_eq!(arguments_of(&doc, 0), vec!["main"]);
    }

    #[test]
    fn test_run_argument_falls_back_to_global_variable() {
        let record = job(RawValue::list([run("r1")
            .with("variables", Record::new())
            .with("arguments", RawValue::list([RawValue::from(var("a"))]))]))
        .with("global_variables", Record::new().with("a", "x"));

        let doc = reader().read(&record).unwrap();
        assert_eq!(arguments_of(&doc, 0), vec!["x"]);
    }

    #[test]
    fn test_unset_mandatory_env_var_fails() {
        let record = job(RawValue::list([run("r1")]))
            .with("mandatory_env_vars", RawValue::list(["MAIL_ACC_USER"]));
        let err = reader().read(&record).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMandatoryEnvVar(ref names)
            if names == &["MAIL_ACC_USER"]));
    }

    #[test]
    fn test_generated_runs() {
        let generator = RawValue::generator("two runs", |_| {
            Ok(vec![
                Record::new().with("name", "r1"),
                Record::new().with("name", "r2"),
            ])
        });
        let doc = reader().read(&job(generator)).unwrap();

        let names: Vec<&str> = doc.runs().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["r1", "r2"]);
        assert!(!doc.has_generated_runs());
    }

    #[test]
    fn test_generated_duplicate_names_fail() {
        let generator = RawValue::generator("dupes", |_| {
            Ok(vec![
                Record::new().with("name", "r1"),
                Record::new().with("name", "r1"),
            ])
        });
        let err = reader().read(&job(generator)).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRunName(ref names) if names == &["r1"]));
    }

    #[test]
    fn test_static_duplicate_names_fail() {
        let record = job(RawValue::list([run("a"), run("b"), run("a")]));
        assert!(matches!(
            reader().read(&record),
            Err(ConfigError::DuplicateRunName(_))
        ));
    }

    #[test]
    fn test_env_is_quoted() {
        let record = job(RawValue::list([run("r1")]))
            .with("mandatory_env_vars", RawValue::list(["BRANCHES"]))
            .with("arguments", RawValue::list([RawValue::from(env("BRANCHES"))]));
        let reader = JobConfigReader::new(Environment::new().with("BRANCHES", "a b"));

        let doc = reader.read(&record).unwrap();
        assert_eq!(doc.arguments[0].to_string(), "\"a b\"");
    }

    #[test]
    fn test_cyclic_variables_fail() {
        let record = job(RawValue::list([run("r1")])).with(
            "global_variables",
            Record::new().with("varA", var("varB")).with("varB", var("varA")),
        );
        let err = reader().read(&record).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Core(Error::CyclicVariableReference(_))
        ));
    }

    #[test]
    fn test_missing_runs_section() {
        let record = Record::new()
            .with("job_name", "Reviewsync")
            .with("command_type", "REVIEWSYNC");
        assert!(matches!(
            reader().read(&record),
            Err(ConfigError::MissingRunsSection)
        ));

        let empty = RawValue::generator("none", |_| Ok(Vec::new()));
        assert!(matches!(
            reader().read(&job(empty)),
            Err(ConfigError::MissingRunsSection)
        ));
    }

    #[test]
    fn test_builtin_shadowing_fails() {
        let record = job(RawValue::list([run("r1")]))
            .with("global_variables", Record::new().with("JOB_START_DATE", "x"));
        assert!(matches!(
            reader().read(&record),
            Err(ConfigError::BuiltinVariableShadowed(_))
        ));

        let record = job(RawValue::list([
            run("r1").with("variables", Record::new().with("JOB_START_DATE", "x"))
        ]));
        assert!(matches!(
            reader().read(&record),
            Err(ConfigError::BuiltinVariableShadowed(_))
        ));
    }

    #[test]
    fn test_argument_merge_order_and_override() {
        let record = job(RawValue::list([
            run("r1").with("arguments", RawValue::list(["--b   2", "--c 3", ""])),
            run("r2"),
        ]))
        .with("arguments", RawValue::list(["--a 1", "--b 1"]));

        let doc = reader().read(&record).unwrap();
        assert_eq!(arguments_of(&doc, 0), vec!["--a 1", "--b   2", "--c 3"]);
        assert_eq!(arguments_of(&doc, 1), vec!["--a 1", "--b 1"]);
        assert_eq!(doc.runs()[0].arguments.len(), 3);
    }

    #[test]
    fn test_argument_merge_keeps_quoted_whitespace() {
        let branches = Value::deferred("--branches ${env('BRANCHES')}", |ctx| {
            ctx.env("BRANCHES")
                .map(|v| Literal::from(format!("--branches {}", v)))
        });
        let record = job(RawValue::list([
            run("r1").with("arguments", RawValue::list([RawValue::from(branches)]))
        ]))
        .with("mandatory_env_vars", RawValue::list(["BRANCHES"]))
        .with("arguments", RawValue::list(["--branches none"]));
        let reader = JobConfigReader::new(Environment::new().with("BRANCHES", "a  b\tc"));

        let doc = reader.read(&record).unwrap();
        assert_eq!(arguments_of(&doc, 0), vec!["--branches \"a  b\tc\""]);
    }

    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_argument_override_warns_once() {
        let record = job(RawValue::list([
            run("r1").with("arguments", RawValue::list(["--b 2", "--c 3"])),
            run("r2"),
        ]))
        .with("arguments", RawValue::list(["--a 1", "--b 1"]));

        let counter = WarnCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        tracing::subscriber::with_default(subscriber, || {
            reader().read(&record).unwrap();
        });
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let record = job(RawValue::list([run("r1")
            .with("variables", Record::new().with("x", var("g")))
            .with("arguments", RawValue::list([RawValue::from(var("x"))]))]))
        .with("global_variables", Record::new().with("g", "--flag"));

        let first = reader().read(&record).unwrap().to_resolved().unwrap();
        let second = reader().read(&record).unwrap().to_resolved().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_deferred_values_remain() {
        let record = job(RawValue::list([
            run("r1").with(
                "mail_settings",
                Record::new()
                    .with("subject", var("title"))
                    .with("sender", "bot")
                    .with("body_file", var("title")),
            ),
            run("r2").with(
                "upload_settings",
                Record::new().with("enabled", true).with("file_name", var("title")),
            ),
        ]))
        .with("global_variables", Record::new().with("title", "Report"));

        let resolved = reader().read(&record).unwrap().to_resolved().unwrap();
        assert_eq!(
            resolved.runs[0].mail_settings.as_ref().unwrap().subject,
            "Report"
        );
        assert_eq!(
            resolved.runs[1].upload_settings.as_ref().unwrap().file_name,
            "Report"
        );
    }

    #[test]
    fn test_read_from_str_with_generated_runs() {
        let kdl = r#"
job "Branch comparator" command="BRANCH_COMPARATOR"
global-variables {
    algorithm "simple"
}
generate-runs "simple" (expr)"env_or_default('ALGOS', 'grouped')" {
    run (tpl)"run-${item()}" {
        arguments { - (tpl)"--algorithm ${item()} --pos ${position()}" }
    }
}
"#;
        let reader = JobConfigReader::new(Environment::new().with("ALGOS", "grouped exact"));
        let doc = reader.read_from_str(kdl).unwrap();

        let names: Vec<&str> = doc.runs().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["run-simple", "run-grouped", "run-exact"]);
        assert_eq!(arguments_of(&doc, 2), vec!["--algorithm exact --pos 3"]);
    }
}
