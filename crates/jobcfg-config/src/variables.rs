//! Variable scoping and evaluation of deferred values.
//!
//! Which variable map a `var(name)` call reads depends on the field being resolved:
//! - `global_variables`: the global map only
//! - `runs[i].variables`: the run's own map, then the global map
//! - `runs[i].arguments`: the run's own map, then the global map when the run value is
//!   absent or falsy
//! - anything else: the global map
//!
//! Built-in names (`JOB_START_DATE`) always win. A variable found in a map is evaluated in
//! the scope of that map, and every evaluation in progress sits on an active stack so
//! that a reference cycle fails instead of recursing forever.

use chrono::Local;
use jobcfg_core::job::{BUILT_IN_VARIABLES, JOB_START_DATE_KEY};
use jobcfg_core::{Error, EvalContext, JobDocument, Literal, Record, Result, RunsGenerator, Value};
use std::cell::RefCell;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use crate::environment::{sanitize, Environment};
use crate::resolver::Node;

/// Format of the job start date.
pub const JOB_START_DATE_FORMAT: &str = "%Y%m%d_%H%M%S";

static JOB_START_DATE: LazyLock<String> =
    LazyLock::new(|| Local::now().format(JOB_START_DATE_FORMAT).to_string());

/// The variable scope a field is resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    GlobalVariables,
    RunVariables(usize),
    RunArguments(usize),
    Other,
}

impl Scope {
    /// Derive the scope from the terminal attribute name and the node owning it.
    pub fn for_field(name: &str, parent: Option<Node>) -> Self {
        match (name, parent) {
            ("global_variables", Some(Node::Document)) => Scope::GlobalVariables,
            ("variables", Some(Node::Run(i))) => Scope::RunVariables(i),
            ("arguments", Some(Node::Run(i))) => Scope::RunArguments(i),
            _ => Scope::Other,
        }
    }

    fn qualify(&self, name: &str) -> String {
        match self {
            Scope::RunVariables(i) | Scope::RunArguments(i) => {
                format!("runs[{}].variables.{}", i, name)
            }
            Scope::GlobalVariables | Scope::Other => name.to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::GlobalVariables => write!(f, "global_variables"),
            Scope::RunVariables(i) => write!(f, "runs[{}].variables", i),
            Scope::RunArguments(i) => write!(f, "runs[{}].arguments", i),
            Scope::Other => write!(f, "global scope"),
        }
    }
}

/// Value of a built-in variable, if `name` is one.
pub fn builtin(name: &str) -> Option<Literal> {
    match name {
        JOB_START_DATE_KEY => Some(Literal::Str(JOB_START_DATE.clone())),
        _ => None,
    }
}

/// Names among `names` that collide with built-in variables.
pub fn shadowed_builtins<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .filter(|name| BUILT_IN_VARIABLES.contains(name))
        .map(String::from)
        .collect()
}

/// Evaluates deferred values against a document and an environment snapshot.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    env: Environment,
    sanitize_exceptions: Vec<String>,
}

impl VariableResolver {
    pub fn new(env: Environment, sanitize_exceptions: Vec<String>) -> Self {
        Self {
            env,
            sanitize_exceptions,
        }
    }

    /// Evaluate `value` in `scope`. `origin` names the variable being defined when the
    /// value is an entry of a variable map, so a self-reference is caught as a cycle.
    pub fn evaluate(
        &self,
        doc: &JobDocument,
        value: &Value,
        scope: Scope,
        origin: Option<&str>,
    ) -> Result<Literal> {
        let deferred = match value {
            Value::Literal(lit) => return Ok(lit.clone()),
            Value::Deferred(d) => d,
        };

        let stack = RefCell::new(Vec::new());
        if let Some(name) = origin {
            stack.borrow_mut().push(scope.qualify(name));
        }
        let ctx = ResolutionContext {
            doc,
            resolver: self,
            scope,
            stack: &stack,
            sanitize: true,
        };
        debug!(scope = %scope, expr = %deferred.source(), "Evaluating deferred value");
        deferred.evaluate(&ctx)
    }

    /// Invoke a runs generator in the global scope.
    ///
    /// Env values are read unsanitized here: generator items are split on whitespace,
    /// so quoting would leak into the generated run names.
    pub fn generate_runs(
        &self,
        doc: &JobDocument,
        generator: &RunsGenerator,
    ) -> Result<Vec<Record>> {
        let stack = RefCell::new(Vec::new());
        let ctx = ResolutionContext {
            doc,
            resolver: self,
            scope: Scope::Other,
            stack: &stack,
            sanitize: false,
        };
        generator.generate(&ctx)
    }

    fn env_value(&self, name: &str, sanitized: bool) -> Option<String> {
        let value = self.env.get(name).filter(|v| !v.is_empty())?;
        if sanitized {
            Some(sanitize(name, value, &self.sanitize_exceptions))
        } else {
            Some(value.to_string())
        }
    }
}

/// The [`EvalContext`] handed to deferred closures.
struct ResolutionContext<'a> {
    doc: &'a JobDocument,
    resolver: &'a VariableResolver,
    scope: Scope,
    stack: &'a RefCell<Vec<String>>,
    sanitize: bool,
}

impl<'a> ResolutionContext<'a> {
    fn global(&self, name: &str) -> Result<(Scope, &'a Value)> {
        self.doc
            .global_variables
            .get(name)
            .map(|v| (Scope::GlobalVariables, v))
            .ok_or_else(|| Error::UnresolvedVariable {
                name: name.to_string(),
                context: self.scope.to_string(),
            })
    }

    fn run_var(&self, run: usize, name: &str) -> Option<(Scope, &'a Value)> {
        self.doc
            .runs()
            .get(run)
            .and_then(|r| r.variables.get(name))
            .map(|v| (Scope::RunVariables(run), v))
    }

    /// Evaluate a variable's value in the scope of the map it was found in.
    fn resolve_entry(&self, scope: Scope, name: &str, value: &Value) -> Result<Literal> {
        let deferred = match value {
            Value::Literal(lit) => return Ok(lit.clone()),
            Value::Deferred(d) => d,
        };

        let key = scope.qualify(name);
        {
            let mut stack = self.stack.borrow_mut();
            if let Some(start) = stack.iter().position(|k| *k == key) {
                let mut chain: Vec<String> = stack[start..].to_vec();
                chain.push(key);
                return Err(Error::CyclicVariableReference(chain.join(" -> ")));
            }
            stack.push(key);
        }

        let ctx = ResolutionContext {
            doc: self.doc,
            resolver: self.resolver,
            scope,
            stack: self.stack,
            sanitize: self.sanitize,
        };
        let result = deferred.evaluate(&ctx);
        self.stack.borrow_mut().pop();
        result
    }
}

impl EvalContext for ResolutionContext<'_> {
    fn var(&self, name: &str) -> Result<Literal> {
        if let Some(value) = builtin(name) {
            return Ok(value);
        }
        debug!(variable = %name, scope = %self.scope, "Resolving variable");

        match self.scope {
            Scope::GlobalVariables | Scope::Other => {
                let (scope, value) = self.global(name)?;
                self.resolve_entry(scope, name, value)
            }
            Scope::RunVariables(run) => {
                let (scope, value) = match self.run_var(run, name) {
                    Some(found) => found,
                    None => self.global(name)?,
                };
                self.resolve_entry(scope, name, value)
            }
            Scope::RunArguments(run) => {
                if let Some((scope, value)) = self.run_var(run, name) {
                    let resolved = self.resolve_entry(scope, name, value)?;
                    if resolved.is_truthy() {
                        return Ok(resolved);
                    }
                }
                let (scope, value) = self.global(name)?;
                self.resolve_entry(scope, name, value)
            }
        }
    }

    fn env(&self, name: &str) -> Result<String> {
        self.resolver
            .env_value(name, self.sanitize)
            .ok_or_else(|| Error::MissingEnvironmentVariable(name.to_string()))
    }

    fn env_or_default(&self, name: &str, default: Literal) -> Result<Literal> {
        Ok(self
            .resolver
            .env_value(name, self.sanitize)
            .map(Literal::Str)
            .unwrap_or(default))
    }

    fn job_start_date(&self) -> String {
        JOB_START_DATE.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobcfg_core::RawValue;

    fn var(name: &'static str) -> Value {
        Value::deferred(format!("var('{}')", name), move |ctx| ctx.var(name))
    }

    fn document(globals: Record, run_vars: Record) -> JobDocument {
        let record = Record::new()
            .with("job_name", "job")
            .with("command_type", "REVIEWSYNC")
            .with("global_variables", globals)
            .with(
                "runs",
                RawValue::list([Record::new().with("name", "r1").with("variables", run_vars)]),
            );
        JobDocument::from_record(&record).unwrap()
    }

    fn resolver() -> VariableResolver {
        VariableResolver::new(Environment::new(), Vec::new())
    }

    #[test]
    fn test_scope_for_field() {
        assert_eq!(
            Scope::for_field("global_variables", Some(Node::Document)),
            Scope::GlobalVariables
        );
        assert_eq!(
            Scope::for_field("variables", Some(Node::Run(2))),
            Scope::RunVariables(2)
        );
        assert_eq!(
            Scope::for_field("arguments", Some(Node::Run(0))),
            Scope::RunArguments(0)
        );
        assert_eq!(
            Scope::for_field("arguments", Some(Node::Document)),
            Scope::Other
        );
        assert_eq!(
            Scope::for_field("subject", Some(Node::MailSettings(0))),
            Scope::Other
        );
    }

    #[test]
    fn test_global_chain_resolves() {
        let doc = document(
            Record::new().with("a", "x").with("b", var("a")),
            Record::new(),
        );
        let value = doc.global_variables.get("b").unwrap();
        let lit = resolver()
            .evaluate(&doc, value, Scope::GlobalVariables, Some("b"))
            .unwrap();
        assert_eq!(lit, Literal::from("x"));
    }

    #[test]
    fn test_missing_variable_in_global_scope() {
        let doc = document(Record::new(), Record::new());
        let err = resolver()
            .evaluate(&doc, &var("nope"), Scope::GlobalVariables, None)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedVariable { ref name, ref context }
            if name == "nope" && context == "global_variables"));
    }

    #[test]
    fn test_run_arguments_fall_back_to_global_on_falsy() {
        let doc = document(
            Record::new().with("branch", "global-branch").with("mode", "global-mode"),
            Record::new().with("branch", "").with("mode", "run-mode"),
        );
        let r = resolver();
        assert_eq!(
            r.evaluate(&doc, &var("branch"), Scope::RunArguments(0), None).unwrap(),
            Literal::from("global-branch")
        );
        assert_eq!(
            r.evaluate(&doc, &var("mode"), Scope::RunArguments(0), None).unwrap(),
            Literal::from("run-mode")
        );
        // Plain run variables keep the falsy run value.
        assert_eq!(
            r.evaluate(&doc, &var("branch"), Scope::RunVariables(0), None).unwrap(),
            Literal::from("")
        );
    }

    #[test]
    fn test_builtin_wins() {
        let doc = document(Record::new(), Record::new());
        let lit = resolver()
            .evaluate(&doc, &var(JOB_START_DATE_KEY), Scope::Other, None)
            .unwrap();
        let date = lit.to_string();
        assert_eq!(date.len(), "20240101_120000".len());
        let resolved = resolver()
            .evaluate(&doc, &var(JOB_START_DATE_KEY), Scope::Other, None)
            .unwrap();
        assert_eq!(date, resolved.to_string());
    }

    #[test]
    fn test_cycle_is_detected() {
        let doc = document(
            Record::new().with("varA", var("varB")).with("varB", var("varA")),
            Record::new(),
        );
        let value = doc.global_variables.get("varA").unwrap();
        let err = resolver()
            .evaluate(&doc, value, Scope::GlobalVariables, Some("varA"))
            .unwrap_err();
        assert!(matches!(err, Error::CyclicVariableReference(ref chain)
            if chain == "varA -> varB -> varA"));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let doc = document(Record::new().with("a", var("a")), Record::new());
        let value = doc.global_variables.get("a").unwrap();
        assert!(matches!(
            resolver().evaluate(&doc, value, Scope::GlobalVariables, Some("a")),
            Err(Error::CyclicVariableReference(_))
        ));
    }

    #[test]
    fn test_env_is_sanitized() {
        let doc = document(Record::new(), Record::new());
        let resolver = VariableResolver::new(
            Environment::new().with("BRANCHES", "a b").with("EMPTY", ""),
            Vec::new(),
        );
        let env = Value::deferred("env('BRANCHES')", |ctx| ctx.env("BRANCHES").map(Literal::from));
        assert_eq!(
            resolver.evaluate(&doc, &env, Scope::Other, None).unwrap(),
            Literal::from("\"a b\"")
        );

        let empty = Value::deferred("env('EMPTY')", |ctx| ctx.env("EMPTY").map(Literal::from));
        assert!(matches!(
            resolver.evaluate(&doc, &empty, Scope::Other, None),
            Err(Error::MissingEnvironmentVariable(_))
        ));

        let default = Value::deferred("env_or_default('UNSET', true)", |ctx| {
            ctx.env_or_default("UNSET", Literal::Bool(true))
        });
        assert_eq!(
            resolver.evaluate(&doc, &default, Scope::Other, None).unwrap(),
            Literal::Bool(true)
        );
    }

    #[test]
    fn test_shadowed_builtins() {
        assert_eq!(
            shadowed_builtins(["a", JOB_START_DATE_KEY].into_iter()),
            vec![JOB_START_DATE_KEY.to_string()]
        );
    }
}
