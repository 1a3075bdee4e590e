//! Process environment snapshot and environment variable validation.

use jobcfg_core::{CommandType, JobDocument};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use tracing::debug;

use crate::{ConfigError, ConfigResult};

/// Environment variables captured once at the start of a build.
///
/// Resolution reads from this snapshot instead of the live process environment, so a
/// build sees a consistent view and tests can inject their own values.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment. Entries that are not valid UTF-8 are
    /// skipped.
    pub fn from_process() -> Self {
        Self::from_os(std::env::vars_os())
    }

    fn from_os(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        vars.into_iter()
            .filter_map(|(name, value)| match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    debug!(env = ?name, "Skipping env var that is not valid UTF-8");
                    None
                }
            })
            .collect()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Whether `name` is set at all. An empty value still counts as set.
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Quote a value containing whitespace unless it already carries quotes or `name` is
/// exempt. Applying it twice gives the same result as applying it once.
pub fn sanitize(name: &str, value: &str, exceptions: &[String]) -> String {
    if exceptions.iter().any(|e| e == name) {
        debug!(env = %name, "Env var is exempt from sanitization");
        return value.to_string();
    }
    let has_quote = value.contains('\'') || value.contains('"');
    if value.contains(char::is_whitespace) && !has_quote {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Check declared env var names against the command's allow-list and make sure every
/// mandatory one is present in `env`.
pub fn validate_env(doc: &JobDocument, env: &Environment) -> ConfigResult<()> {
    let allowed: HashSet<&str> = doc.command_type.allowed_env_vars().into_iter().collect();

    let invalid: Vec<String> = doc
        .mandatory_env_vars
        .iter()
        .chain(doc.optional_env_vars.iter())
        .filter(|name| !allowed.contains(name.as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(invalid_declared(doc.command_type, invalid));
    }

    let missing: Vec<String> = doc
        .mandatory_env_vars
        .iter()
        .filter(|name| !env.contains(name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::MissingMandatoryEnvVar(missing));
    }

    debug!(
        mandatory = doc.mandatory_env_vars.len(),
        optional = doc.optional_env_vars.len(),
        "Environment variables validated"
    );
    Ok(())
}

fn invalid_declared(command: CommandType, names: Vec<String>) -> ConfigError {
    let mut valid: Vec<String> = command
        .allowed_env_vars()
        .into_iter()
        .map(String::from)
        .collect();
    valid.sort();
    ConfigError::InvalidEnvVarDeclared {
        command: command.to_string(),
        names,
        valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobcfg_core::{RawValue, Record};

    fn doc(mandatory: &[&str], optional: &[&str]) -> JobDocument {
        let record = Record::new()
            .with("job_name", "Reviewsync")
            .with("command_type", "REVIEWSYNC")
            .with("mandatory_env_vars", RawValue::list(mandatory.iter().copied()))
            .with("optional_env_vars", RawValue::list(optional.iter().copied()))
            .with("runs", RawValue::list([Record::new().with("name", "r")]));
        JobDocument::from_record(&record).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_entries_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let env = Environment::from_os([
            (OsString::from("GOOD"), OsString::from("value")),
            (OsString::from("BAD"), OsString::from_vec(vec![0xff, 0xfe])),
            (OsString::from_vec(vec![0xff]), OsString::from("x")),
        ]);
        assert_eq!(env.get("GOOD"), Some("value"));
        assert!(!env.contains("BAD"));
    }

    #[test]
    fn test_sanitize_quotes_whitespace() {
        assert_eq!(sanitize("BRANCHES", "a b", &[]), "\"a b\"");
        assert_eq!(sanitize("BRANCHES", "ab", &[]), "ab");
        assert_eq!(sanitize("BRANCHES", "'a b'", &[]), "'a b'");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for value in ["a b", "plain", "\"x y\"", "it's here", ""] {
            let once = sanitize("V", value, &[]);
            assert_eq!(sanitize("V", &once, &[]), once);
        }
    }

    #[test]
    fn test_sanitize_exception() {
        let exceptions = vec!["BRANCHES".to_string()];
        assert_eq!(sanitize("BRANCHES", "a b", &exceptions), "a b");
        assert_eq!(sanitize("OTHER", "a b", &exceptions), "\"a b\"");
    }

    #[test]
    fn test_invalid_env_var_names_are_all_listed() {
        let doc = doc(&["MAIL_ACC_USER", "NOT_A_VAR"], &["ALSO_BAD"]);
        let err = validate_env(&doc, &Environment::new()).unwrap_err();
        match err {
            ConfigError::InvalidEnvVarDeclared { command, names, valid } => {
                assert_eq!(command, "REVIEWSYNC");
                assert_eq!(names, vec!["NOT_A_VAR", "ALSO_BAD"]);
                assert!(valid.contains(&"MAIL_ACC_USER".to_string()));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_mandatory_env_var() {
        let doc = doc(&["MAIL_ACC_USER", "MAIL_ACC_PASSWORD"], &[]);
        let env = Environment::new().with("MAIL_ACC_USER", "bot");
        let err = validate_env(&doc, &env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingMandatoryEnvVar(ref names) if names == &["MAIL_ACC_PASSWORD"]
        ));
    }

    #[test]
    fn test_empty_mandatory_value_counts_as_present() {
        let doc = doc(&["MAIL_ACC_USER"], &[]);
        let env = Environment::new().with("MAIL_ACC_USER", "");
        assert!(validate_env(&doc, &env).is_ok());
    }
}
