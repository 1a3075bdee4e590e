//! Configuration loading and resolution errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Core(#[from] jobcfg_core::Error),

    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("invalid expression '{source_text}': {message}")]
    InvalidExpression {
        source_text: String,
        message: String,
    },

    #[error("invalid field path '{path}': {message}")]
    InvalidFieldPath { path: String, message: String },

    #[error("config object has no field for field path '{0}'")]
    UnresolvableFieldPath(String),

    #[error("inconsistent field path '{path}': {message}")]
    InconsistentFieldPath { path: String, message: String },

    #[error("unexpected value type at field path '{path}': {found}")]
    UnsupportedFieldValueType { path: String, found: String },

    #[error("section 'runs' must be defined and cannot be empty")]
    MissingRunsSection,

    #[error("invalid env vars for command '{command}': {names:?}. Valid: {valid:?}")]
    InvalidEnvVarDeclared {
        command: String,
        names: Vec<String>,
        valid: Vec<String>,
    },

    #[error("the following env vars are mandatory but they are not set: {0:?}")]
    MissingMandatoryEnvVar(Vec<String>),

    #[error("duplicate run names are not allowed: {0:?}")]
    DuplicateRunName(Vec<String>),

    #[error("variables cannot use the same name as built-in variables: {0:?}")]
    BuiltinVariableShadowed(Vec<String>),
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
