//! Error types for the jobcfg domain model and deferred evaluation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("cannot resolve variable '{name}' in: {context}")]
    UnresolvedVariable { name: String, context: String },

    #[error("the following env var is not set: {0}")]
    MissingEnvironmentVariable(String),

    #[error("cyclic variable reference: {0}")]
    CyclicVariableReference(String),

    #[error("expression failed: {0}")]
    Expression(String),

    #[error("field was not resolved to a literal: {0}")]
    UnresolvedField(String),
}

impl Error {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_offender() {
        let err = Error::UnresolvedVariable {
            name: "branch".to_string(),
            context: "global_variables".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot resolve variable 'branch' in: global_variables"
        );

        let err = Error::invalid_value("runs[0].name", "must be a literal string");
        assert_eq!(
            err.to_string(),
            "invalid value for runs[0].name: must be a literal string"
        );
    }
}
