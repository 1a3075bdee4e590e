//! Job declaration loading and resolution for jobcfg.
//!
//! This crate handles:
//! - Reading KDL job declarations (`job.kdl`)
//! - The expression and template language used for deferred values
//! - Field paths and their resolution against a job document
//! - Variable scoping, environment validation and sanitization
//! - The phased build that turns a declaration into a fully resolved document

pub mod environment;
pub mod error;
pub mod expr;
pub mod field_path;
pub mod job;
pub mod loader;
pub mod resolver;
pub mod substitution;
pub mod variables;

pub use environment::{sanitize, Environment};
pub use error::{ConfigError, ConfigResult};
pub use field_path::{FieldPath, FieldPathInstance, Segment, REPEAT_MARKER};
pub use job::JobConfigReader;
pub use loader::parse_declaration;
pub use resolver::{resolve_field, FieldValue, Node, ResolvedField, Target};
pub use substitution::substitute_fields;
pub use variables::{Scope, VariableResolver, JOB_START_DATE_FORMAT};
