//! Core domain types for the jobcfg configuration engine.
//!
//! This crate contains:
//! - Literal and deferred leaf values, and the context deferred values evaluate against
//! - The loosely-typed declaration tree produced by loaders
//! - The typed job document (runs, mail and upload settings)
//! - Command types and their environment variable allow-lists
//! - The resolved, execution-ready snapshot handed to consumers

pub mod command;
pub mod error;
pub mod job;
pub mod record;
pub mod resolved;
pub mod value;

pub use command::CommandType;
pub use error::{Error, Result};
pub use job::{JobDocument, MailSettings, Run, Runs, UploadSettings, Variables};
pub use record::{RawValue, Record, RunsGenerator};
pub use resolved::{
    ResolvedJob, ResolvedMailSettings, ResolvedRun, ResolvedUploadSettings, ResolvedVariables,
};
pub use value::{Deferred, EvalContext, Literal, Value};
