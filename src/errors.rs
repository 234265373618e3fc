// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The trigger variants carry the exact user-facing wording; callers match
//! on the variant and print the `Display` form verbatim.

use thiserror::Error;

use crate::engine::{InterruptCause, TriggerResult};
use crate::types::{Principal, RunStatus};

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("No item named {0} found")]
    NotFound(String),

    #[error("Please login to access job {0}")]
    LoginRequired(String),

    #[error("{principal} is missing the Build permission")]
    Forbidden { principal: Principal, job: String },

    #[error("Job {job} does not declare a parameter named '{name}'")]
    UnknownParameter { job: String, name: String },

    #[error("Parameter '{0}' was supplied more than once")]
    DuplicateParameter(String),

    #[error(
        "Value for choice parameter '{name}' is '{value}', but valid choices are [{}]",
        .choices.join(", ")
    )]
    InvalidChoice {
        name: String,
        value: String,
        /// Allowed values, already sorted.
        choices: Vec<String>,
    },

    #[error("Parameter '{name}' expects a {expected} value but got '{value}'")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        value: String,
    },

    #[error("Failed to trigger build of {0}")]
    RejectedAtAdmission(String),

    #[error("Build of {0} was cancelled before it started")]
    QueueItemCancelled(String),

    #[error("{cause}")]
    Interrupted {
        cause: InterruptCause,
        /// Real terminal result of the target, when it finished before the
        /// cascade settled.
        result: Option<TriggerResult>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in job triggers: {0}")]
    JobCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TriggerError {
    /// Status the failing step reports for its orchestrator.
    pub fn status(&self) -> RunStatus {
        match self {
            TriggerError::Interrupted { cause, .. } => cause.status,
            _ => RunStatus::Failure,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TriggerError>;
