//! Load-time error types

use thiserror::Error;

/// Errors raised while loading a workflow definition
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read workflow file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' needs non-existent job '{needs}'")]
    UnknownNeed { job: String, needs: String },

    #[error("Cycle detected in job dependencies involving job '{0}'")]
    Cycle(String),

    #[error("Job '{job}' step {index}: {message}")]
    InvalidStep {
        job: String,
        index: usize,
        message: String,
    },

    #[error("Invalid expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error("Invalid trigger: {0}")]
    Trigger(String),

    #[error("Workflow defines no jobs")]
    NoJobs,
}

impl ParseError {
    pub(crate) fn step(job: &str, index: usize, message: impl Into<String>) -> Self {
        ParseError::InvalidStep {
            job: job.to_string(),
            index,
            message: message.into(),
        }
    }
}
