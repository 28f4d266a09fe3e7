//! Step runners and job environments

pub mod config;
pub mod environment;
pub mod subprocess;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub use config::RunnerConfig;
pub use environment::{Environment, EnvironmentProvider, LocalEnvironmentProvider, ProvisionError};
pub use subprocess::SubprocessRunner;

/// Error types for runner operations
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A built-in or referenced action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Checkout,
    Setup { tool: String },
    Other { uses: String },
}

/// Everything a runner needs to execute one step
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Directory the step runs in
    pub working_dir: PathBuf,

    /// Full environment: job environment plus step `env:`
    pub env: BTreeMap<String, String>,
}

/// What a finished step reports back
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub exit_code: i32,

    /// Captured stdout and stderr
    pub log: String,

    /// Values written to `$GITHUB_OUTPUT`
    pub outputs: BTreeMap<String, String>,

    /// Values written to `$GITHUB_ENV`, applied to later steps
    pub env_updates: BTreeMap<String, String>,
}

impl StepOutput {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            log: log.into(),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run a shell command; exit code 0 is success
    async fn run_command(
        &self,
        command: &str,
        environment: &Environment,
        invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError>;

    /// Run a referenced action with rendered inputs
    async fn run_action(
        &self,
        action: &ActionKind,
        inputs: &BTreeMap<String, String>,
        environment: &Environment,
        invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError>;
}

/// Parse `name=value` lines as written to `$GITHUB_OUTPUT` / `$GITHUB_ENV`
///
/// Also accepts the multi-line form `name<<DELIM ... DELIM`.
pub fn parse_key_values(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if let Some((name, delimiter)) = line.split_once("<<") {
            let mut value = Vec::new();
            for body in lines.by_ref() {
                if body == delimiter {
                    break;
                }
                value.push(body);
            }
            values.insert(name.trim().to_string(), value.join("\n"));
        } else if let Some((name, value)) = line.split_once('=') {
            if !name.trim().is_empty() {
                values.insert(name.trim().to_string(), value.to_string());
            }
        }
    }

    values
}
