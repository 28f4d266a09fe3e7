//! Evaluation context - values visible to step expressions

use std::collections::HashMap;
use std::path::PathBuf;

/// Values available while rendering a step
///
/// Properties are stored flattened under their dotted path
/// (`steps.cache.outputs.cache-hit`, `runner.os`, `env.CI`), so lookups
/// never need to walk nested maps.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    values: HashMap<String, String>,

    /// Directory `hashFiles` resolves patterns against
    pub workspace: Option<PathBuf>,

    /// Whether an earlier, non-exempt step failed
    pub job_failed: bool,

    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Add every entry of an env map under `env.<NAME>`
    pub fn extend_env<'a>(&mut self, env: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in env {
            self.set(format!("env.{}", key), value.clone());
        }
    }

    /// Record a finished step's outcome and outputs under `steps.<id>`
    pub fn record_step<'a>(
        &mut self,
        step_id: &str,
        outcome: &str,
        outputs: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) {
        self.set(format!("steps.{}.outcome", step_id), outcome);
        self.set(format!("steps.{}.conclusion", step_id), outcome);
        for (name, value) in outputs {
            self.set(format!("steps.{}.outputs.{}", step_id, name), value.clone());
        }
    }
}
