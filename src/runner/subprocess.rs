//! Subprocess step runner - runs commands through the host shell

use crate::runner::{
    parse_key_values, ActionKind, Environment, Invocation, RunnerConfig, RunnerError, StepOutput,
    StepRunner,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Runs `run:` steps as shell subprocesses and implements the built-in actions
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    config: RunnerConfig,
}

impl SubprocessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn truncate(&self, mut log: String) -> String {
        let max = self.config.max_log_bytes;
        if log.len() > max {
            let mut cut = log.len() - max;
            while !log.is_char_boundary(cut) {
                cut += 1;
            }
            log = format!("[... {} bytes truncated ...]\n{}", cut, &log[cut..]);
        }
        log
    }
}

async fn read_values(path: &Path) -> BTreeMap<String, String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_key_values(&content),
        Err(_) => BTreeMap::new(),
    }
}

/// Copy `source` into `dest`, skipping `dest` itself when nested inside `source`
fn copy_source(source: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        if dest.starts_with(&path) {
            continue;
        }

        let target = dest.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            copied += copy_source(&path, &target)?;
        } else if file_type.is_file() {
            std::fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl StepRunner for SubprocessRunner {
    async fn run_command(
        &self,
        command: &str,
        environment: &Environment,
        invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        let (program, args) = self
            .config
            .shell
            .split_first()
            .ok_or_else(|| RunnerError::UnsupportedAction("empty shell".to_string()))?;

        let step_files = Uuid::new_v4();
        let output_file = environment.temp_dir.join(format!("output-{}", step_files));
        let env_file = environment.temp_dir.join(format!("env-{}", step_files));

        debug!(
            "Running `{}` in {}",
            command.lines().next().unwrap_or_default(),
            invocation.working_dir.display()
        );

        let output = Command::new(program)
            .args(args)
            .arg(command)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .env("GITHUB_OUTPUT", &output_file)
            .env("GITHUB_ENV", &env_file)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            debug!("Command exited with code {}", exit_code);
        }

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        let outputs = read_values(&output_file).await;
        let env_updates = read_values(&env_file).await;
        for file in [&output_file, &env_file] {
            let _ = tokio::fs::remove_file(file).await;
        }

        Ok(StepOutput {
            exit_code,
            log: self.truncate(log),
            outputs,
            env_updates,
        })
    }

    async fn run_action(
        &self,
        action: &ActionKind,
        inputs: &BTreeMap<String, String>,
        environment: &Environment,
        _invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        match action {
            ActionKind::Checkout => {
                if environment.source == environment.workspace {
                    return Ok(StepOutput::success("Workspace is the source directory\n"));
                }

                let source = environment.source.clone();
                let workspace = environment.workspace.clone();
                let copied = tokio::task::spawn_blocking(move || copy_source(&source, &workspace))
                    .await
                    .map_err(|e| RunnerError::Io(std::io::Error::other(e)))??;

                Ok(StepOutput::success(format!(
                    "Checked out {} files from {}\n",
                    copied,
                    environment.source.display()
                )))
            }
            ActionKind::Setup { tool } => {
                let version_key = format!("{}-version", tool);
                let mut output = StepOutput::default();

                match inputs.get(&version_key) {
                    Some(version) => {
                        let var = format!("{}_VERSION", tool.to_uppercase().replace('-', "_"));
                        output.log = format!("Using host {} for requested version {}\n", tool, version);
                        output.outputs.insert(version_key, version.clone());
                        output.env_updates.insert(var, version.clone());
                    }
                    None => {
                        output.log = format!("Using host {}\n", tool);
                    }
                }

                Ok(output)
            }
            ActionKind::Other { uses } => {
                warn!("Action '{}' is not supported by the local runner", uses);
                Err(RunnerError::UnsupportedAction(uses.clone()))
            }
        }
    }
}
