//! Job execution environments

use crate::core::Job;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Raised when a job's environment cannot be prepared
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Source directory '{0}' does not exist")]
    MissingSource(PathBuf),

    #[error("Failed to prepare workspace '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No environment available for '{0}'")]
    Unsupported(String),
}

/// An isolated place for one job to run
#[derive(Debug, Clone)]
pub struct Environment {
    pub job_id: String,

    /// Normalized `runs-on` label, also the cache scope
    pub runs_on: String,

    /// Directory steps run in
    pub workspace: PathBuf,

    /// Checkout source
    pub source: PathBuf,

    /// Scratch directory for step output files
    pub temp_dir: PathBuf,

    /// Base variables every step sees
    pub vars: BTreeMap<String, String>,

    /// Whether the workspace was created for this job and should be removed
    owned: bool,
}

impl Environment {
    /// An environment that runs directly in `workspace`
    pub fn in_place(job_id: &str, runs_on: &str, workspace: &Path) -> Self {
        let temp_dir = std::env::temp_dir().join(format!("runway-{}-{}", job_id, Uuid::new_v4()));
        let vars = base_vars(job_id, runs_on, workspace, &temp_dir);
        Self {
            job_id: job_id.to_string(),
            runs_on: runs_on.to_string(),
            workspace: workspace.to_path_buf(),
            source: workspace.to_path_buf(),
            temp_dir,
            vars,
            owned: false,
        }
    }

    /// `runner.os` as exposed to expressions
    pub fn runner_os(&self) -> &'static str {
        runner_os()
    }
}

fn runner_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "Linux",
    }
}

fn base_vars(job_id: &str, runs_on: &str, workspace: &Path, temp_dir: &Path) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("CI".to_string(), "true".to_string());
    vars.insert("RUNWAY".to_string(), "true".to_string());
    vars.insert("RUNWAY_JOB".to_string(), job_id.to_string());
    vars.insert("RUNWAY_RUNS_ON".to_string(), runs_on.to_string());
    vars.insert("RUNNER_OS".to_string(), runner_os().to_string());
    vars.insert("RUNNER_TEMP".to_string(), temp_dir.display().to_string());
    vars.insert("GITHUB_WORKSPACE".to_string(), workspace.display().to_string());
    vars
}

/// Provides environments to jobs
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Prepare an environment for `job` within run `run_id`
    async fn provision(&self, run_id: Uuid, job: &Job) -> Result<Environment, ProvisionError>;

    /// Tear the environment down once the job is finished
    async fn release(&self, environment: Environment);

    /// Whether every job is handed the same workspace
    fn shares_workspace(&self) -> bool {
        false
    }
}

/// Runs jobs on the local machine
///
/// Each job gets `<root>/<run>/<job>` as its own workspace, with the root
/// defaulting to `<tmp>/runway`. [`run_in_source`](Self::run_in_source)
/// runs every job in the source directory itself instead.
#[derive(Debug, Clone)]
pub struct LocalEnvironmentProvider {
    source: PathBuf,
    workspace_root: PathBuf,
    in_place: bool,
    keep_workspaces: bool,
}

impl LocalEnvironmentProvider {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            workspace_root: std::env::temp_dir().join("runway"),
            in_place: false,
            keep_workspaces: false,
        }
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self.in_place = false;
        self
    }

    /// Run jobs directly in the source directory
    pub fn run_in_source(mut self) -> Self {
        self.in_place = true;
        self
    }

    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }
}

#[async_trait]
impl EnvironmentProvider for LocalEnvironmentProvider {
    async fn provision(&self, run_id: Uuid, job: &Job) -> Result<Environment, ProvisionError> {
        if !self.source.is_dir() {
            return Err(ProvisionError::MissingSource(self.source.clone()));
        }

        let (workspace, temp_dir, owned) = if self.in_place {
            (
                self.source.clone(),
                std::env::temp_dir().join(format!("runway-{}-{}", run_id, job.id)),
                false,
            )
        } else {
            let base = self.workspace_root.join(run_id.to_string());
            (base.join(&job.id), base.join(format!("{}.tmp", job.id)), true)
        };

        for dir in [&workspace, &temp_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ProvisionError::Workspace {
                    path: dir.clone(),
                    source,
                })?;
        }

        debug!("Provisioned {} for job '{}'", workspace.display(), job.id);

        let vars = base_vars(&job.id, &job.runs_on, &workspace, &temp_dir);
        Ok(Environment {
            job_id: job.id.clone(),
            runs_on: job.runs_on.clone(),
            workspace,
            source: self.source.clone(),
            temp_dir,
            vars,
            owned,
        })
    }

    async fn release(&self, environment: Environment) {
        if let Err(e) = tokio::fs::remove_dir_all(&environment.temp_dir).await {
            debug!("Could not remove {}: {}", environment.temp_dir.display(), e);
        }

        if environment.owned && !self.keep_workspaces {
            if let Err(e) = tokio::fs::remove_dir_all(&environment.workspace).await {
                warn!(
                    "Failed to remove workspace {}: {}",
                    environment.workspace.display(),
                    e
                );
            }
        }
    }

    fn shares_workspace(&self) -> bool {
        self.in_place
    }
}
