//! Persistence layer for pipeline execution history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{JobStatus, PipelineResult, StepOutcome};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-job part of an execution summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub runs_on: String,
    pub status: JobStatus,
    pub executed_steps: usize,
    pub failed_steps: usize,
    pub error: Option<String>,
}

/// Summary of a pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Triggering event name
    pub event: String,

    pub branch: Option<String>,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    pub jobs: Vec<JobSummary>,
}

impl ExecutionSummary {
    pub fn failed_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.status == JobStatus::Failure).count()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Parse the stored form of an [`ExecutionStatus`]
pub fn status_from_str(status: &str) -> ExecutionStatus {
    match status {
        "Running" => ExecutionStatus::Running,
        "Completed" => ExecutionStatus::Completed,
        "Failed" => ExecutionStatus::Failed,
        "Cancelled" => ExecutionStatus::Cancelled,
        "NotTriggered" => ExecutionStatus::NotTriggered,
        _ => ExecutionStatus::Pending,
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all executions for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent executions across all pipelines
    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: tokio::sync::RwLock<std::collections::HashMap<Uuid, ExecutionSummary>>,
    by_pipeline: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_pipeline: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let replaced = execs
            .insert(execution.execution_id, execution.clone())
            .is_some();

        if !replaced {
            let mut by_pipeline = self.by_pipeline.write().await;
            by_pipeline
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<ExecutionSummary> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs.values().cloned().collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        let mut execs = self.executions.write().await;
        if let Some(removed) = execs.remove(&execution_id) {
            let mut by_pipeline = self.by_pipeline.write().await;
            if let Some(ids) = by_pipeline.get_mut(&removed.pipeline_name) {
                ids.retain(|id| *id != execution_id);
                if ids.is_empty() {
                    by_pipeline.remove(&removed.pipeline_name);
                }
            }
        }
        Ok(())
    }
}

/// Create a summary from a pipeline result
pub fn create_summary(result: &PipelineResult) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: result.execution_id,
        pipeline_name: result.pipeline_name.clone(),
        event: result.event.name.clone(),
        branch: result.event.branch.clone(),
        status: result.status,
        started_at: result.started_at,
        completed_at: result.completed_at,
        jobs: result
            .jobs
            .iter()
            .map(|job| JobSummary {
                job_id: job.job_id.clone(),
                runs_on: job.runs_on.clone(),
                status: job.status,
                executed_steps: job.executed_steps(),
                failed_steps: job
                    .steps
                    .iter()
                    .filter(|s| s.outcome == StepOutcome::Failure)
                    .count(),
                error: job.error.clone(),
            })
            .collect(),
    }
}
