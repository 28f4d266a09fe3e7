//! Execution state models

use crate::core::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every job succeeded
    Completed,
    /// At least one job failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
    /// The event did not match the pipeline's trigger
    NotTriggered,
}

impl ExecutionStatus {
    /// Aggregate job statuses into a pipeline status
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut cancelled = false;
        for status in jobs {
            match status {
                JobStatus::Failure => return ExecutionStatus::Failed,
                JobStatus::Cancelled => cancelled = true,
                _ => {}
            }
        }
        if cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Completed
        }
    }
}

/// Status of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    /// Stopped between steps because the run was cancelled
    Cancelled,
    /// Not started because a needed job did not succeed
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    Skipped,
}

impl StepOutcome {
    /// Name used for `steps.<id>.outcome`
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Failure => "failure",
            StepOutcome::Skipped => "skipped",
        }
    }
}

/// Record of one step, kept for every step including skipped ones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,

    /// Step id, or a positional label
    pub label: String,

    pub name: String,

    /// Action kind (`run`, `cache`, ...)
    pub kind: String,

    pub outcome: StepOutcome,

    /// Exit code of the subprocess, when one ran to completion
    pub exit_code: Option<i32>,

    /// Why the step failed
    pub error: Option<String>,

    /// Why the step was skipped
    pub skip_reason: Option<String>,

    /// Captured output
    pub log: String,

    /// Outputs visible to later steps
    pub outputs: BTreeMap<String, String>,

    pub always_run: bool,

    pub continue_on_error: bool,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn executed(&self) -> bool {
        self.outcome != StepOutcome::Skipped
    }

    /// A failure that counts against the job
    pub fn fails_job(&self) -> bool {
        self.outcome == StepOutcome::Failure && !self.continue_on_error
    }
}

/// Result of running one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,

    pub name: String,

    pub runs_on: String,

    pub status: JobStatus,

    pub steps: Vec<StepRecord>,

    /// Job-level error (environment provisioning, skipped dependencies)
    pub error: Option<String>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    /// A job that never started
    pub fn not_started(job_id: &str, name: &str, runs_on: &str, status: JobStatus, reason: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            runs_on: runs_on.to_string(),
            status,
            steps: Vec::new(),
            error: Some(reason),
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn executed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.executed()).count()
    }

    pub fn step(&self, label: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.label == label || s.name == label)
    }
}

/// Result of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique execution ID
    pub execution_id: Uuid,

    pub pipeline_name: String,

    pub event: TriggerEvent,

    pub status: ExecutionStatus,

    /// Job results in definition order
    pub jobs: Vec<JobResult>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineResult {
    pub fn job(&self, job_id: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed | ExecutionStatus::NotTriggered)
    }

    /// Fraction of jobs that reached a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.jobs.is_empty() {
            return 0.0;
        }
        let done = self.jobs.iter().filter(|j| j.status.is_terminal()).count();
        done as f64 / self.jobs.len() as f64
    }
}
