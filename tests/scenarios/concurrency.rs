//! Test: independent jobs and scheduling strategies

use crate::helpers::*;
use async_trait::async_trait;
use runway::core::{ExecutionStatus, JobStatus};
use runway::execution::SchedulingStrategy;
use runway::runner::{ActionKind, Environment, Invocation, RunnerError, StepOutput, StepRunner};
use runway::NoopCacheStore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Blocks the first command of every job until all jobs have started one
struct RendezvousRunner {
    barrier: Arc<Barrier>,
}

#[async_trait]
impl StepRunner for RendezvousRunner {
    async fn run_command(
        &self,
        _command: &str,
        _environment: &Environment,
        _invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        self.barrier.wait().await;
        Ok(StepOutput::default())
    }

    async fn run_action(
        &self,
        _action: &ActionKind,
        _inputs: &BTreeMap<String, String>,
        _environment: &Environment,
        _invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        Ok(StepOutput::default())
    }
}

const TWO_JOBS: &str = r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: flake8
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
"#;

#[tokio::test]
async fn test_independent_jobs_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let runner = RendezvousRunner {
        barrier: Arc::new(Barrier::new(2)),
    };

    // Only completes if both jobs are in flight at the same time
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        run_scenario(
            TWO_JOBS,
            runner,
            dir.path(),
            Arc::new(NoopCacheStore),
            SchedulingStrategy::Parallel,
        ),
    )
    .await
    .expect("jobs should run concurrently");

    assert_eq!(result.result.status, ExecutionStatus::Completed);
    let started: HashSet<String> = result.started_jobs().into_iter().collect();
    assert_eq!(started, HashSet::from(["lint".to_string(), "test".to_string()]));
}

#[tokio::test]
async fn test_results_do_not_depend_on_strategy() {
    let strategies = [
        SchedulingStrategy::Sequential,
        SchedulingStrategy::Parallel,
        SchedulingStrategy::LimitedParallel(1),
    ];

    let mut outcomes = Vec::new();
    for strategy in strategies {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::failing(&["black"]).with_delay(Duration::from_millis(5));
        let result = run_scenario(
            PLOX_WORKFLOW,
            runner,
            dir.path(),
            Arc::new(NoopCacheStore),
            strategy,
        )
        .await;

        // Results are reported in definition order whatever finished first
        let ids: Vec<&str> = result.result.jobs.iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(ids, vec!["lint", "test"]);

        outcomes.push((
            result.result.status,
            result.job_status("lint"),
            result.job_status("test"),
            result.outcomes("lint"),
            result.outcomes("test"),
        ));
    }

    assert_eq!(outcomes[0].0, ExecutionStatus::Failed);
    assert_eq!(outcomes[0].1, JobStatus::Failure);
    assert_eq!(outcomes[0].2, JobStatus::Success);
    assert!(outcomes.iter().all(|o| *o == outcomes[0]));
}

#[tokio::test]
async fn test_sequential_runs_one_job_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().with_delay(Duration::from_millis(20));
    let result = run_scenario(
        TWO_JOBS,
        runner,
        dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Sequential,
    )
    .await;

    assert_eq!(result.result.status, ExecutionStatus::Completed);

    // Every job start is followed by that job's finish before the next start
    let mut in_flight = 0usize;
    for event in &result.events {
        match event {
            runway::ExecutionEvent::JobStarted { .. } => {
                in_flight += 1;
                assert_eq!(in_flight, 1);
            }
            runway::ExecutionEvent::JobFinished { .. } => in_flight -= 1,
            _ => {}
        }
    }
}
