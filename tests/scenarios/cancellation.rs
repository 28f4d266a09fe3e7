//! Test: superseded runs and step timeouts

use crate::helpers::*;
use runway::core::{ExecutionStatus, JobStatus, StepOutcome, TriggerEvent};
use runway::execution::{ExecutionEngine, RunRegistry, SchedulingStrategy};
use runway::runner::LocalEnvironmentProvider;
use std::sync::Arc;
use std::time::Duration;

const SLOW_JOB: &str = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - name: Install
        run: poetry install
      - name: Run tests
        run: poetry run pytest
      - name: Report
        if: always()
        run: coverage report
"#;

#[tokio::test]
async fn test_newer_push_cancels_running_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline_from_yaml(SLOW_JOB);
    let runner = MockRunner::new().with_delay(Duration::from_millis(300));

    let engine = Arc::new(
        ExecutionEngine::builder(runner.clone(), Arc::new(LocalEnvironmentProvider::new(dir.path())))
            .strategy(SchedulingStrategy::Sequential)
            .build(),
    );

    let registry = RunRegistry::new();
    let first = registry.begin("main").await;

    let task = {
        let engine = engine.clone();
        let pipeline = pipeline.clone();
        let token = first.token.clone();
        tokio::spawn(async move {
            engine
                .execute_with_cancel(&pipeline, &TriggerEvent::push("main"), token)
                .await
        })
    };

    // Supersede while the first step is still running
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = registry.begin("main").await;
    assert!(first.token.is_cancelled());
    assert!(!second.token.is_cancelled());

    let result = task.await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Cancelled);

    let job = result.job("test").unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // The in-flight command finished; only the always() step ran after it
    assert_eq!(job.step("Install").unwrap().outcome, StepOutcome::Success);
    let skipped = job.step("Run tests").unwrap();
    assert_eq!(skipped.outcome, StepOutcome::Skipped);
    assert_eq!(skipped.skip_reason.as_deref(), Some("run cancelled"));
    assert_eq!(job.step("Report").unwrap().outcome, StepOutcome::Success);
    assert_eq!(runner.commands(), vec!["poetry install", "coverage report"]);

    registry.finish(&first).await;
    assert_eq!(registry.active().await, 1);
    registry.finish(&second).await;
    assert_eq!(registry.active().await, 0);
}

#[tokio::test]
async fn test_other_branches_keep_running() {
    let registry = RunRegistry::new();
    let main = registry.begin("main").await;
    let feature = registry.begin("feature/resolver").await;

    assert!(!main.token.is_cancelled());
    assert!(!feature.token.is_cancelled());
    assert_eq!(registry.active().await, 2);

    registry.cancel_all().await;
    assert!(main.token.is_cancelled());
    assert!(feature.token.is_cancelled());
}

#[tokio::test]
async fn test_step_timeout_fails_job() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - name: Run tests
        run: poetry run pytest
        timeout-minutes: 0.001
      - name: Upload
        run: coverage xml
"#;
    let runner = MockRunner::new().with_delay(Duration::from_secs(5));
    let result = run_with_mock(yaml, runner).await;

    assert_eq!(result.job_status("test"), JobStatus::Failure);
    assert_step(&result, "test", "Run tests", StepOutcome::Failure);
    assert_step(&result, "test", "Upload", StepOutcome::Skipped);

    let record = result.result.job("test").unwrap().step("Run tests").unwrap();
    assert!(record.error.as_deref().unwrap_or_default().contains("Timed out"));
}
