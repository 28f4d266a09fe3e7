//! Test: every step exits 0

use crate::helpers::*;
use runway::core::{ExecutionStatus, JobStatus, StepOutcome};

#[tokio::test]
async fn test_all_steps_succeed() {
    let runner = MockRunner::new();
    let result = run_with_mock(PLOX_WORKFLOW, runner.clone()).await;

    assert_eq!(result.result.status, ExecutionStatus::Completed);
    assert!(result.result.is_success());
    assert_eq!(result.job_status("lint"), JobStatus::Success);
    assert_eq!(result.job_status("test"), JobStatus::Success);

    // No cache, so both jobs install
    assert_step(&result, "lint", "Install dependencies", StepOutcome::Success);
    assert_step(&result, "test", "Run tests", StepOutcome::Success);
    assert!(runner.ran("poetry run pytest --cov=plox"));
    assert!(runner.ran("poetry run mypy plox"));
    assert_eq!(runner.commands().len(), 6);
}

#[tokio::test]
async fn test_step_logs_are_kept() {
    let result = run_with_mock(PLOX_WORKFLOW, MockRunner::new()).await;

    let test = result.result.job("test").unwrap();
    let run_tests = test.step("Run tests").unwrap();
    assert!(run_tests.log.contains("poetry run pytest"));
    assert_eq!(run_tests.exit_code, Some(0));
    assert!(run_tests.started_at.is_some());
    assert!(run_tests.finished_at.is_some());
}

#[tokio::test]
async fn test_outputs_flow_between_steps() {
    let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    env:
      PACKAGE: plox
    steps:
      - id: version
        run: echo "version=1.0" >> "$GITHUB_OUTPUT"
      - name: Publish
        run: echo ${{ env.PACKAGE }}-${{ steps.version.outcome }}
"#;
    let runner = MockRunner::new();
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.job_status("build"), JobStatus::Success);
    assert!(runner.ran("echo plox-success"));
}
