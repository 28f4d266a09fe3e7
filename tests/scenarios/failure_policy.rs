//! Test: step failures, always-run steps and continue-on-error

use crate::helpers::*;
use runway::core::{ExecutionStatus, JobStatus, StepOutcome};

/// Failing test run: earlier steps ran, job and pipeline fail
#[tokio::test]
async fn test_failing_tests_fail_the_job() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v3
      - name: Set up Python
        uses: actions/setup-python@v4
        with:
          python-version: "3.11"
      - name: Install
        run: poetry install
      - name: Run tests
        run: poetry run pytest
"#;
    let result = run_with_mock(yaml, MockRunner::failing(&["pytest"])).await;

    assert_eq!(result.result.status, ExecutionStatus::Failed);
    assert_eq!(result.job_status("test"), JobStatus::Failure);

    let job = result.result.job("test").unwrap();
    assert_eq!(job.executed_steps(), 4);
    let passed = job
        .steps
        .iter()
        .filter(|s| s.outcome == StepOutcome::Success)
        .count();
    assert_eq!(passed, 3);
    assert_step(&result, "test", "Run tests", StepOutcome::Failure);
    assert_eq!(job.step("Run tests").unwrap().exit_code, Some(1));
}

/// Format check fails; lint and type check still run
#[tokio::test]
async fn test_always_steps_run_after_format_failure() {
    let yaml = r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v3
      - name: Check formatting
        run: black --check .
      - name: Lint
        if: always()
        run: flake8
      - name: Type check
        if: always()
        run: mypy plox
"#;
    let runner = MockRunner::failing(&["black"]);
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.job_status("lint"), JobStatus::Failure);
    assert_step(&result, "lint", "Checkout", StepOutcome::Success);
    assert_step(&result, "lint", "Check formatting", StepOutcome::Failure);
    assert_step(&result, "lint", "Lint", StepOutcome::Success);
    assert_step(&result, "lint", "Type check", StepOutcome::Success);
    assert_eq!(runner.commands(), vec!["black --check .", "flake8", "mypy plox"]);

    // Logs survive for the steps that ran after the failure
    let job = result.result.job("lint").unwrap();
    assert!(job.step("Type check").unwrap().log.contains("mypy plox"));
}

#[tokio::test]
async fn test_failure_skips_later_steps() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: poetry install
      - run: poetry run pytest
      - name: Upload coverage
        run: coverage xml
"#;
    let runner = MockRunner::failing(&["poetry install"]);
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.job_status("test"), JobStatus::Failure);
    assert_step(&result, "test", "Upload coverage", StepOutcome::Skipped);
    assert_eq!(runner.commands(), vec!["poetry install"]);

    let skipped = result.result.job("test").unwrap().step("Upload coverage").unwrap();
    assert_eq!(skipped.skip_reason.as_deref(), Some("an earlier step failed"));
}

#[tokio::test]
async fn test_failure_guard_step() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
      - name: Report
        if: failure()
        run: cat report.txt
      - name: Celebrate
        if: success()
        run: echo done
"#;
    let runner = MockRunner::failing(&["pytest"]);
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_step(&result, "test", "Report", StepOutcome::Success);
    assert_step(&result, "test", "Celebrate", StepOutcome::Skipped);
    assert_eq!(result.job_status("test"), JobStatus::Failure);
}

#[tokio::test]
async fn test_continue_on_error_keeps_job_green() {
    let yaml = r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - name: Optional check
        run: vulture plox
        continue-on-error: true
      - name: Lint
        run: flake8
"#;
    let runner = MockRunner::failing(&["vulture"]);
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.job_status("lint"), JobStatus::Success);
    assert_eq!(result.result.status, ExecutionStatus::Completed);
    assert_step(&result, "lint", "Optional check", StepOutcome::Failure);
    assert_step(&result, "lint", "Lint", StepOutcome::Success);
}

#[tokio::test]
async fn test_sibling_jobs_finish_after_a_failure() {
    let runner = MockRunner::failing(&["black"]);
    let result = run_with_mock(PLOX_WORKFLOW, runner.clone()).await;

    assert_eq!(result.result.status, ExecutionStatus::Failed);
    assert_eq!(result.job_status("lint"), JobStatus::Failure);
    assert_eq!(result.job_status("test"), JobStatus::Success);
    assert!(runner.ran("pytest"));
}

#[tokio::test]
async fn test_needs_skip_after_failure() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
  publish:
    runs-on: ubuntu-latest
    needs: test
    steps:
      - run: poetry publish
"#;
    let runner = MockRunner::failing(&["pytest"]);
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.job_status("publish"), JobStatus::Skipped);
    assert!(!runner.ran("poetry publish"));
    assert!(result.result.job("publish").unwrap().steps.is_empty());
}

#[tokio::test]
async fn test_unknown_action_fails_step() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - name: Upload
        uses: codecov/codecov-action@v3
      - run: pytest
"#;
    let result = run_with_mock(yaml, MockRunner::new()).await;

    assert_eq!(result.job_status("test"), JobStatus::Failure);
    assert_step(&result, "test", "Upload", StepOutcome::Failure);
    let upload = result.result.job("test").unwrap().step("Upload").unwrap();
    assert!(upload.error.as_deref().unwrap_or_default().contains("codecov"));
}
