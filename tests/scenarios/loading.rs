//! Test: loading workflows and matching trigger events

use crate::helpers::*;
use runway::core::{ExecutionStatus, ParseError, Pipeline, TriggerEvent};

#[test]
fn test_plox_workflow_loads() {
    let pipeline = pipeline_from_yaml(PLOX_WORKFLOW);

    assert_eq!(pipeline.name, "plox");
    let ids: Vec<&str> = pipeline.jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["lint", "test"]);

    let lint = pipeline.job("lint").unwrap();
    assert_eq!(lint.runs_on, "ubuntu-latest");
    assert_eq!(lint.steps.len(), 7);
    let always: Vec<&str> = lint
        .steps
        .iter()
        .filter(|s| s.always_run)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(always, vec!["Lint", "Type check"]);

    assert!(pipeline.is_triggered_by(&TriggerEvent::push("main")));
    assert!(!pipeline.is_triggered_by(&TriggerEvent::new("pull_request")));
}

#[test]
fn test_cyclic_needs_rejected() {
    let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    needs: test
    steps:
      - run: make
  test:
    runs-on: ubuntu-latest
    needs: build
    steps:
      - run: make test
"#;
    let err = Pipeline::load(yaml).unwrap_err();
    assert!(matches!(err, ParseError::Cycle(_)), "got {:?}", err);
}

#[test]
fn test_unknown_need_rejected() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    needs: build
    steps:
      - run: pytest
"#;
    let err = Pipeline::load(yaml).unwrap_err();
    assert!(
        matches!(err, ParseError::UnknownNeed { ref needs, .. } if needs == "build"),
        "got {:?}",
        err
    );
}

#[test]
fn test_reference_to_undefined_step_rejected() {
    let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - name: Install
        if: steps.cached.outputs.cache-hit != 'true'
        run: poetry install
"#;
    assert!(Pipeline::load(yaml).is_err());
}

#[test]
fn test_load_for_unmatched_event_is_none() {
    let yaml = r#"
on:
  push:
    branches: [main]
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
"#;
    let event = TriggerEvent::push("feature/scanner");
    assert!(Pipeline::load_for_event(yaml, &event).unwrap().is_none());

    let event = TriggerEvent::push("main");
    assert!(Pipeline::load_for_event(yaml, &event).unwrap().is_some());
}

#[tokio::test]
async fn test_unmatched_event_runs_nothing() {
    let yaml = r#"
on: pull_request
jobs:
  test:
    runs-on: ubuntu-latest
    steps:
      - run: pytest
"#;
    let runner = MockRunner::new();
    let result = run_with_mock(yaml, runner.clone()).await;

    assert_eq!(result.result.status, ExecutionStatus::NotTriggered);
    assert!(result.result.jobs.is_empty());
    assert!(runner.commands().is_empty());
}
