//! Test utilities for runway scenarios

use async_trait::async_trait;
use runway::core::{JobStatus, Pipeline, PipelineResult, StepOutcome, TriggerEvent};
use runway::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use runway::runner::{
    ActionKind, Environment, Invocation, LocalEnvironmentProvider, RunnerError, StepOutput,
    StepRunner, SubprocessRunner,
};
use runway::{CacheStore, NoopCacheStore};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock runner that exits with scripted codes
///
/// Commands containing one of the `failing` fragments exit 1, everything
/// else exits 0. Every command is recorded. Checkout really copies the
/// source so cache steps have files to hash and store.
#[derive(Clone, Default)]
pub struct MockRunner {
    failing: Arc<Vec<String>>,
    commands: Arc<Mutex<Vec<String>>>,
    simulate_delay: Option<Duration>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(fragments: &[&str]) -> Self {
        Self {
            failing: Arc::new(fragments.iter().map(|f| f.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.simulate_delay = Some(delay);
        self
    }

    /// Commands run so far, in the order they started
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.commands().iter().any(|c| c.contains(fragment))
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn run_command(
        &self,
        command: &str,
        _environment: &Environment,
        _invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        self.commands.lock().unwrap().push(command.to_string());

        if let Some(delay) = self.simulate_delay {
            tokio::time::sleep(delay).await;
        }

        let exit_code = if self.failing.iter().any(|f| command.contains(f.as_str())) {
            1
        } else {
            0
        };

        Ok(StepOutput {
            exit_code,
            log: format!("$ {}\n", command),
            ..StepOutput::default()
        })
    }

    async fn run_action(
        &self,
        action: &ActionKind,
        inputs: &BTreeMap<String, String>,
        environment: &Environment,
        invocation: &Invocation,
    ) -> Result<StepOutput, RunnerError> {
        match action {
            ActionKind::Checkout => {
                SubprocessRunner::default()
                    .run_action(action, inputs, environment, invocation)
                    .await
            }
            ActionKind::Other { uses } => Err(RunnerError::UnsupportedAction(uses.clone())),
            _ => Ok(StepOutput::success(format!("{:?}\n", action))),
        }
    }
}

/// Result of a scenario run plus every event the engine emitted
pub struct ScenarioResult {
    pub result: PipelineResult,
    pub events: Vec<ExecutionEvent>,
}

impl ScenarioResult {
    pub fn job_status(&self, job_id: &str) -> JobStatus {
        self.result
            .job(job_id)
            .unwrap_or_else(|| panic!("job '{}' missing from result", job_id))
            .status
    }

    /// Outcomes of a job's steps, by name
    pub fn outcomes(&self, job_id: &str) -> Vec<(String, StepOutcome)> {
        self.result
            .job(job_id)
            .map(|j| j.steps.iter().map(|s| (s.name.clone(), s.outcome)).collect())
            .unwrap_or_default()
    }

    /// Cache keys the engine looked up, in event order
    pub fn cache_keys(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::CacheRestored { key, .. }
                | ExecutionEvent::CacheMissed { key, .. } => Some(key.clone()),
                ExecutionEvent::CacheUnavailable { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn started_jobs(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::JobStarted { job_id, .. } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Run a workflow checked out from `source`, one workspace per job
pub async fn run_scenario<R: StepRunner + 'static>(
    yaml: &str,
    runner: R,
    source: &Path,
    cache: Arc<dyn CacheStore>,
    strategy: SchedulingStrategy,
) -> ScenarioResult {
    let pipeline = pipeline_from_yaml(yaml);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let workspaces = tempfile::tempdir().unwrap();
    let provider = LocalEnvironmentProvider::new(source).with_workspace_root(workspaces.path());
    let engine = ExecutionEngine::builder(runner, Arc::new(provider))
        .cache(cache)
        .strategy(strategy)
        .event_handler(move |event| sink.lock().unwrap().push(event))
        .build();

    let result = engine.execute(&pipeline, &TriggerEvent::push("main")).await;
    let events = events.lock().unwrap().clone();
    ScenarioResult { result, events }
}

/// Run with no cache and the default strategy
pub async fn run_with_mock(yaml: &str, runner: MockRunner) -> ScenarioResult {
    let dir = tempfile::tempdir().unwrap();
    run_scenario(
        yaml,
        runner,
        dir.path(),
        Arc::new(NoopCacheStore),
        SchedulingStrategy::Parallel,
    )
    .await
}

pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    Pipeline::load(yaml).expect("workflow should load")
}

/// Assert a step ran with the given outcome
pub fn assert_step(result: &ScenarioResult, job_id: &str, step: &str, expected: StepOutcome) {
    let job = result
        .result
        .job(job_id)
        .unwrap_or_else(|| panic!("job '{}' missing", job_id));
    let record = job
        .step(step)
        .unwrap_or_else(|| panic!("step '{}' missing from job '{}'", step, job_id));
    assert_eq!(
        record.outcome, expected,
        "step '{}' in job '{}': {:?}",
        step, job_id, record
    );
}

/// The two-job workflow from the plox repository
pub const PLOX_WORKFLOW: &str = r#"
name: plox
on: [push]

jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v3
      - name: Set up Python
        uses: actions/setup-python@v4
        with:
          python-version: "3.11"
      - name: Load cached venv
        id: cached-poetry-dependencies
        uses: actions/cache@v3
        with:
          path: .venv
          key: venv-${{ runner.os }}-${{ hashFiles('**/poetry.lock') }}
      - name: Install dependencies
        if: steps.cached-poetry-dependencies.outputs.cache-hit != 'true'
        run: poetry install --no-interaction
      - name: Check formatting
        run: poetry run black --check .
      - name: Lint
        if: always()
        run: poetry run flake8
      - name: Type check
        if: always()
        run: poetry run mypy plox

  test:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v3
      - name: Set up Python
        uses: actions/setup-python@v4
        with:
          python-version: "3.11"
      - name: Load cached venv
        id: cached-poetry-dependencies
        uses: actions/cache@v3
        with:
          path: .venv
          key: venv-${{ runner.os }}-${{ hashFiles('**/poetry.lock') }}
      - name: Install dependencies
        if: steps.cached-poetry-dependencies.outputs.cache-hit != 'true'
        run: poetry install --no-interaction
      - name: Run tests
        run: poetry run pytest --cov=plox
"#;

/// Write a project tree that the plox workflow can hash and cache
pub fn plox_project(dir: &Path, lock: &str) {
    std::fs::write(dir.join("poetry.lock"), lock).unwrap();
    std::fs::create_dir_all(dir.join(".venv/bin")).unwrap();
    std::fs::write(dir.join(".venv/bin/black"), "#!/bin/sh\n").unwrap();
}
