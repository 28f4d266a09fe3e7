//! Job executor - runs one job's steps in order

use crate::{
    cache::CacheStore,
    core::{
        expression::{EvalError, Template},
        EvalContext, Job, JobResult, JobStatus, Step, StepAction,
        StepOutcome, StepRecord, TriggerEvent,
    },
    execution::engine::{EventBus, ExecutionEvent},
    runner::{ActionKind, Environment, Invocation, RunnerError, StepOutput, StepRunner},
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a step failed
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Condition could not be evaluated: {0}")]
    Condition(#[source] EvalError),

    #[error("Failed to render step: {0}")]
    Render(#[source] EvalError),

    #[error("Timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Process exited with code {0}")]
    ExitCode(i32),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Step timeout when neither the step nor the pipeline sets one
    pub default_step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout: Duration::from_secs(360 * 60),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = timeout;
        self
    }
}

/// Run-wide values shared by every job of one pipeline execution
#[derive(Debug, Clone)]
pub struct RunContext {
    pub execution_id: Uuid,
    pub event: TriggerEvent,
    pub pipeline_env: HashMap<String, String>,
    pub default_step_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(event: TriggerEvent) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            event,
            pipeline_env: HashMap::new(),
            default_step_timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// A cache path to store once the job has succeeded
#[derive(Debug, Clone)]
struct PendingSave {
    key: String,
    path: PathBuf,
}

/// Mutable state of a job while its steps run
struct JobState {
    ctx: EvalContext,
    env: BTreeMap<String, String>,
    saves: Vec<PendingSave>,
    failed: bool,
}

/// Executes the steps of a single job
pub struct JobExecutor<R> {
    runner: Arc<R>,
    cache: Arc<dyn CacheStore>,
    config: ExecutorConfig,
    events: EventBus,
}

impl<R: StepRunner> JobExecutor<R> {
    pub fn new(runner: Arc<R>, cache: Arc<dyn CacheStore>, config: ExecutorConfig, events: EventBus) -> Self {
        Self {
            runner,
            cache,
            config,
            events,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every step of `job` in `environment`
    pub async fn run(&self, job: &Job, environment: &Environment, run: &RunContext) -> JobResult {
        info!("Executing job: {} on {}", job.id, job.runs_on);
        let started_at = Utc::now();

        let mut state = self.initial_state(job, environment, run);
        let mut records = Vec::with_capacity(job.steps.len());
        let mut cancelled = false;

        for step in &job.steps {
            if !cancelled && run.cancel.is_cancelled() {
                info!("Job {} cancelled before step '{}'", job.id, step.name);
                cancelled = true;
            }

            state.ctx.job_failed = state.failed;
            state.ctx.cancelled = cancelled;
            state.ctx.set("job.status", job_status_name(state.failed, cancelled));

            let record = if cancelled && !step.runs_when_cancelled() {
                self.skip(job, step, "run cancelled")
            } else if !cancelled && state.failed && !step.always_run {
                self.skip(job, step, "an earlier step failed")
            } else {
                match step.should_run(&state.ctx) {
                    Ok(true) => self.execute_step(job, step, environment, run, &mut state).await,
                    Ok(false) => self.skip(job, step, "condition evaluated to false"),
                    Err(e) => {
                        warn!("Condition of step '{}' in job {} failed: {}", step.name, job.id, e);
                        let now = Utc::now();
                        let record = failed_record(step, StepError::Condition(e), now);
                        self.emit_finished(job, &record);
                        record
                    }
                }
            };

            if record.fails_job() {
                state.failed = true;
            }

            if let Some(id) = &step.id {
                state.ctx.record_step(id, record.outcome.as_str(), &record.outputs);
                if record.outcome == StepOutcome::Failure && record.continue_on_error {
                    state.ctx.set(format!("steps.{}.conclusion", id), "success");
                }
            }

            records.push(record);
        }

        let status = if cancelled {
            JobStatus::Cancelled
        } else if state.failed {
            JobStatus::Failure
        } else {
            JobStatus::Success
        };

        if status == JobStatus::Success {
            self.save_caches(job, &state.saves).await;
        } else if !state.saves.is_empty() {
            debug!("Job {} did not succeed, not saving {} cache entries", job.id, state.saves.len());
        }

        info!("Job {} finished: {:?}", job.id, status);

        JobResult {
            job_id: job.id.clone(),
            name: job.name.clone(),
            runs_on: job.runs_on.clone(),
            status,
            steps: records,
            error: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    fn initial_state(&self, job: &Job, environment: &Environment, run: &RunContext) -> JobState {
        let mut env = environment.vars.clone();
        env.extend(run.pipeline_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut ctx = EvalContext::new();
        ctx.workspace = Some(environment.workspace.clone());
        ctx.extend_env(&env);
        ctx.set("runner.os", environment.runner_os());
        ctx.set("runner.target", job.runs_on.clone());
        ctx.set("runner.temp", environment.temp_dir.display().to_string());
        ctx.set("github.event_name", run.event.name.clone());
        ctx.set("github.workspace", environment.workspace.display().to_string());
        ctx.set("github.job", job.id.clone());
        if let Some(branch) = &run.event.branch {
            ctx.set("github.ref_name", branch.clone());
        }
        if let Some(git_ref) = run.event.git_ref() {
            ctx.set("github.ref", git_ref);
        }

        JobState {
            ctx,
            env,
            saves: Vec::new(),
            failed: false,
        }
    }

    fn skip(&self, job: &Job, step: &Step, reason: &str) -> StepRecord {
        debug!("Skipping step '{}' in job {}: {}", step.name, job.id, reason);
        self.events.emit(ExecutionEvent::StepSkipped {
            job_id: job.id.clone(),
            step: step.label(),
            name: step.name.clone(),
            reason: reason.to_string(),
        });

        let mut record = base_record(step, StepOutcome::Skipped);
        record.skip_reason = Some(reason.to_string());
        record
    }

    fn emit_finished(&self, job: &Job, record: &StepRecord) {
        self.events.emit(ExecutionEvent::StepFinished {
            job_id: job.id.clone(),
            step: record.label.clone(),
            name: record.name.clone(),
            outcome: record.outcome,
            exit_code: record.exit_code,
            error: record.error.clone(),
        });
    }

    async fn execute_step(
        &self,
        job: &Job,
        step: &Step,
        environment: &Environment,
        run: &RunContext,
        state: &mut JobState,
    ) -> StepRecord {
        info!("Executing step '{}' in job {}", step.name, job.id);
        self.events.emit(ExecutionEvent::StepStarted {
            job_id: job.id.clone(),
            step: step.label(),
            name: step.name.clone(),
        });

        let started_at = Utc::now();
        let limit = step
            .timeout
            .or(run.default_step_timeout)
            .unwrap_or(self.config.default_step_timeout);

        let result = match self.invocation(step, environment, state) {
            Ok(invocation) => self.dispatch(job, step, environment, &invocation, limit, state).await,
            Err(e) => Err(e),
        };

        let record = match result {
            Ok(output) if output.succeeded() => {
                for (key, value) in &output.env_updates {
                    state.env.insert(key.clone(), value.clone());
                    state.ctx.set(format!("env.{}", key), value.clone());
                }
                let mut record = base_record(step, StepOutcome::Success);
                record.exit_code = Some(output.exit_code);
                record.log = output.log;
                record.outputs = output.outputs;
                record.started_at = Some(started_at);
                record
            }
            Ok(output) => {
                warn!(
                    "Step '{}' in job {} exited with code {}",
                    step.name, job.id, output.exit_code
                );
                let mut record = failed_record(step, StepError::ExitCode(output.exit_code), started_at);
                record.exit_code = Some(output.exit_code);
                record.log = output.log;
                record.outputs = output.outputs;
                record
            }
            Err(e) => {
                error!("Step '{}' in job {} failed: {}", step.name, job.id, e);
                failed_record(step, e, started_at)
            }
        };

        self.emit_finished(job, &record);
        record
    }

    fn invocation(
        &self,
        step: &Step,
        environment: &Environment,
        state: &JobState,
    ) -> Result<Invocation, StepError> {
        let mut env = state.env.clone();
        env.extend(step.render_env(&state.ctx).map_err(StepError::Render)?);

        let working_dir = match &step.working_directory {
            Some(dir) => environment.workspace.join(dir),
            None => environment.workspace.clone(),
        };

        Ok(Invocation { working_dir, env })
    }

    async fn dispatch(
        &self,
        job: &Job,
        step: &Step,
        environment: &Environment,
        invocation: &Invocation,
        limit: Duration,
        state: &mut JobState,
    ) -> Result<StepOutput, StepError> {
        let (action, inputs) = match &step.action {
            StepAction::Run { command } => {
                let command = command.render(&state.ctx).map_err(StepError::Render)?;
                let output = timeout(limit, self.runner.run_command(&command, environment, invocation))
                    .await
                    .map_err(|_| StepError::Timeout(limit))??;
                return Ok(output);
            }
            StepAction::Cache {
                path,
                key,
                restore_keys,
            } => {
                let rendered = path.render(&state.ctx).and_then(|path| {
                    let key = key.render(&state.ctx)?;
                    let restore_keys = restore_keys
                        .iter()
                        .map(|t| t.render(&state.ctx))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok((path, key, restore_keys))
                });

                return Ok(match rendered {
                    Ok((path, key, restore_keys)) => {
                        let path = resolve_cache_path(environment, &path);
                        self.restore_cache(job, environment, key, restore_keys, path, state).await
                    }
                    Err(e) => self.cache_unrenderable(job, key.source(), e),
                });
            }
            StepAction::Checkout { inputs } => (ActionKind::Checkout, render_inputs(inputs, &state.ctx)?),
            StepAction::Setup { tool, inputs } => (
                ActionKind::Setup { tool: tool.clone() },
                render_inputs(inputs, &state.ctx)?,
            ),
            StepAction::Action { uses, inputs } => (
                ActionKind::Other { uses: uses.clone() },
                render_inputs(inputs, &state.ctx)?,
            ),
        };

        let output = timeout(
            limit,
            self.runner.run_action(&action, &inputs, environment, invocation),
        )
        .await
        .map_err(|_| StepError::Timeout(limit))??;
        Ok(output)
    }

    /// A cache step whose key or path cannot be rendered runs as a miss
    /// that is never saved
    fn cache_unrenderable(&self, job: &Job, key: &str, error: EvalError) -> StepOutput {
        warn!("Cache key for job {} could not be rendered, continuing without cache: {}", job.id, error);
        self.events.emit(ExecutionEvent::CacheUnavailable {
            job_id: job.id.clone(),
            key: key.to_string(),
            error: error.to_string(),
        });

        let mut output = StepOutput::success(format!("Cache unavailable: {}\n", error));
        output.outputs.insert("cache-hit".to_string(), "false".to_string());
        output
    }

    /// Restore a cache entry; never fails the step
    async fn restore_cache(
        &self,
        job: &Job,
        environment: &Environment,
        key: String,
        restore_keys: Vec<String>,
        path: PathBuf,
        state: &mut JobState,
    ) -> StepOutput {
        let scope = environment.runs_on.as_str();
        let mut output = StepOutput::default();

        let exact = match self.cache.restore(scope, &key, &restore_keys, &path).await {
            Ok(Some(hit)) => {
                info!(
                    "Cache restored for job {} from key {} ({} files)",
                    job.id, hit.matched_key, hit.files
                );
                output.log = format!("Cache restored from key: {}\n", hit.matched_key);
                output.outputs.insert("cache-matched-key".to_string(), hit.matched_key.clone());
                self.events.emit(ExecutionEvent::CacheRestored {
                    job_id: job.id.clone(),
                    key: key.clone(),
                    matched_key: hit.matched_key,
                    exact: hit.exact,
                });
                hit.exact
            }
            Ok(None) => {
                info!("Cache not found for job {} key {}", job.id, key);
                output.log = format!("Cache not found for key: {}\n", key);
                self.events.emit(ExecutionEvent::CacheMissed {
                    job_id: job.id.clone(),
                    key: key.clone(),
                });
                false
            }
            Err(e) => {
                warn!("Cache restore failed for job {}, continuing without cache: {}", job.id, e);
                output.log = format!("Cache unavailable: {}\n", e);
                self.events.emit(ExecutionEvent::CacheUnavailable {
                    job_id: job.id.clone(),
                    key: key.clone(),
                    error: e.to_string(),
                });
                false
            }
        };

        output.outputs.insert("cache-hit".to_string(), exact.to_string());
        if !exact {
            state.saves.push(PendingSave { key, path });
        }
        output
    }

    async fn save_caches(&self, job: &Job, saves: &[PendingSave]) {
        for save in saves {
            match self.cache.save(&job.runs_on, &save.key, &save.path).await {
                Ok(true) => {
                    info!("Cache saved for job {} with key {}", job.id, save.key);
                    self.events.emit(ExecutionEvent::CacheSaved {
                        job_id: job.id.clone(),
                        key: save.key.clone(),
                    });
                }
                Ok(false) => debug!("Cache for key {} not saved", save.key),
                Err(e) => {
                    warn!("Failed to save cache for job {}: {}", job.id, e);
                    self.events.emit(ExecutionEvent::CacheUnavailable {
                        job_id: job.id.clone(),
                        key: save.key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

fn job_status_name(failed: bool, cancelled: bool) -> &'static str {
    if cancelled {
        "cancelled"
    } else if failed {
        "failure"
    } else {
        "success"
    }
}

fn render_inputs(
    inputs: &BTreeMap<String, Template>,
    ctx: &EvalContext,
) -> Result<BTreeMap<String, String>, StepError> {
    inputs
        .iter()
        .map(|(k, t)| Ok((k.clone(), t.render(ctx)?)))
        .collect::<Result<_, EvalError>>()
        .map_err(StepError::Render)
}

fn resolve_cache_path(environment: &Environment, path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path.trim());
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        path
    } else {
        environment.workspace.join(path)
    }
}

fn base_record(step: &Step, outcome: StepOutcome) -> StepRecord {
    StepRecord {
        index: step.index,
        label: step.label(),
        name: step.name.clone(),
        kind: step.action.kind().to_string(),
        outcome,
        exit_code: None,
        error: None,
        skip_reason: None,
        log: String::new(),
        outputs: BTreeMap::new(),
        always_run: step.always_run,
        continue_on_error: step.continue_on_error,
        started_at: None,
        finished_at: Some(Utc::now()),
    }
}

fn failed_record(step: &Step, error: StepError, started_at: chrono::DateTime<Utc>) -> StepRecord {
    let mut record = base_record(step, StepOutcome::Failure);
    record.error = Some(error.to_string());
    record.started_at = Some(started_at);
    record
}
