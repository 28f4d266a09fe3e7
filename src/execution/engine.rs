//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    cache::{CacheStore, NoopCacheStore},
    core::{
        ExecutionStatus, Job, JobResult, JobStatus, Pipeline, PipelineResult, StepOutcome,
        TriggerEvent,
    },
    execution::{
        executor::{ExecutorConfig, JobExecutor, RunContext},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    runner::{EnvironmentProvider, StepRunner},
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        event: TriggerEvent,
        jobs: usize,
    },
    JobStarted {
        job_id: String,
        runs_on: String,
    },
    StepStarted {
        job_id: String,
        step: String,
        name: String,
    },
    StepFinished {
        job_id: String,
        step: String,
        name: String,
        outcome: StepOutcome,
        exit_code: Option<i32>,
        error: Option<String>,
    },
    StepSkipped {
        job_id: String,
        step: String,
        name: String,
        reason: String,
    },
    CacheRestored {
        job_id: String,
        key: String,
        matched_key: String,
        exact: bool,
    },
    CacheMissed {
        job_id: String,
        key: String,
    },
    CacheUnavailable {
        job_id: String,
        key: String,
        error: String,
    },
    CacheSaved {
        job_id: String,
        key: String,
    },
    JobFinished {
        job_id: String,
        status: JobStatus,
        error: Option<String>,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to the registered handlers
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

/// Builder for [`ExecutionEngine`]
pub struct EngineBuilder<R> {
    runner: R,
    provider: Arc<dyn EnvironmentProvider>,
    cache: Arc<dyn CacheStore>,
    strategy: SchedulingStrategy,
    config: ExecutorConfig,
    handlers: Vec<EventHandler>,
}

impl<R: StepRunner + 'static> EngineBuilder<R> {
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an event handler
    pub fn event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> ExecutionEngine<R> {
        let events = EventBus::new(self.handlers);
        let executor = JobExecutor::new(Arc::new(self.runner), self.cache, self.config, events.clone());

        // Jobs sharing one workspace must not overlap
        let strategy = match self.strategy {
            SchedulingStrategy::Sequential | SchedulingStrategy::LimitedParallel(1) => self.strategy,
            other if self.provider.shares_workspace() => {
                warn!("Jobs share one workspace, running them sequentially instead of {}", other);
                SchedulingStrategy::Sequential
            }
            other => other,
        };

        ExecutionEngine {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(executor),
            provider: self.provider,
            events,
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    scheduler: ExecutionScheduler,
    executor: Arc<JobExecutor<R>>,
    provider: Arc<dyn EnvironmentProvider>,
    events: EventBus,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn builder(runner: R, provider: Arc<dyn EnvironmentProvider>) -> EngineBuilder<R> {
        EngineBuilder {
            runner,
            provider,
            cache: Arc::new(NoopCacheStore),
            strategy: SchedulingStrategy::default(),
            config: ExecutorConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.scheduler.strategy()
    }

    /// Execute the pipeline for `event`
    pub async fn execute(&self, pipeline: &Pipeline, event: &TriggerEvent) -> PipelineResult {
        self.execute_with_cancel(pipeline, event, CancellationToken::new())
            .await
    }

    /// Execute the pipeline, stopping between steps once `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        pipeline: &Pipeline,
        event: &TriggerEvent,
        cancel: CancellationToken,
    ) -> PipelineResult {
        let run = RunContext {
            execution_id: Uuid::new_v4(),
            event: event.clone(),
            pipeline_env: pipeline.env.clone(),
            default_step_timeout: pipeline.default_step_timeout,
            cancel,
        };
        let execution_id = run.execution_id;
        let started_at = Utc::now();

        if !pipeline.is_triggered_by(event) {
            info!("Pipeline {} is not triggered by {}", pipeline.name, event);
            self.events.emit(ExecutionEvent::PipelineCompleted {
                execution_id,
                status: ExecutionStatus::NotTriggered,
            });
            return PipelineResult {
                execution_id,
                pipeline_name: pipeline.name.clone(),
                event: event.clone(),
                status: ExecutionStatus::NotTriggered,
                jobs: Vec::new(),
                started_at,
                completed_at: Some(Utc::now()),
            };
        }

        info!("Starting pipeline execution: {} ({})", pipeline.name, execution_id);
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            event: event.clone(),
            jobs: pipeline.jobs.len(),
        });

        let mut results = self.run_jobs(pipeline, &run).await;

        let jobs: Vec<JobResult> = pipeline
            .jobs
            .iter()
            .map(|job| {
                results.remove(&job.id).unwrap_or_else(|| {
                    JobResult::not_started(
                        &job.id,
                        &job.name,
                        &job.runs_on,
                        JobStatus::Failure,
                        "job did not report a result".to_string(),
                    )
                })
            })
            .collect();

        let status = ExecutionStatus::from_jobs(jobs.iter().map(|j| &j.status));
        info!("Pipeline execution finished: {} - {:?}", pipeline.name, status);
        self.events.emit(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });

        PipelineResult {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            event: event.clone(),
            status,
            jobs,
            started_at,
            completed_at: Some(Utc::now()),
        }
    }

    /// Fan the jobs out, honouring `needs` and the scheduling strategy
    async fn run_jobs(&self, pipeline: &Pipeline, run: &RunContext) -> HashMap<String, JobResult> {
        let mut waiting: Vec<String> = pipeline.jobs.iter().map(|j| j.id.clone()).collect();
        let mut finished: HashMap<String, JobStatus> = HashMap::new();
        let mut results: HashMap<String, JobResult> = HashMap::new();
        let mut running: JoinSet<JobResult> = JoinSet::new();

        loop {
            let schedule = self
                .scheduler
                .next_jobs(pipeline, &waiting, &finished, running.len());

            let mut progressed = false;
            for (job_id, need) in schedule.skip {
                waiting.retain(|id| id != &job_id);
                if let Some(job) = pipeline.job(&job_id) {
                    let reason = format!("needed job '{}' did not succeed", need);
                    info!("Skipping job {}: {}", job_id, reason);
                    let result = JobResult::not_started(&job.id, &job.name, &job.runs_on, JobStatus::Skipped, reason);
                    self.finish_job(&result);
                    finished.insert(job_id.clone(), result.status);
                    results.insert(job_id, result);
                }
                progressed = true;
            }

            for job_id in schedule.start {
                waiting.retain(|id| id != &job_id);
                if let Some(job) = pipeline.job(&job_id) {
                    self.spawn_job(&mut running, job.clone(), run.clone());
                }
                progressed = true;
            }

            if progressed {
                continue;
            }

            match running.join_next().await {
                Some(Ok(result)) => {
                    finished.insert(result.job_id.clone(), result.status);
                    results.insert(result.job_id.clone(), result);
                }
                Some(Err(e)) => {
                    error!("Job task failed to complete: {}", e);
                }
                None => {
                    if !waiting.is_empty() {
                        warn!("Jobs left without a runnable dependency: {:?}", waiting);
                    }
                    break;
                }
            }
        }

        results
    }

    fn spawn_job(&self, running: &mut JoinSet<JobResult>, job: Job, run: RunContext) {
        let executor = self.executor.clone();
        let provider = self.provider.clone();
        let events = self.events.clone();

        running.spawn(async move {
            let fallback = (job.id.clone(), job.name.clone(), job.runs_on.clone());
            let inner = tokio::spawn(run_job(executor, provider, events.clone(), job, run));

            match inner.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Job {} panicked: {}", fallback.0, e);
                    let result = JobResult::not_started(
                        &fallback.0,
                        &fallback.1,
                        &fallback.2,
                        JobStatus::Failure,
                        format!("job task failed: {}", e),
                    );
                    events.emit(ExecutionEvent::JobFinished {
                        job_id: result.job_id.clone(),
                        status: result.status,
                        error: result.error.clone(),
                    });
                    result
                }
            }
        });
    }

    fn finish_job(&self, result: &JobResult) {
        self.events.emit(ExecutionEvent::JobFinished {
            job_id: result.job_id.clone(),
            status: result.status,
            error: result.error.clone(),
        });
    }
}

async fn run_job<R: StepRunner>(
    executor: Arc<JobExecutor<R>>,
    provider: Arc<dyn EnvironmentProvider>,
    events: EventBus,
    job: Job,
    run: RunContext,
) -> JobResult {
    let result = if run.cancel.is_cancelled() {
        JobResult::not_started(
            &job.id,
            &job.name,
            &job.runs_on,
            JobStatus::Cancelled,
            "run cancelled".to_string(),
        )
    } else {
        events.emit(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
            runs_on: job.runs_on.clone(),
        });

        match provider.provision(run.execution_id, &job).await {
            Ok(environment) => {
                let result = executor.run(&job, &environment, &run).await;
                provider.release(environment).await;
                result
            }
            Err(e) => {
                error!("Failed to provision environment for job {}: {}", job.id, e);
                JobResult::not_started(&job.id, &job.name, &job.runs_on, JobStatus::Failure, e.to_string())
            }
        }
    };

    events.emit(ExecutionEvent::JobFinished {
        job_id: result.job_id.clone(),
        status: result.status,
        error: result.error.clone(),
    });
    result
}
