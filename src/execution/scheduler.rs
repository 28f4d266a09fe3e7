//! Execution scheduler - determines which jobs to start next

use crate::core::{JobStatus, Pipeline};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Strategy for scheduling job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute jobs in dependency order, one at a time
    Sequential,

    /// Execute all ready jobs in parallel
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent jobs)
    LimitedParallel(usize),
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// Accepts `sequential`, `parallel`, or a number for limited parallelism
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(SchedulingStrategy::Sequential),
            "parallel" => Ok(SchedulingStrategy::Parallel),
            other => match other.trim_start_matches("limited:").parse::<usize>() {
                Ok(0) => Err("limited parallelism needs at least 1 job".to_string()),
                Ok(max) => Ok(SchedulingStrategy::LimitedParallel(max)),
                Err(_) => Err(format!(
                    "unknown strategy '{}' (expected sequential, parallel or a number)",
                    s
                )),
            },
        }
    }
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::Sequential => write!(f, "sequential"),
            SchedulingStrategy::Parallel => write!(f, "parallel"),
            SchedulingStrategy::LimitedParallel(max) => write!(f, "limited:{}", max),
        }
    }
}

/// What the scheduler decided for the waiting jobs
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Jobs to start now
    pub start: Vec<String>,

    /// Jobs that can never start, with the needed job that did not succeed
    pub skip: Vec<(String, String)>,
}

/// Scheduler for determining which jobs to run
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Decide which of the `waiting` jobs to start or skip
    ///
    /// `finished` holds the status of every job that has completed,
    /// `running` the number of jobs still in flight.
    pub fn next_jobs(
        &self,
        pipeline: &Pipeline,
        waiting: &[String],
        finished: &HashMap<String, JobStatus>,
        running: usize,
    ) -> Schedule {
        let mut schedule = Schedule::default();
        let mut ready = Vec::new();

        for job_id in pipeline.execution_order() {
            if !waiting.contains(&job_id) {
                continue;
            }
            let Some(job) = pipeline.job(&job_id) else {
                continue;
            };

            let failed_need = job
                .needs
                .iter()
                .find(|need| finished.get(*need).is_some_and(|s| *s != JobStatus::Success));
            if let Some(need) = failed_need {
                schedule.skip.push((job_id.clone(), need.clone()));
                continue;
            }

            if job.needs.iter().all(|need| finished.contains_key(need)) {
                ready.push(job_id);
            }
        }

        let capacity = match self.strategy {
            SchedulingStrategy::Sequential => 1usize.saturating_sub(running),
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => max.saturating_sub(running),
        };

        schedule.start = ready.into_iter().take(capacity).collect();
        schedule
    }
}
