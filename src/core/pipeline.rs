//! Pipeline and job domain model

use crate::core::{
    config::{env_to_strings, JobConfig, PipelineConfig},
    error::ParseError,
    step::{minutes, Step},
    trigger::{Trigger, TriggerEvent},
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// A job: ordered steps run in one isolated environment
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job id (key under `jobs:`)
    pub id: String,

    /// Display name
    pub name: String,

    /// Runtime target (`runs-on`), opaque to the executor
    pub runs_on: String,

    /// Jobs that must succeed first
    pub needs: Vec<String>,

    pub env: HashMap<String, String>,

    pub steps: Vec<Step>,
}

impl Job {
    pub fn from_config(config: &JobConfig) -> Result<Self, ParseError> {
        let mut steps: Vec<Step> = Vec::with_capacity(config.steps.len());
        let mut ids: HashSet<String> = HashSet::new();

        for (index, step_config) in config.steps.iter().enumerate() {
            let step = Step::from_config(&config.id, index, step_config)?;

            for reference in step.step_references() {
                if !ids.contains(&reference) {
                    return Err(ParseError::step(
                        &config.id,
                        index,
                        format!("references step '{}' which is not an earlier step", reference),
                    ));
                }
            }

            if let Some(id) = &step.id {
                if !ids.insert(id.clone()) {
                    return Err(ParseError::step(&config.id, index, format!("duplicate step id '{}'", id)));
                }
            }

            steps.push(step);
        }

        if steps.is_empty() {
            return Err(ParseError::step(&config.id, 0, "job has no steps"));
        }

        Ok(Job {
            id: config.id.clone(),
            name: config.name.clone().unwrap_or_else(|| config.id.clone()),
            runs_on: config.runs_on.to_vec().join(","),
            needs: config.needs(),
            env: env_to_strings(&config.env),
            steps,
        })
    }
}

/// A loaded, validated pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,

    pub trigger: Trigger,

    /// Environment shared by every job
    pub env: HashMap<String, String>,

    /// Jobs in definition order
    pub jobs: Vec<Job>,

    /// Step timeout used when a step sets none
    pub default_step_timeout: Option<Duration>,
}

impl Pipeline {
    /// Load and validate a pipeline definition
    pub fn load(definition: &str) -> Result<Self, ParseError> {
        PipelineConfig::from_yaml(definition)?.to_pipeline()
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        PipelineConfig::from_file(path)?.to_pipeline()
    }

    /// Load a pipeline for a specific event
    ///
    /// Returns `Ok(None)` when the definition is valid but does not react
    /// to `event`.
    pub fn load_for_event(definition: &str, event: &TriggerEvent) -> Result<Option<Self>, ParseError> {
        let pipeline = Self::load(definition)?;
        Ok(pipeline.is_triggered_by(event).then_some(pipeline))
    }

    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ParseError> {
        let jobs = config
            .jobs
            .iter()
            .map(Job::from_config)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Pipeline {
            name: config.display_name().to_string(),
            trigger: Trigger::from_config(&config.on)?,
            env: env_to_strings(&config.env),
            jobs,
            default_step_timeout: config.default_timeout_minutes.and_then(minutes),
        })
    }

    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.trigger.matches(event)
    }

    /// Get a job by id
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Keep only the selected jobs and everything they transitively need
    pub fn retain_jobs(&mut self, selected: &[String]) -> Result<(), ParseError> {
        let mut keep: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = Vec::new();

        for id in selected {
            if self.job(id).is_none() {
                return Err(ParseError::UnknownNeed {
                    job: "<selection>".to_string(),
                    needs: id.clone(),
                });
            }
            stack.push(id.clone());
        }

        while let Some(id) = stack.pop() {
            if keep.insert(id.clone()) {
                if let Some(job) = self.job(&id) {
                    stack.extend(job.needs.iter().cloned());
                }
            }
        }

        self.jobs.retain(|j| keep.contains(&j.id));
        Ok(())
    }

    /// Job ids in an order where every job follows the jobs it needs
    pub fn execution_order(&self) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for job in &self.jobs {
            self.visit(&job.id, &mut visited, &mut result);
        }

        result
    }

    fn visit(&self, job_id: &str, visited: &mut HashSet<String>, result: &mut Vec<String>) {
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = self.job(job_id) {
            for need in &job.needs {
                self.visit(need, visited, result);
            }
        }

        result.push(job_id.to_string());
    }
}
