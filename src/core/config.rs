//! Workflow configuration from YAML

use crate::core::{error::ParseError, trigger::TriggerConfig, Pipeline};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Workflow name
    #[serde(default)]
    pub name: Option<String>,

    /// Events the workflow reacts to
    #[serde(rename = "on")]
    pub on: TriggerConfig,

    /// Environment shared by every job
    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    /// Default step timeout (in minutes)
    #[serde(default, rename = "default-timeout-minutes")]
    pub default_timeout_minutes: Option<f64>,

    /// Jobs, in definition order
    #[serde(deserialize_with = "jobs_in_order", serialize_with = "jobs_as_map")]
    pub jobs: Vec<JobConfig>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job id (the key under `jobs:`)
    #[serde(skip)]
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Runtime target, passed through to the environment provider
    #[serde(rename = "runs-on")]
    pub runs_on: OneOrMany,

    /// Jobs that must succeed before this one starts
    #[serde(default)]
    pub needs: Option<OneOrMany>,

    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Optional step identifier, used by `steps.<id>` expressions
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Referenced action (`actions/cache@v2`)
    #[serde(default)]
    pub uses: Option<String>,

    /// Inputs for the referenced action
    #[serde(default, rename = "with")]
    pub with: BTreeMap<String, Value>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Condition controlling whether the step runs
    #[serde(default, rename = "if")]
    pub condition: Option<Value>,

    #[serde(default)]
    pub env: BTreeMap<String, Value>,

    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    /// Tolerate failure of this step
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<f64>,
}

/// A scalar or a list of scalars (`needs: lint` / `needs: [lint, test]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// Render a YAML scalar the way it would appear in a shell environment
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub fn env_to_strings(env: &BTreeMap<String, Value>) -> HashMap<String, String> {
    env.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect()
}

fn jobs_in_order<'de, D>(deserializer: D) -> Result<Vec<JobConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct JobsVisitor;

    impl<'de> Visitor<'de> for JobsVisitor {
        type Value = Vec<JobConfig>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of job ids to job definitions")
        }

        // Duplicate keys are kept here and reported by `validate`
        fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<Self::Value, M::Error> {
            let mut jobs = Vec::new();
            while let Some((id, mut job)) = map.next_entry::<String, JobConfig>()? {
                job.id = id;
                jobs.push(job);
            }
            Ok(jobs)
        }
    }

    deserializer.deserialize_map(JobsVisitor)
}

fn jobs_as_map<S>(jobs: &[JobConfig], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(jobs.len()))?;
    for job in jobs {
        map.serialize_entry(&job.id, job)?;
    }
    map.end()
}

impl PipelineConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ParseError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the job graph
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.jobs.is_empty() {
            return Err(ParseError::NoJobs);
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(ParseError::DuplicateJob(job.id.clone()));
            }
        }

        for job in &self.jobs {
            for need in job.needs() {
                if !seen.contains(need.as_str()) {
                    return Err(ParseError::UnknownNeed {
                        job: job.id.clone(),
                        needs: need,
                    });
                }
            }
        }

        self.check_cycles()?;

        // Step-level checks happen while the domain model is built
        Pipeline::from_config(self).map(|_| ())
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self) -> Result<(), ParseError> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.id) {
                self.dfs_check(&job.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<(), ParseError> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.jobs.iter().find(|j| j.id == job_id) {
            for need in job.needs() {
                if recursion_stack.contains(&need) {
                    return Err(ParseError::Cycle(need));
                }
                if !visited.contains(&need) {
                    self.dfs_check(&need, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Display name of the workflow
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, ParseError> {
        Pipeline::from_config(self)
    }
}

impl JobConfig {
    pub fn needs(&self) -> Vec<String> {
        self.needs.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
    }
}
