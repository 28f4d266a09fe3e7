//! Step domain model

use crate::core::{
    config::{value_to_string, StepConfig},
    context::EvalContext,
    error::ParseError,
    expression::{EvalError, Expr, Template},
};
use std::collections::BTreeMap;
use std::time::Duration;

/// What a step does when it runs
#[derive(Debug, Clone)]
pub enum StepAction {
    /// `actions/checkout`
    Checkout { inputs: BTreeMap<String, Template> },

    /// `actions/setup-<tool>`
    Setup {
        tool: String,
        inputs: BTreeMap<String, Template>,
    },

    /// `actions/cache`: restore now, save at job end on a miss
    Cache {
        path: Template,
        key: Template,
        restore_keys: Vec<Template>,
    },

    /// Shell command
    Run { command: Template },

    /// Any other referenced action
    Action {
        uses: String,
        inputs: BTreeMap<String, Template>,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Checkout { .. } => "checkout",
            StepAction::Setup { .. } => "setup",
            StepAction::Cache { .. } => "cache",
            StepAction::Run { .. } => "run",
            StepAction::Action { .. } => "action",
        }
    }

    fn templates(&self) -> Vec<&Template> {
        match self {
            StepAction::Checkout { inputs }
            | StepAction::Setup { inputs, .. }
            | StepAction::Action { inputs, .. } => inputs.values().collect(),
            StepAction::Cache {
                path,
                key,
                restore_keys,
            } => {
                let mut all = vec![path, key];
                all.extend(restore_keys.iter());
                all
            }
            StepAction::Run { command } => vec![command],
        }
    }
}

/// A single step in a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Position within the job (0-based)
    pub index: usize,

    /// Identifier given with `id:`
    pub id: Option<String>,

    /// Display name
    pub name: String,

    pub action: StepAction,

    /// The `if:` expression as written
    pub condition: Option<Expr>,

    /// Run even after an earlier step failed (`if:` uses `always()` or `failure()`)
    pub always_run: bool,

    /// A failure of this step neither fails the job nor skips later steps
    pub continue_on_error: bool,

    pub env: BTreeMap<String, Template>,

    pub working_directory: Option<String>,

    pub timeout: Option<Duration>,
}

fn parse_template(job: &str, index: usize, source: &str) -> Result<Template, ParseError> {
    Template::parse(source).map_err(|e| ParseError::Expression {
        expression: source.to_string(),
        message: format!("job '{}' step {}: {}", job, index, e),
    })
}

fn parse_inputs(
    job: &str,
    index: usize,
    with: &BTreeMap<String, serde_yaml::Value>,
) -> Result<BTreeMap<String, Template>, ParseError> {
    with.iter()
        .map(|(k, v)| Ok((k.clone(), parse_template(job, index, &value_to_string(v))?)))
        .collect()
}

/// `owner/name@ref` → `owner/name`
fn action_name(uses: &str) -> &str {
    uses.split('@').next().unwrap_or(uses)
}

pub(crate) fn minutes(value: f64) -> Option<Duration> {
    (value.is_finite() && value > 0.0).then(|| Duration::from_secs_f64(value * 60.0))
}

impl Step {
    /// Build a step from its config
    pub fn from_config(job: &str, index: usize, config: &StepConfig) -> Result<Self, ParseError> {
        let action = match (&config.uses, &config.run) {
            (Some(_), Some(_)) => {
                return Err(ParseError::step(job, index, "cannot have both 'uses' and 'run'"))
            }
            (None, None) => return Err(ParseError::step(job, index, "needs either 'uses' or 'run'")),
            (None, Some(run)) => StepAction::Run {
                command: parse_template(job, index, run)?,
            },
            (Some(uses), None) => Self::action_from_uses(job, index, uses, config)?,
        };

        let condition = config
            .condition
            .as_ref()
            .map(|value| {
                let source = value_to_string(value);
                Expr::parse(&source).map_err(|e| ParseError::Expression {
                    expression: source.clone(),
                    message: format!("job '{}' step {}: {}", job, index, e),
                })
            })
            .transpose()?;

        let always_run = condition
            .as_ref()
            .is_some_and(|c| c.calls("always") || c.calls("failure"));

        let env = config
            .env
            .iter()
            .map(|(k, v)| Ok((k.clone(), parse_template(job, index, &value_to_string(v))?)))
            .collect::<Result<_, ParseError>>()?;

        let name = config.name.clone().unwrap_or_else(|| match (&config.uses, &config.run) {
            (Some(uses), _) => format!("Run {}", uses),
            (_, Some(run)) => format!("Run {}", run.lines().next().unwrap_or("").trim()),
            _ => format!("Step {}", index + 1),
        });

        Ok(Step {
            index,
            id: config.id.clone(),
            name,
            action,
            condition,
            always_run,
            continue_on_error: config.continue_on_error,
            env,
            working_directory: config.working_directory.clone(),
            timeout: config.timeout_minutes.and_then(minutes),
        })
    }

    fn action_from_uses(
        job: &str,
        index: usize,
        uses: &str,
        config: &StepConfig,
    ) -> Result<StepAction, ParseError> {
        let name = action_name(uses);
        let inputs = parse_inputs(job, index, &config.with)?;

        if name == "actions/checkout" {
            return Ok(StepAction::Checkout { inputs });
        }

        if let Some(tool) = name.strip_prefix("actions/setup-") {
            return Ok(StepAction::Setup {
                tool: tool.to_string(),
                inputs,
            });
        }

        if name == "actions/cache" {
            let mut inputs = inputs;
            let path = inputs
                .remove("path")
                .ok_or_else(|| ParseError::step(job, index, "cache step requires 'path'"))?;
            if path.source().trim().contains('\n') {
                return Err(ParseError::step(job, index, "cache 'path' must be a single path"));
            }
            let key = inputs
                .remove("key")
                .ok_or_else(|| ParseError::step(job, index, "cache step requires 'key'"))?;
            inputs.remove("restore-keys");
            let restore_keys = match config.with.get("restore-keys") {
                Some(value) => value_to_string(value)
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|l| parse_template(job, index, l))
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
            };
            return Ok(StepAction::Cache {
                path,
                key,
                restore_keys,
            });
        }

        Ok(StepAction::Action {
            uses: uses.to_string(),
            inputs,
        })
    }

    /// Step ids this step's expressions read from
    pub fn step_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .action
            .templates()
            .into_iter()
            .chain(self.env.values())
            .flat_map(Template::step_references)
            .collect();
        if let Some(condition) = &self.condition {
            refs.extend(condition.step_references());
        }
        refs
    }

    /// Key used in log file names and events
    pub fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| format!("step-{}", self.index + 1))
    }

    /// Check whether the condition asks to run in a cancelled job
    pub fn runs_when_cancelled(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|c| c.calls("always") || c.calls("cancelled"))
    }

    /// Evaluate the `if:` condition
    ///
    /// Without an explicit status function the condition is implicitly
    /// `success() && (<expr>)`; no condition at all is `success()`.
    pub fn should_run(&self, ctx: &EvalContext) -> Result<bool, EvalError> {
        let Some(condition) = &self.condition else {
            return Ok(!ctx.job_failed && !ctx.cancelled);
        };

        if !condition.uses_status_function() && (ctx.job_failed || ctx.cancelled) {
            return Ok(false);
        }

        Ok(condition.evaluate(ctx)?.is_truthy())
    }

    /// Render the step's env against the context
    pub fn render_env(&self, ctx: &EvalContext) -> Result<BTreeMap<String, String>, EvalError> {
        self.env
            .iter()
            .map(|(k, t)| Ok((k.clone(), t.render(ctx)?)))
            .collect()
    }
}
