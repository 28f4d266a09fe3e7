//! Trigger events and `on:` filters

use crate::core::error::ParseError;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The event a pipeline run reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event name, e.g. `push`
    pub name: String,

    /// Branch the event happened on (if any)
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch: None,
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new("push").on_branch(branch)
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Fully qualified git ref, as exposed to expressions via `github.ref`
    pub fn git_ref(&self) -> Option<String> {
        self.branch.as_ref().map(|b| format!("refs/heads/{}", b))
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{} ({})", self.name, branch),
            None => f.write_str(&self.name),
        }
    }
}

/// `on:` as written in the workflow file
///
/// Accepts `on: push`, `on: [push, pull_request]` and the mapping form
/// `on: { push: { branches: [main] } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerConfig {
    Single(String),
    List(Vec<String>),
    Map(BTreeMap<String, Option<EventFilterConfig>>),
}

/// Branch filters for one event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilterConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,
}

/// Compiled trigger rules
#[derive(Debug, Clone)]
pub struct Trigger {
    rules: Vec<EventRule>,
}

#[derive(Debug, Clone)]
struct EventRule {
    event: String,
    branches: Vec<Pattern>,
    branches_ignore: Vec<Pattern>,
}

const BRANCH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ParseError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ParseError::Trigger(format!("bad branch pattern '{}': {}", p, e)))
        })
        .collect()
}

impl Trigger {
    pub fn from_config(config: &TriggerConfig) -> Result<Self, ParseError> {
        let plain = |event: &String| EventRule {
            event: event.clone(),
            branches: Vec::new(),
            branches_ignore: Vec::new(),
        };

        let rules = match config {
            TriggerConfig::Single(event) => vec![plain(event)],
            TriggerConfig::List(events) => events.iter().map(plain).collect(),
            TriggerConfig::Map(events) => events
                .iter()
                .map(|(event, filter)| {
                    let filter = filter.clone().unwrap_or_default();
                    if !filter.branches.is_empty() && !filter.branches_ignore.is_empty() {
                        return Err(ParseError::Trigger(format!(
                            "event '{}' cannot use both branches and branches-ignore",
                            event
                        )));
                    }
                    Ok(EventRule {
                        event: event.clone(),
                        branches: compile(&filter.branches)?,
                        branches_ignore: compile(&filter.branches_ignore)?,
                    })
                })
                .collect::<Result<_, _>>()?,
        };

        if rules.is_empty() {
            return Err(ParseError::Trigger("no events listed under 'on'".to_string()));
        }

        Ok(Self { rules })
    }

    /// Event names this trigger reacts to
    pub fn events(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.event.as_str()).collect()
    }

    /// Check whether the event should start the pipeline
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.rules.iter().any(|rule| rule.matches(event))
    }
}

impl EventRule {
    fn matches(&self, event: &TriggerEvent) -> bool {
        if self.event != event.name {
            return false;
        }

        if self.branches.is_empty() && self.branches_ignore.is_empty() {
            return true;
        }

        let Some(branch) = event.branch.as_deref() else {
            // Filtered events never match when the branch is unknown
            return false;
        };

        if !self.branches.is_empty() {
            return self.branches.iter().any(|p| p.matches_with(branch, BRANCH_MATCH));
        }

        !self.branches_ignore.iter().any(|p| p.matches_with(branch, BRANCH_MATCH))
    }
}
