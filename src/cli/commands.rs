//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

const DEFAULT_WORKFLOW: &str = ".github/workflows/ci.yml";

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long, default_value = DEFAULT_WORKFLOW)]
    pub file: PathBuf,

    /// Event to simulate
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Branch the event happened on (defaults to the checked-out branch)
    #[arg(long)]
    pub branch: Option<String>,

    /// Scheduling strategy: sequential, parallel, or a job limit
    #[arg(long, default_value_t = SchedulingStrategy::Parallel, value_parser = parse_strategy)]
    pub strategy: SchedulingStrategy,

    /// Only run these jobs (and the jobs they need)
    #[arg(long)]
    pub job: Vec<String>,

    /// Extra environment variables (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Source directory checked out into each job
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Directory holding per-job workspaces (defaults to the system temp dir)
    #[arg(long, conflicts_with = "in_place")]
    pub workspace_root: Option<PathBuf>,

    /// Run every job directly in the source directory, one job at a time
    #[arg(long)]
    pub in_place: bool,

    /// Keep per-job workspaces after the run
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Cache directory
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Disable the dependency cache
    #[arg(long)]
    pub no_cache: bool,

    /// Default step timeout in minutes
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Shell used for `run:` steps
    #[arg(long)]
    pub shell: Option<String>,

    /// Write step logs to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a workflow definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long, default_value = DEFAULT_WORKFLOW)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines in history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

fn parse_strategy(s: &str) -> Result<SchedulingStrategy, String> {
    s.parse()
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
