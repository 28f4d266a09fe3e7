use anyhow::{Context, Result};
use runway::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use runway::cli::output::*;
use runway::cli::{Cli, Command};
use runway::core::config::PipelineConfig;
use runway::core::{ExecutionStatus, Pipeline, PipelineResult, TriggerEvent};
use runway::execution::{ExecutionEngine, ExecutionEvent, ExecutorConfig, RunRegistry};
use runway::persistence::{create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend};
#[cfg(feature = "sqlite")]
use runway::persistence::SqliteExecutionStore;
use runway::runner::{LocalEnvironmentProvider, RunnerConfig, SubprocessRunner};
use runway::{CacheStore, FsCacheStore, NoopCacheStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    let success = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await.map(|()| true)?,
        Command::History(cmd) => show_history(cmd).await.map(|()| true)?,
    };

    if !success {
        std::process::exit(1);
    }

    Ok(())
}

/// Read the checked-out branch from `.git/HEAD`
fn detect_branch(source: &Path) -> Option<String> {
    let head = std::fs::read_to_string(source.join(".git/HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

async fn open_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    let store: Arc<dyn PersistenceBackend> = Arc::new(SqliteExecutionStore::with_default_path().await?);

    #[cfg(not(feature = "sqlite"))]
    let store: Arc<dyn PersistenceBackend> = Arc::new(InMemoryPersistence::new());

    Ok(store)
}

fn cache_store(cmd: &RunCommand) -> Arc<dyn CacheStore> {
    if cmd.no_cache {
        return Arc::new(NoopCacheStore);
    }

    match &cmd.cache_dir {
        Some(dir) => Arc::new(FsCacheStore::new(shellexpand::tilde(dir).into_owned())),
        None => Arc::new(FsCacheStore::with_default_path()),
    }
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<bool> {
    let mut pipeline = Pipeline::load_file(&cmd.file)
        .with_context(|| format!("Failed to load workflow {}", cmd.file.display()))?;

    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    if !cmd.job.is_empty() {
        pipeline.retain_jobs(&cmd.job).context("Invalid --job selection")?;
    }

    for (key, value) in &cmd.env {
        pipeline.env.insert(key.clone(), value.clone());
        println!("{} Environment override: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }

    let source = cmd
        .source
        .canonicalize()
        .with_context(|| format!("Source directory {} not found", cmd.source.display()))?;

    let mut event = TriggerEvent::new(&cmd.event);
    if let Some(branch) = cmd.branch.clone().or_else(|| detect_branch(&source)) {
        event = event.on_branch(branch);
    }

    if !pipeline.is_triggered_by(&event) {
        println!(
            "{} {} is not triggered by {}, nothing to run",
            INFO,
            style(&pipeline.name).bold(),
            style(&event).cyan()
        );
        return Ok(true);
    }

    let store = open_store(cmd.no_history).await?;

    let mut runner_config = RunnerConfig::new();
    if let Some(shell) = &cmd.shell {
        runner_config = runner_config.with_shell(shell.split_whitespace().map(str::to_string).collect());
    }

    let mut provider = LocalEnvironmentProvider::new(&source).keep_workspaces(cmd.keep_workspaces);
    if cmd.in_place {
        provider = provider.run_in_source();
    } else if let Some(root) = &cmd.workspace_root {
        provider = provider.with_workspace_root(root);
    }

    let mut executor_config = ExecutorConfig::new();
    if let Some(minutes) = cmd.timeout.filter(|m| m.is_finite() && *m > 0.0) {
        executor_config = executor_config.with_default_step_timeout(Duration::from_secs_f64(minutes * 60.0));
    }

    let progress = create_progress_bar(pipeline.jobs.len());
    let bar = progress.clone();
    let engine = ExecutionEngine::builder(SubprocessRunner::new(runner_config), Arc::new(provider))
        .strategy(cmd.strategy)
        .cache(cache_store(cmd))
        .config(executor_config)
        .event_handler(move |event| {
            if let ExecutionEvent::JobFinished { .. } = &event {
                bar.inc(1);
            }
            bar.println(format_execution_event(&event));
        })
        .build();

    let registry = RunRegistry::new();
    let handle = registry
        .begin(event.branch.as_deref().unwrap_or(&event.name))
        .await;

    let token = handle.token.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining steps");
            token.cancel();
        }
    });

    println!();
    let result = engine
        .execute_with_cancel(&pipeline, &event, handle.token.clone())
        .await;
    interrupt.abort();
    registry.finish(&handle).await;
    progress.finish_and_clear();

    print_report(&result, verbose);

    if let Some(dir) = &cmd.log_dir {
        let written = write_logs(dir, &result).context("Failed to write step logs")?;
        println!("{} Step logs written to {}", INFO, style(written.display()).dim());
    }

    if !cmd.no_history {
        let summary = create_summary(&result);
        store.save_execution(&summary).await?;
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    if result.is_success() {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            format_status(result.status)
        );
    }

    Ok(result.is_success())
}

fn print_report(result: &PipelineResult, verbose: bool) {
    println!();
    for job in &result.jobs {
        println!("{}", format_job_report(job));

        for step in &job.steps {
            if step.fails_job() && !step.log.is_empty() {
                let max_lines = if verbose { 200 } else { 20 };
                println!("{}", style(format!("      --- {} output ---", step.name)).dim());
                for line in format_output(&step.log, max_lines).lines() {
                    println!("      {}", line);
                }
            }
        }
    }
}

/// Write every step's log to `<dir>/<execution>/<job>/<NN>-<step>.log`
fn write_logs(dir: &Path, result: &PipelineResult) -> Result<PathBuf> {
    let base = dir.join(result.execution_id.to_string());

    for job in &result.jobs {
        let job_dir = base.join(&job.job_id);
        std::fs::create_dir_all(&job_dir)
            .with_context(|| format!("Failed to create {}", job_dir.display()))?;

        for step in &job.steps {
            let name = format!("{:02}-{}.log", step.index + 1, step.label);
            let mut content = format!("# {} ({:?})\n", step.name, step.outcome);
            if let Some(reason) = &step.skip_reason {
                content.push_str(&format!("# skipped: {}\n", reason));
            }
            if let Some(error) = &step.error {
                content.push_str(&format!("# error: {}\n", error));
            }
            content.push_str(&step.log);
            std::fs::write(job_dir.join(&name), content)?;
            debug!("Wrote {}", job_dir.join(&name).display());
        }
    }

    Ok(base)
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<bool> {
    println!("{} Validating workflow...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Workflow is valid!", CHECK);
            println!("  Name: {}", style(config.display_name()).bold());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            for job in &config.jobs {
                let needs = job.needs();
                let needs = if needs.is_empty() {
                    String::new()
                } else {
                    format!(" (needs {})", needs.join(", "))
                };
                println!(
                    "    {} - {} step(s){}",
                    style(&job.id).bold(),
                    job.steps.len(),
                    style(needs).dim()
                );
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(true)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            Ok(false)
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store(false).await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    let mut json_data = Vec::new();
    for pipeline_name in &pipelines {
        let executions = store.list_executions(pipeline_name).await?;

        if cmd.with_counts {
            let completed = executions.iter().filter(|e| e.status == ExecutionStatus::Completed).count();
            let failed = executions.iter().filter(|e| e.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }

        json_data.push(serde_json::json!({
            "name": pipeline_name,
            "execution_count": executions.len(),
        }));
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;

        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.verbose)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let executions: Vec<ExecutionSummary> = match &cmd.pipeline {
        Some(pipeline_name) => store
            .list_executions(pipeline_name)
            .await?
            .into_iter()
            .take(cmd.limit)
            .collect(),
        None => store.recent_executions(cmd.limit).await?,
    };

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, verbose: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!(
        "  Event: {}{}",
        style(&summary.event).cyan(),
        summary.branch.as_deref().map(|b| format!(" on {}", b)).unwrap_or_default()
    );
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
    }
    if let Some(duration) = summary.duration().and_then(|d| d.to_std().ok()) {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }

    println!("  Jobs:");
    for job in &summary.jobs {
        println!(
            "    {} {} on {} ({} steps run, {} failed)",
            style(&job.job_id).bold(),
            format_job_status(job.status),
            style(&job.runs_on).dim(),
            job.executed_steps,
            job.failed_steps
        );
        if let Some(error) = &job.error {
            println!("      {}", style(error).dim());
        }
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
