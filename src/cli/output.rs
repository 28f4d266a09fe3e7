//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobResult, JobStatus, StepOutcome},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Create a progress bar over jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::NotTriggered => style("NOT TRIGGERED").dim().to_string(),
    }
}

pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Pending => style("PENDING").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Success => style("SUCCESS").green().to_string(),
        JobStatus::Failure => style("FAILURE").red().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        JobStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

fn outcome_icon(outcome: StepOutcome) -> Emoji<'static, 'static> {
    match outcome {
        StepOutcome::Success => CHECK,
        StepOutcome::Failure => CROSS,
        StepOutcome::Skipped => SKIP,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    let branch = summary
        .branch
        .as_deref()
        .map(|b| format!(" on {}", b))
        .unwrap_or_default();

    format!(
        "{} {} - {} - {} ({}{}) - {} jobs, {} failed",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.event,
        branch,
        style(summary.jobs.len()).cyan(),
        style(summary.failed_jobs()).red()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            event,
            jobs,
        } => format!(
            "{} Starting pipeline {} for {} ({} jobs, {})",
            ROCKET,
            style(pipeline_name).bold(),
            style(event).cyan(),
            jobs,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::JobStarted { job_id, runs_on } => {
            format!("{} {} on {}", SPINNER, style(job_id).cyan().bold(), style(runs_on).dim())
        }
        ExecutionEvent::StepStarted { job_id, name, .. } => {
            format!("  {} {}", style(format!("[{}]", job_id)).dim(), name)
        }
        ExecutionEvent::StepFinished {
            job_id,
            name,
            outcome,
            error,
            ..
        } => {
            let detail = error
                .as_deref()
                .map(|e| format!(": {}", style(e).red()))
                .unwrap_or_default();
            format!(
                "  {} {}{}{}",
                style(format!("[{}]", job_id)).dim(),
                outcome_icon(*outcome),
                name,
                detail
            )
        }
        ExecutionEvent::StepSkipped {
            job_id,
            name,
            reason,
            ..
        } => format!(
            "  {} {}{} ({})",
            style(format!("[{}]", job_id)).dim(),
            SKIP,
            style(name).dim(),
            style(reason).dim()
        ),
        ExecutionEvent::CacheRestored {
            job_id,
            matched_key,
            exact,
            ..
        } => format!(
            "  {} {}Cache {} from {}",
            style(format!("[{}]", job_id)).dim(),
            PACKAGE,
            if *exact { "hit" } else { "partially restored" },
            style(matched_key).dim()
        ),
        ExecutionEvent::CacheMissed { job_id, key } => format!(
            "  {} {}Cache miss for {}",
            style(format!("[{}]", job_id)).dim(),
            PACKAGE,
            style(key).dim()
        ),
        ExecutionEvent::CacheUnavailable { job_id, error, .. } => format!(
            "  {} {}Cache unavailable: {}",
            style(format!("[{}]", job_id)).dim(),
            WARN,
            style(error).yellow()
        ),
        ExecutionEvent::CacheSaved { job_id, key } => format!(
            "  {} {}Cache saved as {}",
            style(format!("[{}]", job_id)).dim(),
            PACKAGE,
            style(key).dim()
        ),
        ExecutionEvent::JobFinished { job_id, status, error } => {
            let icon = match status {
                JobStatus::Success => CHECK,
                JobStatus::Failure => CROSS,
                JobStatus::Skipped => SKIP,
                _ => WARN,
            };
            let detail = error
                .as_deref()
                .map(|e| format!(" ({})", style(e).dim()))
                .unwrap_or_default();
            format!("{} {} {}{}", icon, style(job_id).bold(), format_job_status(*status), detail)
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => format_status(*other),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(short_id(execution_id)).dim(),
                status_str
            )
        }
    }
}

/// Format a job's result as a short report
pub fn format_job_report(job: &JobResult) -> String {
    let mut lines = vec![format!(
        "{} {} - {} step(s) run",
        style(&job.job_id).bold(),
        format_job_status(job.status),
        job.executed_steps()
    )];

    for step in &job.steps {
        let mut line = format!("    {}{}", outcome_icon(step.outcome), step.name);
        if let Some(error) = &step.error {
            line.push_str(&format!(" - {}", style(error).red()));
        }
        if step.outcome == StepOutcome::Failure && step.continue_on_error {
            line.push_str(&format!(" {}", style("(allowed to fail)").dim()));
        }
        lines.push(line);
    }

    lines.join("\n")
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
