//! Run command handlers
//!
//! Lists, shows and garbage-collects persisted runs.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use keel_core::domain::job::{Job, JobStatus};
use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::run::{PipelineRun, RunStatus, StageOutcome};
use keel_core::dto::run::RunSummary;
use keel_orchestrator::config::retention_from_days;
use keel_orchestrator::repository::run_repository;

use crate::config::Config;
use crate::id_resolver::load_run;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunsCommands {
    /// List all runs, newest first
    List {
        /// Print summaries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show run details
    Show {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print every job's log
        #[arg(long)]
        logs: bool,

        /// Print the full run record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete runs and workspaces older than the retention window
    Gc {
        /// Override the configured retention window
        #[arg(long)]
        retention_days: Option<u64>,
    },
}

/// Handle run commands
pub async fn handle_runs_command(command: RunsCommands, config: &Config) -> Result<bool> {
    match command {
        RunsCommands::List { json } => list_runs(config, json).await?,
        RunsCommands::Show { id, logs, json } => show_run(config, &id, logs, json).await?,
        RunsCommands::Gc { retention_days } => gc_runs(config, retention_days).await?,
    }
    Ok(true)
}

async fn list_runs(config: &Config, json: bool) -> Result<()> {
    let runs = run_repository::list_all(&config.orchestrator.runs_dir())
        .await
        .context("Failed to list runs")?;

    if json {
        let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_run_summary(&RunSummary::from(run));
        }
    }

    Ok(())
}

async fn show_run(config: &Config, id: &str, logs: bool, json: bool) -> Result<()> {
    let run = load_run(&config.orchestrator.runs_dir(), id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run_details(&run, logs);
    }
    Ok(())
}

async fn gc_runs(config: &Config, retention_days: Option<u64>) -> Result<()> {
    let retention = match retention_days {
        Some(days) => retention_from_days(days)?,
        None => config.orchestrator.retention,
    };
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| chrono::Utc::now().checked_sub_signed(retention))
        .context("Retention window out of range")?;

    let deleted = run_repository::delete_created_before(&config.orchestrator.runs_dir(), cutoff)
        .await
        .context("Failed to delete expired runs")?;

    for id in &deleted {
        let workspace = config.runner.workspace_base.join(id.to_string());
        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => println!(
                "{}",
                format!("Warning: could not remove {}: {}", workspace.display(), e).yellow()
            ),
        }
    }

    println!(
        "{}",
        format!(
            "✓ Removed {} run(s) created before {}",
            deleted.len(),
            cutoff.format("%Y-%m-%d %H:%M:%S")
        )
        .green()
        .bold()
    );
    Ok(())
}

/// Print a run summary
fn print_run_summary(summary: &RunSummary) {
    println!(
        "  {} Run {} {}",
        "▸".cyan(),
        summary.id.to_string().dimmed(),
        colorize_run_status(&summary.status)
    );
    println!("    Pipeline: {}", summary.pipeline.bold());
    println!("    Trigger:  {} @ {}", summary.trigger, summary.sha.dimmed());
    println!(
        "    Stages:   {} succeeded, {} failed, {} skipped",
        summary.succeeded_stages.to_string().green(),
        summary.failed_stages.to_string().red(),
        summary.skipped_stages.to_string().dimmed()
    );
    println!(
        "    Created:  {}",
        summary
            .created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed run information
pub fn print_run_details(run: &PipelineRun, show_logs: bool) {
    let context = run.trigger.context();

    println!("{}", "Run Details:".bold());
    println!("  ID:       {}", run.id.to_string().cyan());
    println!("  Pipeline: {}", run.pipeline.bold());
    println!("  Status:   {}", colorize_run_status(&run.status));
    println!("  Trigger:  {} on '{}'", context.kind, context.branch);
    println!("  Version:  {}", context.sha);
    if let Some(env) = &context.environment {
        println!("  Target:   {}", env.yellow());
    }
    if let Some(original) = run.rerun_of {
        println!("  Re-run of {}", original.to_string().dimmed());
    }
    println!("  Created:  {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = run.finished_at {
        let seconds = finished.signed_duration_since(run.created_at).num_seconds();
        println!("  Duration: {}s", seconds);
    }

    println!("\n{}", "Stages:".bold());
    for stage in &run.stages {
        println!("  {} {} {}", "▸".cyan(), stage.name.bold(), colorize_outcome(&stage.outcome));
        if let Some(reason) = &stage.skip_reason {
            println!("    {}", reason.dimmed());
            continue;
        }
        for job in &stage.jobs {
            print_job_line(job);
            if show_logs {
                for log in &job.logs {
                    print!("        ");
                    print_log_entry(log);
                }
            }
        }
    }

    if !run.deployments.is_empty() {
        println!("\n{}", "Deployments:".bold());
        for deployment in &run.deployments {
            let request = &deployment.request;
            let result = match (&deployment.outcome, &deployment.error) {
                (Some(outcome), _) => format!("{:?} revision {}", outcome.action, outcome.revision)
                    .green()
                    .to_string(),
                (None, Some(error)) => error.red().to_string(),
                (None, None) => "no result".dimmed().to_string(),
            };
            println!(
                "  {} {} {} -> {}: {}",
                "▸".cyan(),
                request.release_name.bold(),
                request.version.dimmed(),
                request.environment.yellow(),
                result
            );
            if deployment.queued_ms > 0 {
                println!("    Queued behind gate for {}ms", deployment.queued_ms);
            }
        }
    }
}

fn print_job_line(job: &Job) {
    let label = if job.cell.is_empty() {
        "job".to_string()
    } else {
        job.cell.to_string()
    };
    print!("    {} {}", label, colorize_job_status(&job.status));
    match &job.result {
        Some(result) if !result.success && job.status == JobStatus::Failed => {
            println!(
                " {}",
                result.error_message.as_deref().unwrap_or("failed").red()
            );
        }
        _ => println!(),
    }
}

/// Print a log entry
fn print_log_entry(log: &LogEntry) {
    let level_str = format!("{:?}", log.level).to_uppercase();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}

fn colorize_run_status(status: &RunStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
    }
}

fn colorize_outcome(outcome: &StageOutcome) -> colored::ColoredString {
    let outcome_str = outcome.to_string();
    match outcome {
        StageOutcome::Succeeded => outcome_str.green(),
        StageOutcome::Failed => outcome_str.red(),
        StageOutcome::Skipped => outcome_str.dimmed(),
    }
}

fn colorize_job_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Succeeded => status_str.green(),
        JobStatus::Failed => status_str.red(),
        JobStatus::Skipped => status_str.dimmed(),
    }
}
