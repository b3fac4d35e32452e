//! Pipeline command handlers
//!
//! Loads a pipeline definition, builds the orchestrator around it and
//! executes runs: validation, trigger-driven runs, manual dispatch,
//! re-runs and promotions. Every finished run is saved to the run store.

use anyhow::{Context, Result, bail};
use colored::*;
use keel_core::domain::pipeline::DeployTarget;
use keel_core::domain::run::{PipelineRun, RunStatus};
use keel_core::domain::trigger::{TriggerEvent, TriggerKind};
use keel_orchestrator::config::{environment_from_env, registry_secrets_from_env};
use keel_orchestrator::deploy::{DeploymentInvoker, HelmBackend, HttpReadinessProbe};
use keel_orchestrator::repository::run_repository;
use keel_orchestrator::{Orchestrator, StageGraph};
use keel_runner::{JobRunner, ShellExecutor};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::runs::print_run_details;
use crate::config::Config;
use crate::id_resolver::load_run;

/// Validate a definition and print its stage graph
pub fn validate(path: &Path) -> Result<bool> {
    let graph = load_graph(path)?;

    println!(
        "{}",
        format!("✓ Pipeline '{}' is valid", graph.pipeline_name())
            .green()
            .bold()
    );
    println!("  Primary branch: {}", graph.primary_branch().cyan());
    println!("  Jobs per run:   {}", graph.job_count());
    println!();

    for stage in graph.stages() {
        println!("  {} {}", "▸".cyan(), stage.name.bold());
        if !stage.needs.is_empty() {
            println!("    Needs:     {}", stage.needs.join(", ").dimmed());
        }
        println!("    When:      {}", stage.condition.to_string().dimmed());
        let cells = graph.cells(&stage.name);
        if cells.len() > 1 {
            println!("    Matrix:    {} cells", cells.len());
        }
        match &stage.deploy {
            Some(deploy) => println!(
                "    Deploys:   {} to {}",
                deploy.release_name,
                deploy.target.to_string().yellow()
            ),
            None => println!("    Steps:     {}", stage.steps.len()),
        }
    }

    Ok(true)
}

/// Run the pipeline for a push or pull request
pub async fn run(
    config: &Config,
    path: &Path,
    event: TriggerKind,
    git_ref: String,
    sha: String,
) -> Result<bool> {
    let trigger = match event {
        TriggerKind::Push => TriggerEvent::Push { git_ref, sha },
        TriggerKind::PullRequest => TriggerEvent::PullRequest { git_ref, sha },
        TriggerKind::ManualDispatch => bail!("use `keel dispatch` for manual dispatches"),
    };

    let orchestrator = build_orchestrator(config, load_graph(path)?, None);
    let run = orchestrator.run(trigger).await;
    finish(config, run).await
}

/// Manually dispatch a deployment
pub async fn dispatch(
    config: &Config,
    path: &Path,
    environment: String,
    version: Option<String>,
    git_ref: String,
    sha: Option<String>,
) -> Result<bool> {
    let Some(sha) = sha.or_else(|| version.clone()) else {
        bail!("dispatch needs --sha or --version");
    };

    let graph = load_graph(path)?;
    if !graph
        .stages()
        .any(|s| matches!(s.deploy.as_ref().map(|d| &d.target), Some(DeployTarget::Dispatched)))
    {
        println!(
            "{}",
            "Warning: no stage deploys to a dispatched environment".yellow()
        );
    }

    let orchestrator = build_orchestrator(config, graph, Some(&environment));
    let run = orchestrator
        .run(TriggerEvent::ManualDispatch {
            environment,
            version,
            git_ref,
            sha,
        })
        .await;
    finish(config, run).await
}

/// Re-run a failed run
pub async fn rerun(config: &Config, path: &Path, id: &str) -> Result<bool> {
    let previous = load_run(&config.orchestrator.runs_dir(), id).await?;
    let orchestrator = build_orchestrator(config, load_graph(path)?, dispatched_env(&previous));

    let run = orchestrator.rerun(&previous).await?;
    finish(config, run).await
}

/// Promote a deployed version to another environment
pub async fn promote(config: &Config, path: &Path, id: &str, from: &str, to: &str) -> Result<bool> {
    let previous = load_run(&config.orchestrator.runs_dir(), id).await?;
    let orchestrator = build_orchestrator(config, load_graph(path)?, Some(to));

    let run = orchestrator.promote(&previous, from, to).await?;
    finish(config, run).await
}

fn load_graph(path: &Path) -> Result<Arc<StageGraph>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline definition: {}", path.display()))?;
    let definition = keel_lua::parse_pipeline_definition(&source)
        .with_context(|| format!("Failed to parse pipeline definition: {}", path.display()))?;
    let graph = StageGraph::build(&definition)
        .with_context(|| format!("Invalid stage graph in {}", path.display()))?;
    Ok(Arc::new(graph))
}

fn dispatched_env(run: &PipelineRun) -> Option<&str> {
    match &run.trigger {
        TriggerEvent::ManualDispatch { environment, .. } => Some(environment.as_str()),
        _ => None,
    }
}

/// Wires the runner, deployment procedure and environment bindings
fn build_orchestrator(
    config: &Config,
    graph: Arc<StageGraph>,
    dispatched: Option<&str>,
) -> Orchestrator {
    let executor = Arc::new(ShellExecutor::new(config.runner.shell.clone()));
    let runner = Arc::new(JobRunner::new(config.runner.clone(), executor));

    let orchestrator_config = &config.orchestrator;
    let probe = HttpReadinessProbe::new(orchestrator_config.readiness_interval);
    let invoker = Arc::new(DeploymentInvoker::new(
        Arc::new(HelmBackend::new(orchestrator_config.helm_binary.clone())),
        Arc::new(probe),
        orchestrator_config.source_dir.clone(),
        orchestrator_config.scratch_dir(),
        orchestrator_config.readiness_timeout,
    ));

    let mut names: Vec<String> = graph
        .fixed_environments()
        .into_iter()
        .map(String::from)
        .collect();
    if let Some(env) = dispatched {
        names.push(env.to_string());
    }
    names.sort();
    names.dedup();

    let mut orchestrator = Orchestrator::new(graph, runner, invoker, orchestrator_config)
        .with_registry_secrets(registry_secrets_from_env());
    for name in names {
        let environment = environment_from_env(&name);
        info!(
            "Environment '{}' has {} secret binding(s)",
            name,
            environment.secrets.names().count()
        );
        orchestrator = orchestrator.with_environment(environment);
    }

    orchestrator
}

/// Persists a finished run, prints it and reports whether it succeeded
async fn finish(config: &Config, run: PipelineRun) -> Result<bool> {
    run_repository::save(&config.orchestrator.runs_dir(), &run)
        .await
        .context("Failed to save run record")?;

    print_run_details(&run, false);

    let succeeded = run.status == RunStatus::Succeeded;
    if succeeded {
        println!("\n{}", format!("✓ Run {} succeeded", run.id).green().bold());
    } else {
        println!("\n{}", format!("✗ Run {} failed", run.id).red().bold());
    }
    Ok(succeeded)
}
