//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod runs;

pub use runs::RunsCommands;

use anyhow::Result;
use clap::Subcommand;
use keel_core::domain::trigger::TriggerKind;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Check a pipeline definition and print its stage graph
    Validate {
        /// Path to the Lua pipeline definition
        #[arg(short, long, default_value = "pipeline.lua")]
        pipeline: PathBuf,
    },
    /// Run the pipeline for a push or pull request event
    Run {
        #[arg(short, long, default_value = "pipeline.lua")]
        pipeline: PathBuf,

        /// Trigger event: push or pull-request
        #[arg(long, default_value = "push", value_parser = parse_event)]
        event: TriggerKind,

        /// Git ref the event happened on (e.g. main or refs/heads/main)
        #[arg(long = "ref")]
        git_ref: String,

        /// Commit SHA, also the version deployed
        #[arg(long)]
        sha: String,
    },
    /// Manually dispatch a deployment to an environment
    Dispatch {
        #[arg(short, long, default_value = "pipeline.lua")]
        pipeline: PathBuf,

        /// Target environment
        #[arg(short, long)]
        environment: String,

        /// Version to deploy, defaults to --sha
        #[arg(long)]
        version: Option<String>,

        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        #[arg(long)]
        sha: Option<String>,
    },
    /// Re-run a failed run with the same trigger
    Rerun {
        #[arg(short, long, default_value = "pipeline.lua")]
        pipeline: PathBuf,

        /// Run ID or unambiguous prefix
        id: String,
    },
    /// Deploy the version a run deployed to one environment onto another
    Promote {
        #[arg(short, long, default_value = "pipeline.lua")]
        pipeline: PathBuf,

        /// Run ID or unambiguous prefix
        id: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
    /// Inspect and clean up finished runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

fn parse_event(s: &str) -> std::result::Result<TriggerKind, String> {
    match TriggerKind::parse(s) {
        Some(TriggerKind::ManualDispatch) => {
            Err("use `keel dispatch` for manual dispatches".to_string())
        }
        Some(kind) => Ok(kind),
        None => Err(format!("unknown event '{}', expected push or pull-request", s)),
    }
}

/// Handle a CLI command
///
/// Returns whether the command succeeded; a finished run that failed is
/// not an error but still yields `false`.
pub async fn handle_command(command: Commands, config: &Config) -> Result<bool> {
    match command {
        Commands::Validate { pipeline } => pipeline::validate(&pipeline),
        Commands::Run {
            pipeline,
            event,
            git_ref,
            sha,
        } => pipeline::run(config, &pipeline, event, git_ref, sha).await,
        Commands::Dispatch {
            pipeline,
            environment,
            version,
            git_ref,
            sha,
        } => pipeline::dispatch(config, &pipeline, environment, version, git_ref, sha).await,
        Commands::Rerun { pipeline, id } => pipeline::rerun(config, &pipeline, &id).await,
        Commands::Promote {
            pipeline,
            id,
            from,
            to,
        } => pipeline::promote(config, &pipeline, &id, &from, &to).await,
        Commands::Runs { command } => runs::handle_runs_command(command, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        assert_eq!(parse_event("push"), Ok(TriggerKind::Push));
        assert_eq!(parse_event("pull-request"), Ok(TriggerKind::PullRequest));
        assert!(parse_event("manual_dispatch").is_err());
        assert!(parse_event("tag").is_err());
    }
}
