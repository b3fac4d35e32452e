//! ID resolver module
//!
//! Resolves run id prefixes to full UUIDs against the run store, so users
//! can type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use keel_core::domain::run::PipelineRun;
use keel_orchestrator::StoreError;
use keel_orchestrator::repository::run_repository;
use std::path::Path;
use uuid::Uuid;

/// Resolve a run ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if no run or more than one run matches the prefix.
pub async fn resolve_run_id(runs_dir: &Path, id_or_prefix: &str) -> Result<Uuid> {
    match run_repository::resolve_prefix(runs_dir, id_or_prefix).await {
        Ok(id) => Ok(id),
        Err(StoreError::NotFound(prefix)) => {
            Err(anyhow!("No run found with ID starting with '{}'", prefix))
        }
        Err(StoreError::Ambiguous { prefix, matches }) => Err(anyhow!(
            "Ambiguous prefix '{}' matches multiple runs: {}",
            prefix,
            matches.join(", ")
        )),
        Err(e) => Err(e).context("Failed to read run records for ID resolution"),
    }
}

/// Resolve and load a run record
pub async fn load_run(runs_dir: &Path, id_or_prefix: &str) -> Result<PipelineRun> {
    let id = resolve_run_id(runs_dir, id_or_prefix).await?;
    run_repository::find_by_id(runs_dir, id)
        .await
        .with_context(|| format!("Failed to read run {}", id))?
        .ok_or_else(|| anyhow!("Run {} not found", id))
}
