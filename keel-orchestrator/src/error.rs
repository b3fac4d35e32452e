//! Orchestrator error types
//!
//! Job and stage failures are recorded on the run, never returned as errors.
//! These types cover what stops a run from being built or a deployment from
//! being attempted.

use thiserror::Error;
use uuid::Uuid;

/// Invalid stage graph, detected before any job starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle through stage '{0}'")]
    Cycle(String),

    #[error("matrix axis '{axis}' of stage '{stage}' has no values")]
    EmptyAxis { stage: String, axis: String },

    #[error("matrix axis '{axis}' of stage '{stage}' is declared more than once")]
    DuplicateAxis { stage: String, axis: String },

    #[error("stage '{0}' has neither steps nor a deploy block")]
    EmptyStage(String),

    #[error("stage '{0}' has both steps and a deploy block")]
    ConflictingStage(String),

    #[error("deploy stage '{0}' cannot have a matrix")]
    DeployMatrix(String),
}

/// Failure of the deployment procedure
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("environment '{0}' is not configured")]
    UnknownEnvironment(String),

    #[error("environment '{environment}' is missing secret bindings: {}", names.join(", "))]
    MissingSecrets {
        environment: String,
        names: Vec<String>,
    },

    #[error("failed to render values from '{path}': {message}")]
    Values { path: String, message: String },

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("environment '{0}' has no application URL to probe for readiness")]
    MissingAppUrl(String),

    #[error("environment '{environment}' did not become ready within {seconds}s")]
    NotReady { environment: String, seconds: u64 },

    #[error("deployment gate for '{0}' is closed")]
    GateClosed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Run store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run '{0}' not found")]
    NotFound(String),

    #[error("ambiguous prefix '{prefix}' matches runs: {}", matches.join(", "))]
    Ambiguous { prefix: String, matches: Vec<String> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid run record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors of orchestrator operations that cannot start a run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run {0} did not fail; only failed runs can be re-run")]
    NotFailed(Uuid),

    #[error("run {run} has no successful deployment to '{environment}'")]
    NoDeployment { run: Uuid, environment: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
