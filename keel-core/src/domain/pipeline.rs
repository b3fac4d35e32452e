//! Pipeline domain types
//!
//! Immutable description of a pipeline: its stages, their dependencies,
//! run conditions, matrix axes and steps. Loaded once at run start and
//! never mutated while a run is in progress.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::condition::RunCondition;

/// Default primary branch when a definition does not name one
pub const DEFAULT_PRIMARY_BRANCH: &str = "main";

/// Pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    /// Branch whose pushes are allowed to publish and deploy
    pub primary_branch: String,
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Declarative node of the stage graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    /// Names of the stages that must fully succeed first
    pub needs: Vec<String>,
    pub condition: RunCondition,
    pub matrix: Vec<MatrixAxis>,
    pub steps: Vec<Step>,
    /// Artifacts collected from the workspace after the last step
    pub artifacts: Vec<ArtifactSpec>,
    /// When set, the stage calls the deployment procedure instead of running steps
    pub deploy: Option<DeploySpec>,
    /// Export repository registry credentials to this stage's jobs
    pub registry: bool,
    pub timeout_seconds: Option<u64>,
}

impl StageDefinition {
    /// Creates a stage with no dependencies, matrix, steps or condition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            condition: RunCondition::Always,
            matrix: Vec::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
            deploy: None,
            registry: false,
            timeout_seconds: None,
        }
    }

    pub fn is_deploy(&self) -> bool {
        self.deploy.is_some()
    }
}

/// Named matrix axis with its ordered values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// One command of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Shell command line
    pub run: String,
    pub env: BTreeMap<String, String>,
}

impl Step {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run: run.into(),
            env: BTreeMap::new(),
        }
    }
}

/// Artifact declared by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    /// File or directory relative to the job workspace
    pub path: String,
}

/// Parameters of the reusable deployment procedure, as declared by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySpec {
    pub target: DeployTarget,
    /// Environment-specific values override file
    pub values_path: String,
    pub release_name: String,
    /// Chart directory
    pub chart: String,
}

/// Where a deploy stage deploys to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    Fixed(String),
    /// Environment chosen by a manual dispatch
    Dispatched,
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployTarget::Fixed(env) => write!(f, "{}", env),
            DeployTarget::Dispatched => write!(f, "<dispatched>"),
        }
    }
}
