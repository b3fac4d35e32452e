//! Deployment invocation types
//!
//! A [`DeploymentRequest`] is the argument struct of the reusable deployment
//! procedure. The resulting [`DeploymentRecord`] carries no secret material.

use serde::{Deserialize, Serialize};

/// Arguments of one deployment invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub environment: String,
    /// Artifact version, the source commit SHA
    pub version: String,
    /// Environment-specific values override file
    pub values_path: String,
    pub release_name: String,
    /// Chart directory
    pub chart: String,
}

/// Whether the release was created or updated in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseAction {
    Installed,
    Upgraded,
}

/// Successful deployment result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub action: ReleaseAction,
    pub revision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
}

/// Call record of a deployment invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub request: DeploymentRequest,
    pub status: DeploymentStatus,
    pub outcome: Option<DeploymentOutcome>,
    pub error: Option<String>,
    /// Time spent waiting for the environment's deployment gate
    pub queued_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl DeploymentRecord {
    pub fn succeeded(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }
}
