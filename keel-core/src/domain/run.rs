//! Pipeline run types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deployment::DeploymentRecord;
use super::job::{Job, JobStatus};
use super::trigger::TriggerEvent;

/// One invocation of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerEvent,
    /// Run this one re-executes
    pub rerun_of: Option<Uuid>,
    pub status: RunStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Stage reports in topological order
    pub stages: Vec<StageReport>,
    pub deployments: Vec<DeploymentRecord>,
}

impl PipelineRun {
    pub fn new(pipeline: impl Into<String>, trigger: TriggerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            rerun_of: None,
            status: RunStatus::Pending,
            created_at: chrono::Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            deployments: Vec::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Worst outcome among non-skipped stages; a run with only skipped stages succeeded
    pub fn compute_status(&self) -> RunStatus {
        if self
            .stages
            .iter()
            .any(|s| s.outcome == StageOutcome::Failed)
        {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }

    /// Latest successful deployment to an environment
    pub fn deployment_to(&self, environment: &str) -> Option<&DeploymentRecord> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.request.environment == environment && d.succeeded())
    }
}

/// Status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Aggregate result of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Succeeded,
    Failed,
    /// Deliberate no-op: condition false or a dependency did not succeed
    Skipped,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Succeeded => write!(f, "Succeeded"),
            StageOutcome::Failed => write!(f, "Failed"),
            StageOutcome::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Per-stage detail kept for diagnosis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub outcome: StageOutcome,
    pub skip_reason: Option<String>,
    pub jobs: Vec<Job>,
}

impl StageReport {
    /// Aggregates finished jobs: failed if any cell failed
    pub fn from_jobs(name: impl Into<String>, jobs: Vec<Job>) -> Self {
        let outcome = if jobs.iter().any(|j| j.status == JobStatus::Failed) {
            StageOutcome::Failed
        } else if !jobs.is_empty() && jobs.iter().all(|j| j.status == JobStatus::Skipped) {
            StageOutcome::Skipped
        } else {
            StageOutcome::Succeeded
        };
        Self {
            name: name.into(),
            outcome,
            skip_reason: None,
            jobs,
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>, jobs: Vec<Job>) -> Self {
        Self {
            name: name.into(),
            outcome: StageOutcome::Skipped,
            skip_reason: Some(reason.into()),
            jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::MatrixCell;

    fn job(status: JobStatus) -> Job {
        let mut job = Job::new("test", MatrixCell::empty());
        job.status = status;
        job
    }

    #[test]
    fn test_stage_fails_when_any_cell_fails() {
        let report = StageReport::from_jobs(
            "test",
            vec![job(JobStatus::Succeeded), job(JobStatus::Failed)],
        );
        assert_eq!(report.outcome, StageOutcome::Failed);
    }

    #[test]
    fn test_run_status_ignores_skipped_stages() {
        let mut run = PipelineRun::new(
            "todo",
            TriggerEvent::Push {
                git_ref: "feature/x".to_string(),
                sha: "abc".to_string(),
            },
        );
        run.stages
            .push(StageReport::from_jobs("test", vec![job(JobStatus::Succeeded)]));
        run.stages
            .push(StageReport::skipped("publish", "condition false", vec![]));
        assert_eq!(run.compute_status(), RunStatus::Succeeded);

        run.stages
            .push(StageReport::from_jobs("lint", vec![job(JobStatus::Failed)]));
        assert_eq!(run.compute_status(), RunStatus::Failed);
    }
}
