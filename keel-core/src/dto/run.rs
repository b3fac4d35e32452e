//! Run summary DTO

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunStatus, StageOutcome};
use crate::domain::trigger::TriggerKind;

/// Run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: TriggerKind,
    pub sha: String,
    pub status: RunStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub succeeded_stages: usize,
    pub failed_stages: usize,
    pub skipped_stages: usize,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        let count =
            |outcome: StageOutcome| run.stages.iter().filter(|s| s.outcome == outcome).count();
        Self {
            id: run.id,
            pipeline: run.pipeline.clone(),
            trigger: run.trigger.kind(),
            sha: run.trigger.context().sha,
            status: run.status,
            created_at: run.created_at,
            succeeded_stages: count(StageOutcome::Succeeded),
            failed_stages: count(StageOutcome::Failed),
            skipped_stages: count(StageOutcome::Skipped),
        }
    }
}
