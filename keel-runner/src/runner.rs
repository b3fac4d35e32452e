//! Job runner
//!
//! Executes one job (one matrix cell of one stage) to completion:
//! prepares its private workspace, materialises upstream artifacts, runs
//! the steps fail-fast under the job's time budget and publishes the
//! declared artifacts once every step succeeded.

use keel_core::domain::artifact::{Artifact, ArtifactKey};
use keel_core::domain::environment::SecretBindings;
use keel_core::domain::job::{Job, JobResult, JobStatus, MatrixCell};
use keel_core::domain::pipeline::StageDefinition;
use keel_core::domain::trigger::TriggerContext;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::context::{JobContext, matrix_env_name};
use crate::error::ArtifactError;
use crate::execution::ExecutionResult;
use crate::executor::StepExecutor;
use crate::store::{ArtifactStore, build_artifact, collect_files, materialize};

/// Everything a job needs besides the shared runner
pub struct JobRequest {
    pub run_id: Uuid,
    pub stage: Arc<StageDefinition>,
    pub cell: MatrixCell,
    pub trigger: TriggerContext,
    /// Artifacts of the stages this one depends on
    pub inputs: Vec<Arc<Artifact>>,
    /// Credentials exported to the job's environment
    pub secrets: SecretBindings,
}

/// Executes jobs with a pluggable step executor
pub struct JobRunner {
    config: RunnerConfig,
    executor: Arc<dyn StepExecutor>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, executor: Arc<dyn StepExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs a job and returns its terminal record
    ///
    /// Never returns an error: every failure is recorded on the job.
    pub async fn run(&self, request: JobRequest, store: &ArtifactStore) -> Job {
        let mut job = Job::new(request.stage.name.clone(), request.cell.clone());
        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now());

        let label = job.label();
        let workspace = self
            .config
            .workspace_base
            .join(request.run_id.to_string())
            .join(&request.stage.name)
            .join(request.cell.slug());
        let ctx = JobContext::new(label.clone(), workspace, job_env(&request));

        info!("Starting job {}", label);

        let result = match self.prepare(&ctx, &request) {
            Ok(()) => self.execute_with_timeout(&ctx, &request.stage).await,
            Err(e) => ExecutionResult::Failure {
                step: "prepare workspace".to_string(),
                exit_code: 1,
                error: e.to_string(),
            },
        };

        let (status, job_result) = match result {
            ExecutionResult::Success => match self.publish_artifacts(&ctx, &request, store).await {
                Ok(keys) => {
                    job.artifacts = keys;
                    (JobStatus::Succeeded, JobResult::succeeded())
                }
                Err(e) => {
                    ctx.log_error(format!("Failed to publish artifacts: {}", e));
                    (
                        JobStatus::Failed,
                        JobResult::failed(1, format!("Artifact publication failed: {}", e)),
                    )
                }
            },
            other => {
                let status = other.status();
                (status, other.into_job_result())
            }
        };

        match status {
            JobStatus::Succeeded => info!("Job {} succeeded", label),
            _ => warn!(
                "Job {} failed: {}",
                label,
                job_result.error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        job.status = status;
        job.result = Some(job_result);
        job.completed_at = Some(chrono::Utc::now());
        job.logs = ctx.drain_logs();
        job
    }

    /// Creates the workspace and writes upstream artifacts into `inputs/`
    fn prepare(&self, ctx: &JobContext, request: &JobRequest) -> std::io::Result<()> {
        ctx.prepare_workspace()?;

        if request.inputs.is_empty() {
            return Ok(());
        }

        let inputs_dir = ctx.workspace().join("inputs");
        for artifact in &request.inputs {
            materialize(&inputs_dir, artifact).map_err(|e| match e {
                ArtifactError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            })?;
            ctx.log_info(format!("Fetched artifact {}", artifact.key));
        }
        Ok(())
    }

    async fn execute_with_timeout(&self, ctx: &JobContext, stage: &StageDefinition) -> ExecutionResult {
        let budget = stage
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.job_timeout);

        match tokio::time::timeout(budget, self.execute_steps(ctx, stage)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Job {} exceeded its {}s budget", ctx.label, budget.as_secs());
                ctx.log_error(format!("Job timed out after {}s", budget.as_secs()));
                ExecutionResult::Timeout { budget }
            }
        }
    }

    /// Runs steps in order, stopping at the first failure
    async fn execute_steps(&self, ctx: &JobContext, stage: &StageDefinition) -> ExecutionResult {
        for (idx, step) in stage.steps.iter().enumerate() {
            ctx.log_info(format!(
                "Starting step {}/{}: {}",
                idx + 1,
                stage.steps.len(),
                step.name
            ));

            match self.executor.run_step(step, ctx).await {
                Ok(0) => {
                    debug!("Step '{}' of {} completed", step.name, ctx.label);
                    ctx.log_info(format!("Step '{}' completed", step.name));
                }
                Ok(code) => {
                    ctx.log_error(format!("Step '{}' exited with status {}", step.name, code));
                    return ExecutionResult::Failure {
                        step: step.name.clone(),
                        exit_code: code,
                        error: format!("exit status {}", code),
                    };
                }
                Err(e) => {
                    ctx.log_error(format!("Step '{}' could not run: {:#}", step.name, e));
                    return ExecutionResult::Failure {
                        step: step.name.clone(),
                        exit_code: -1,
                        error: format!("{:#}", e),
                    };
                }
            }
        }

        ExecutionResult::Success
    }

    /// Collects every declared artifact first, then publishes them
    async fn publish_artifacts(
        &self,
        ctx: &JobContext,
        request: &JobRequest,
        store: &ArtifactStore,
    ) -> crate::error::Result<Vec<ArtifactKey>> {
        let mut built = Vec::with_capacity(request.stage.artifacts.len());
        for spec in &request.stage.artifacts {
            let files = collect_files(ctx.workspace(), &spec.name, &spec.path)?;
            let key = ArtifactKey::new(request.stage.name.clone(), request.cell.clone(), spec.name.clone());
            built.push(build_artifact(key, files));
        }

        let mut keys = Vec::with_capacity(built.len());
        for artifact in built {
            let published = store.publish(artifact).await?;
            ctx.log_info(format!("Published artifact {}", published.key));
            keys.push(published.key.clone());
        }
        Ok(keys)
    }
}

/// Variables exported to every step of a job
fn job_env(request: &JobRequest) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("KEEL_RUN_ID".to_string(), request.run_id.to_string());
    env.insert("KEEL_STAGE".to_string(), request.stage.name.clone());
    env.insert("KEEL_SHA".to_string(), request.trigger.sha.clone());
    env.insert("KEEL_REF".to_string(), request.trigger.branch.clone());
    env.insert("KEEL_EVENT".to_string(), request.trigger.kind.to_string());
    for (axis, value) in &request.cell.0 {
        env.insert(matrix_env_name(axis), value.clone());
    }
    for (name, value) in request.secrets.iter() {
        env.insert(name.to_string(), value.to_string());
    }
    env
}
