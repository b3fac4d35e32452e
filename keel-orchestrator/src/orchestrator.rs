//! Run orchestration
//!
//! Drives one [`PipelineRun`] over a validated [`StageGraph`]. Every job is
//! a task in a `JoinSet`; each completion re-evaluates which stages became
//! decidable, so a stage starts as soon as its last dependency finishes.
//!
//! A stage is decided once all of its dependencies are terminal:
//! - a dependency that did not succeed skips it, and the skip propagates,
//! - a false run condition skips it,
//! - a deploy stage calls the deployment procedure behind its environment's gate,
//! - any other stage fans out into one job per matrix cell.

use keel_core::domain::deployment::{DeploymentRecord, DeploymentRequest, DeploymentStatus};
use keel_core::domain::environment::{Environment, REGISTRY_SECRETS, SecretBindings};
use keel_core::domain::job::{Job, JobResult, JobStatus, MatrixCell};
use keel_core::domain::log::{LogEntry, LogLevel};
use keel_core::domain::pipeline::{DeploySpec, DeployTarget, StageDefinition};
use keel_core::domain::run::{PipelineRun, RunStatus, StageOutcome, StageReport};
use keel_core::domain::trigger::{TriggerContext, TriggerEvent, TriggerKind};
use keel_runner::{ArtifactStore, JobRequest, JobRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::deploy::DeploymentInvoker;
use crate::error::{DeployError, OrchestratorError, Result};
use crate::gate::DeploymentGates;
use crate::graph::StageGraph;

/// Stage name, terminal job record and, for deploy stages, the call record
type JobOutput = (String, Job, Option<DeploymentRecord>);

/// Runs pipelines of one definition
///
/// Concurrent runs through the same orchestrator share its job concurrency
/// limit. Deployment gates are shared with every orchestrator, in any
/// process, configured with the same state directory.
pub struct Orchestrator {
    graph: Arc<StageGraph>,
    primary_branch: String,
    runner: Arc<JobRunner>,
    invoker: Arc<DeploymentInvoker>,
    gates: Arc<DeploymentGates>,
    environments: HashMap<String, Environment>,
    registry_secrets: SecretBindings,
    job_slots: Arc<Semaphore>,
}

struct StageProgress {
    remaining: usize,
    jobs: Vec<Job>,
}

impl Orchestrator {
    pub fn new(
        graph: Arc<StageGraph>,
        runner: Arc<JobRunner>,
        invoker: Arc<DeploymentInvoker>,
        config: &OrchestratorConfig,
    ) -> Self {
        let primary_branch = config
            .primary_branch
            .clone()
            .unwrap_or_else(|| graph.primary_branch().to_string());

        Self {
            graph,
            primary_branch,
            runner,
            invoker,
            gates: Arc::new(DeploymentGates::with_lock_dir(config.gates_dir())),
            environments: HashMap::new(),
            registry_secrets: SecretBindings::default(),
            job_slots: Arc::new(Semaphore::new(config.max_parallel_jobs)),
        }
    }

    /// Shares in-process deployment gates with other orchestrators
    pub fn with_gates(mut self, gates: Arc<DeploymentGates>) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environments.insert(environment.name.clone(), environment);
        self
    }

    /// Repository-scoped credentials for stages with `registry = true`
    pub fn with_registry_secrets(mut self, secrets: SecretBindings) -> Self {
        self.registry_secrets = secrets;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn primary_branch(&self) -> &str {
        &self.primary_branch
    }

    pub fn gates(&self) -> Arc<DeploymentGates> {
        self.gates.clone()
    }

    /// Runs the pipeline for a trigger event
    ///
    /// Always returns a terminal run; job, stage and deployment failures
    /// are recorded on it.
    pub async fn run(&self, trigger: TriggerEvent) -> PipelineRun {
        self.execute(trigger, None).await
    }

    /// Replays the trigger of a failed run in a new run
    pub async fn rerun(&self, previous: &PipelineRun) -> Result<PipelineRun> {
        if previous.status != RunStatus::Failed {
            return Err(OrchestratorError::NotFailed(previous.id));
        }
        info!("Re-running failed run {}", previous.id);
        Ok(self.execute(previous.trigger.clone(), Some(previous.id)).await)
    }

    /// Deploys the version a run deployed to `from` onto `to`
    ///
    /// Follows the manual dispatch path, gate included.
    pub async fn promote(&self, previous: &PipelineRun, from: &str, to: &str) -> Result<PipelineRun> {
        let record = previous
            .deployment_to(from)
            .ok_or_else(|| OrchestratorError::NoDeployment {
                run: previous.id,
                environment: from.to_string(),
            })?;

        let (git_ref, sha) = match &previous.trigger {
            TriggerEvent::Push { git_ref, sha }
            | TriggerEvent::PullRequest { git_ref, sha }
            | TriggerEvent::ManualDispatch { git_ref, sha, .. } => (git_ref.clone(), sha.clone()),
        };

        info!(
            "Promoting version {} from '{}' to '{}'",
            record.request.version, from, to
        );
        let trigger = TriggerEvent::ManualDispatch {
            environment: to.to_string(),
            version: Some(record.request.version.clone()),
            git_ref,
            sha,
        };
        Ok(self.run(trigger).await)
    }

    async fn execute(&self, trigger: TriggerEvent, rerun_of: Option<Uuid>) -> PipelineRun {
        let mut run = PipelineRun::new(self.graph.pipeline_name(), trigger);
        run.rerun_of = rerun_of;
        run.status = RunStatus::Running;

        let ctx = run.trigger.context();
        let store = Arc::new(ArtifactStore::new(run.id));
        info!(
            "Run {} of '{}' started: {} on '{}' at {}",
            run.id,
            run.pipeline,
            ctx.kind,
            ctx.branch,
            ctx.sha
        );

        // topological order, so one pass decides every decidable stage
        let mut undecided: Vec<String> = self.graph.order().to_vec();
        let mut outcomes: HashMap<String, StageOutcome> = HashMap::new();
        let mut reports: HashMap<String, StageReport> = HashMap::new();
        let mut in_flight: HashMap<String, StageProgress> = HashMap::new();
        let mut task_cells: HashMap<Id, (String, MatrixCell)> = HashMap::new();
        let mut tasks: JoinSet<JobOutput> = JoinSet::new();

        loop {
            let mut i = 0;
            while i < undecided.len() {
                let name = undecided[i].clone();
                let deps = self.graph.dependencies(&name);
                if deps.iter().any(|d| !outcomes.contains_key(*d)) {
                    i += 1;
                    continue;
                }
                undecided.remove(i);

                let Some(stage) = self.graph.stage(&name).cloned() else {
                    continue;
                };

                if let Some(reason) = self.skip_reason(&stage, &deps, &outcomes, &ctx) {
                    info!("Skipping stage '{}': {}", name, reason);
                    let jobs = self
                        .graph
                        .cells(&name)
                        .iter()
                        .map(|cell| Job::new(name.clone(), cell.clone()).skip(reason.clone()))
                        .collect();
                    outcomes.insert(name.clone(), StageOutcome::Skipped);
                    reports.insert(name.clone(), StageReport::skipped(name, reason, jobs));
                    continue;
                }

                let started = match &stage.deploy {
                    Some(deploy) => {
                        self.spawn_deploy(&stage, deploy, &ctx, &mut tasks, &mut task_cells);
                        1
                    }
                    None => {
                        self.spawn_jobs(&stage, run.id, &ctx, &store, &mut tasks, &mut task_cells)
                            .await
                    }
                };
                info!("Stage '{}' started with {} job(s)", name, started);
                in_flight.insert(
                    name,
                    StageProgress {
                        remaining: started,
                        jobs: Vec::with_capacity(started),
                    },
                );
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let (stage_name, job, deployment) = match joined {
                Ok((id, output)) => {
                    task_cells.remove(&id);
                    output
                }
                Err(e) => {
                    let Some((stage_name, cell)) = task_cells.remove(&e.id()) else {
                        error!("Untracked job task failed: {}", e);
                        continue;
                    };
                    error!("Job task of stage '{}' aborted: {}", stage_name, e);
                    let job = crashed_job(&stage_name, cell, &e.to_string());
                    (stage_name, job, None)
                }
            };

            if let Some(record) = deployment {
                run.deployments.push(record);
            }

            let Some(progress) = in_flight.get_mut(&stage_name) else {
                continue;
            };
            progress.remaining -= 1;
            progress.jobs.push(job);
            if progress.remaining == 0 {
                if let Some(progress) = in_flight.remove(&stage_name) {
                    let report = StageReport::from_jobs(stage_name.clone(), progress.jobs);
                    info!("Stage '{}' {}", stage_name, report.outcome);
                    outcomes.insert(stage_name.clone(), report.outcome);
                    reports.insert(stage_name, report);
                }
            }
        }

        run.stages = self
            .graph
            .order()
            .iter()
            .filter_map(|name| reports.remove(name))
            .collect();
        run.status = run.compute_status();
        run.finished_at = Some(chrono::Utc::now());

        info!("Run {} finished: {}", run.id, run.status);
        run
    }

    fn skip_reason(
        &self,
        stage: &StageDefinition,
        deps: &[&str],
        outcomes: &HashMap<String, StageOutcome>,
        ctx: &TriggerContext,
    ) -> Option<String> {
        for dep in deps {
            match outcomes.get(*dep) {
                Some(StageOutcome::Succeeded) => {}
                Some(StageOutcome::Failed) => return Some(format!("dependency '{}' failed", dep)),
                _ => return Some(format!("dependency '{}' was skipped", dep)),
            }
        }

        if !stage.condition.evaluate(ctx, &self.primary_branch) {
            return Some(format!("condition not met: {}", stage.condition));
        }

        if let Some(deploy) = &stage.deploy {
            if ctx.kind == TriggerKind::PullRequest {
                return Some("pull requests never deploy".to_string());
            }
            if deploy.target == DeployTarget::Dispatched && ctx.environment.is_none() {
                return Some("no environment dispatched".to_string());
            }
        }

        None
    }

    async fn spawn_jobs(
        &self,
        stage: &Arc<StageDefinition>,
        run_id: Uuid,
        ctx: &TriggerContext,
        store: &Arc<ArtifactStore>,
        tasks: &mut JoinSet<JobOutput>,
        task_cells: &mut HashMap<Id, (String, MatrixCell)>,
    ) -> usize {
        let inputs = store.produced_by(&stage.needs).await;

        let secrets = if stage.registry {
            let missing = self.registry_secrets.missing(&REGISTRY_SECRETS);
            if !missing.is_empty() {
                warn!(
                    "Stage '{}' requests registry credentials but {} are not bound",
                    stage.name,
                    missing.join(", ")
                );
            }
            self.registry_secrets.subset(&REGISTRY_SECRETS)
        } else {
            SecretBindings::default()
        };

        let cells = self.graph.cells(&stage.name);
        for cell in cells {
            let request = JobRequest {
                run_id,
                stage: stage.clone(),
                cell: cell.clone(),
                trigger: ctx.clone(),
                inputs: inputs.clone(),
                secrets: secrets.clone(),
            };
            let runner = self.runner.clone();
            let store = store.clone();
            let slots = self.job_slots.clone();
            let stage_name = stage.name.clone();

            let handle = tasks.spawn(async move {
                let _slot = slots.acquire_owned().await.ok();
                let job = runner.run(request, &store).await;
                (stage_name, job, None)
            });
            task_cells.insert(handle.id(), (stage.name.clone(), cell.clone()));
        }
        cells.len()
    }

    fn spawn_deploy(
        &self,
        stage: &Arc<StageDefinition>,
        deploy: &DeploySpec,
        ctx: &TriggerContext,
        tasks: &mut JoinSet<JobOutput>,
        task_cells: &mut HashMap<Id, (String, MatrixCell)>,
    ) {
        let environment_name = match &deploy.target {
            DeployTarget::Fixed(env) => env.clone(),
            DeployTarget::Dispatched => ctx.environment.clone().unwrap_or_default(),
        };
        let request = DeploymentRequest {
            environment: environment_name.clone(),
            version: ctx.sha.clone(),
            values_path: deploy.values_path.clone(),
            release_name: deploy.release_name.clone(),
            chart: deploy.chart.clone(),
        };
        let environment = self.environments.get(&environment_name).cloned();
        let gates = self.gates.clone();
        let invoker = self.invoker.clone();
        let stage_name = stage.name.clone();

        let handle = tasks.spawn(async move {
            let (job, record) = deploy_job(&stage_name, request, environment, &gates, &invoker).await;
            (stage_name, job, Some(record))
        });
        task_cells.insert(handle.id(), (stage.name.clone(), MatrixCell::empty()));
    }
}

/// Runs the deployment procedure for one deploy stage while holding the gate
async fn deploy_job(
    stage: &str,
    request: DeploymentRequest,
    environment: Option<Environment>,
    gates: &DeploymentGates,
    invoker: &DeploymentInvoker,
) -> (Job, DeploymentRecord) {
    let mut job = Job::new(stage, MatrixCell::empty());
    job.status = JobStatus::Running;
    job.started_at = Some(chrono::Utc::now());

    let mut queued_ms = 0;
    let mut started_at = chrono::Utc::now();

    let result = match environment {
        None => Err(DeployError::UnknownEnvironment(request.environment.clone())),
        Some(environment) => {
            job.logs.push(LogEntry::now(
                LogLevel::Info,
                format!("Waiting for deployment gate of '{}'", environment.name),
            ));
            match gates.acquire(&environment.name).await {
                Ok(token) => {
                    queued_ms = token.queued().as_millis() as u64;
                    started_at = chrono::Utc::now();
                    job.logs.push(LogEntry::now(
                        LogLevel::Info,
                        format!(
                            "Acquired deployment gate of '{}' after {}ms",
                            environment.name, queued_ms
                        ),
                    ));
                    let result = invoker.invoke(&request, &environment).await;
                    gates.release(token);
                    result
                }
                Err(e) => Err(e),
            }
        }
    };

    let finished_at = chrono::Utc::now();
    job.completed_at = Some(finished_at);

    let record = match result {
        Ok(outcome) => {
            job.logs.push(LogEntry::now(
                LogLevel::Info,
                format!(
                    "Release {} {:?} at revision {} in '{}'",
                    request.release_name, outcome.action, outcome.revision, request.environment
                ),
            ));
            job.status = JobStatus::Succeeded;
            job.result = Some(JobResult::succeeded());
            DeploymentRecord {
                request,
                status: DeploymentStatus::Succeeded,
                outcome: Some(outcome),
                error: None,
                queued_ms,
                started_at,
                finished_at,
            }
        }
        Err(e) => {
            error!("Deployment to '{}' failed: {}", request.environment, e);
            job.logs.push(LogEntry::now(LogLevel::Error, e.to_string()));
            job.status = JobStatus::Failed;
            job.result = Some(JobResult::failed(1, e.to_string()));
            DeploymentRecord {
                request,
                status: DeploymentStatus::Failed,
                outcome: None,
                error: Some(e.to_string()),
                queued_ms,
                started_at,
                finished_at,
            }
        }
    };

    (job, record)
}

fn crashed_job(stage: &str, cell: MatrixCell, message: &str) -> Job {
    let mut job = Job::new(stage, cell);
    job.status = JobStatus::Failed;
    job.completed_at = Some(chrono::Utc::now());
    job.result = Some(JobResult::failed(1, format!("job task aborted: {}", message)));
    job
}
