//! Reusable deployment procedure
//!
//! Every deploy stage, whatever its environment or trigger, calls
//! [`DeploymentInvoker::invoke`] with a [`DeploymentRequest`]. The invoker
//! holds no per-environment state; mutual exclusion is the caller's job
//! (see [`crate::gate`]).

use keel_core::domain::deployment::{DeploymentOutcome, DeploymentRequest, ReleaseAction};
use keel_core::domain::environment::{Environment, REQUIRED_SECRETS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::backend::{ReleaseBackend, ReleaseSpec};
use super::probe::ReadinessProbe;
use super::values;
use crate::error::DeployError;

pub struct DeploymentInvoker {
    backend: Arc<dyn ReleaseBackend>,
    probe: Arc<dyn ReadinessProbe>,
    /// Directory chart and values paths are resolved against
    source_dir: PathBuf,
    /// Directory for rendered values files
    scratch_dir: PathBuf,
    readiness_window: Duration,
}

impl DeploymentInvoker {
    pub fn new(
        backend: Arc<dyn ReleaseBackend>,
        probe: Arc<dyn ReadinessProbe>,
        source_dir: PathBuf,
        scratch_dir: PathBuf,
        readiness_window: Duration,
    ) -> Self {
        Self {
            backend,
            probe,
            source_dir,
            scratch_dir,
            readiness_window,
        }
    }

    /// Installs or upgrades the release for one environment and waits for readiness
    ///
    /// Idempotent in effect: re-invoking with the same arguments converges
    /// the release to the same state.
    pub async fn invoke(
        &self,
        request: &DeploymentRequest,
        environment: &Environment,
    ) -> Result<DeploymentOutcome, DeployError> {
        let missing = environment.secrets.missing(&REQUIRED_SECRETS);
        if !missing.is_empty() {
            return Err(DeployError::MissingSecrets {
                environment: environment.name.clone(),
                names: missing.into_iter().map(String::from).collect(),
            });
        }
        if environment.app_url.is_none() {
            return Err(DeployError::MissingAppUrl(environment.name.clone()));
        }

        let chart = self.source_dir.join(&request.chart);
        let values_path = self.source_dir.join(&request.values_path);

        info!(
            "Deploying {} version {} to '{}' (namespace {})",
            request.release_name, request.version, environment.name, environment.namespace
        );

        self.backend.update_dependencies(&chart).await?;

        let rendered =
            values::render(&chart, &values_path, &request.version, &environment.secrets).await?;
        let values_file = values::write_private(&rendered, &self.scratch_dir)?;

        let spec = ReleaseSpec {
            release: &request.release_name,
            namespace: &environment.namespace,
            chart: &chart,
            values_file: values_file.path(),
            version: &request.version,
        };

        let existing = self
            .backend
            .current_revision(&request.release_name, &environment.namespace)
            .await?;
        let outcome = match existing {
            None => DeploymentOutcome {
                action: ReleaseAction::Installed,
                revision: self.backend.install(spec).await?,
            },
            Some(previous) => {
                info!(
                    "Release {} exists at revision {}, upgrading",
                    request.release_name, previous
                );
                DeploymentOutcome {
                    action: ReleaseAction::Upgraded,
                    revision: self.backend.upgrade(spec).await?,
                }
            }
        };
        drop(values_file);

        info!(
            "Release {} {:?} at revision {}, waiting for readiness",
            request.release_name, outcome.action, outcome.revision
        );
        self.probe
            .wait_ready(environment, self.readiness_window)
            .await?;

        Ok(outcome)
    }
}
