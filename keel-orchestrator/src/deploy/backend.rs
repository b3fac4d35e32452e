//! Release backends
//!
//! A [`ReleaseBackend`] performs the cluster-side half of a deployment:
//! chart dependency resolution and installing or upgrading a named release.
//! [`HelmBackend`] shells out to the `helm` binary: `dependency update`,
//! `history` to find the current revision, and `upgrade [--install]`.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::DeployError;

/// Arguments of an install or upgrade
#[derive(Debug, Clone, Copy)]
pub struct ReleaseSpec<'a> {
    pub release: &'a str,
    pub namespace: &'a str,
    pub chart: &'a Path,
    /// Rendered values file
    pub values_file: &'a Path,
    pub version: &'a str,
}

#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Resolves the chart's declared dependencies
    async fn update_dependencies(&self, chart: &Path) -> Result<(), DeployError>;

    /// Current revision of a release, `None` when it does not exist
    async fn current_revision(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<Option<u32>, DeployError>;

    /// Creates a new release, returns its revision
    async fn install(&self, spec: ReleaseSpec<'_>) -> Result<u32, DeployError>;

    /// Updates an existing release in place, returns the new revision
    async fn upgrade(&self, spec: ReleaseSpec<'_>) -> Result<u32, DeployError>;
}

/// Helm CLI backend
#[derive(Debug, Clone)]
pub struct HelmBackend {
    binary: String,
}

impl Default for HelmBackend {
    fn default() -> Self {
        Self::new("helm")
    }
}

impl HelmBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that the helm binary can be executed
    pub async fn check_available(&self) -> Result<(), DeployError> {
        let stdout = self.helm(&["version", "--short"]).await?;
        info!("Helm is available: {}", stdout.trim());
        Ok(())
    }

    async fn helm(&self, args: &[&str]) -> Result<String, DeployError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running `{}`", command);

        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DeployError::Command {
                command: command.clone(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("`{}` stderr: {}", command, stderr.trim());
        }

        if !output.status.success() {
            return Err(DeployError::Command {
                command,
                message: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }

    async fn apply(&self, install: bool, spec: ReleaseSpec<'_>) -> Result<u32, DeployError> {
        let chart = spec.chart.to_string_lossy();
        let values = spec.values_file.to_string_lossy();
        let mut args = vec![
            "upgrade",
            spec.release,
            &*chart,
            "--namespace",
            spec.namespace,
            "--values",
            &*values,
            "--output",
            "json",
        ];
        if install {
            args.extend(["--install", "--create-namespace"]);
        }

        let stdout = self.helm(&args).await?;
        parse_revision(&stdout).ok_or_else(|| DeployError::Command {
            command: format!("{} upgrade {}", self.binary, spec.release),
            message: "release revision missing from helm output".to_string(),
        })
    }
}

#[async_trait]
impl ReleaseBackend for HelmBackend {
    async fn update_dependencies(&self, chart: &Path) -> Result<(), DeployError> {
        let chart = chart.to_string_lossy();
        self.helm(&["dependency", "update", &*chart]).await?;
        Ok(())
    }

    async fn current_revision(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<Option<u32>, DeployError> {
        match self
            .helm(&[
                "history",
                release,
                "--namespace",
                namespace,
                "--max",
                "1",
                "--output",
                "json",
            ])
            .await
        {
            Ok(stdout) => Ok(parse_history(&stdout)),
            Err(DeployError::Command { message, .. }) if message.contains("not found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn install(&self, spec: ReleaseSpec<'_>) -> Result<u32, DeployError> {
        self.apply(true, spec).await
    }

    async fn upgrade(&self, spec: ReleaseSpec<'_>) -> Result<u32, DeployError> {
        self.apply(false, spec).await
    }
}

/// Extracts the `version` field of a helm release JSON document
fn parse_revision(output: &str) -> Option<u32> {
    let release: serde_json::Value = serde_json::from_str(output).ok()?;
    release
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

/// Extracts the latest `revision` of a helm history JSON array
fn parse_history(output: &str) -> Option<u32> {
    let history: Vec<serde_json::Value> = serde_json::from_str(output).ok()?;
    history
        .iter()
        .filter_map(|entry| entry.get("revision").and_then(serde_json::Value::as_u64))
        .max()
        .and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_revision() {
        assert_eq!(
            parse_revision(r#"{"name":"app","namespace":"staging","version":4}"#),
            Some(4)
        );
        assert_eq!(parse_revision(r#"{"name":"app"}"#), None);
        assert_eq!(parse_revision("Error: release: not found"), None);
    }

    #[test]
    fn test_parse_history() {
        assert_eq!(
            parse_history(r#"[{"revision":3,"status":"deployed","app_version":"1.0"}]"#),
            Some(3)
        );
        assert_eq!(parse_history("[]"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let backend = HelmBackend::new("keel-helm-binary-that-does-not-exist");
        let result = backend.update_dependencies(Path::new("chart")).await;
        assert!(matches!(result, Err(DeployError::Command { .. })));
    }
}
