//! Runner configuration
//!
//! Defines the configurable parameters of the job runner: where job
//! workspaces live, how long a job may run and which shell runs steps.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base directory for job workspaces (`<base>/<run>/<stage>/<cell>`)
    pub workspace_base: PathBuf,

    /// Maximum time a job can run before timing out, unless its stage overrides it
    pub job_timeout: Duration,

    /// Shell used to run step command lines (`<shell> -c <run>`)
    pub shell: String,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(workspace_base: PathBuf) -> Self {
        Self {
            workspace_base,
            job_timeout: Duration::from_secs(1800), // 30 minutes
            shell: "sh".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_WORKSPACE_DIR (optional, default: `<tmp>/keel/workspaces`)
    /// - KEEL_JOB_TIMEOUT (optional, seconds, default: 1800)
    /// - KEEL_SHELL (optional, default: sh)
    pub fn from_env() -> anyhow::Result<Self> {
        let workspace_base = std::env::var("KEEL_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("keel").join("workspaces"));

        let mut config = Self::new(workspace_base);

        if let Ok(raw) = std::env::var("KEEL_JOB_TIMEOUT") {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("KEEL_JOB_TIMEOUT must be a number of seconds, got '{}'", raw))?;
            config.job_timeout = Duration::from_secs(secs);
        }

        if let Ok(shell) = std::env::var("KEEL_SHELL") {
            config.shell = shell;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workspace_base.as_os_str().is_empty() {
            anyhow::bail!("workspace_base cannot be empty");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.shell.trim().is_empty() {
            anyhow::bail!("shell cannot be empty");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("keel").join("workspaces"))
    }
}
