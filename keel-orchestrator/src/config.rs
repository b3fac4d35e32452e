//! Orchestrator configuration
//!
//! Loaded once at startup from environment variables, then validated.
//! Environment secret bindings are looked up per environment name as
//! `KEEL_SECRET_<ENV>_<NAME>`.

use keel_core::domain::environment::{
    Environment, REGISTRY_SECRETS, REQUIRED_SECRETS, SecretBindings,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding run records and rendered values
    pub state_dir: PathBuf,

    /// Checkout that chart and values paths are relative to
    pub source_dir: PathBuf,

    /// Overrides the primary branch named by the pipeline definition
    pub primary_branch: Option<String>,

    /// Upper bound on concurrently running jobs across a run
    pub max_parallel_jobs: usize,

    /// Post-deploy window for the application to report ready
    pub readiness_timeout: Duration,

    pub readiness_interval: Duration,

    /// How long finished runs and their workspaces are kept
    pub retention: Duration,

    pub helm_binary: String,
}

impl OrchestratorConfig {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            source_dir: PathBuf::from("."),
            primary_branch: None,
            max_parallel_jobs: 8,
            readiness_timeout: Duration::from_secs(120),
            readiness_interval: Duration::from_secs(5),
            retention: Duration::from_secs(14 * 24 * 60 * 60),
            helm_binary: "helm".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - KEEL_STATE_DIR (optional, default: .keel)
    /// - KEEL_SOURCE_DIR (optional, default: .)
    /// - KEEL_PRIMARY_BRANCH (optional)
    /// - KEEL_MAX_PARALLEL_JOBS (optional, default: 8)
    /// - KEEL_READINESS_TIMEOUT (optional, seconds, default: 120)
    /// - KEEL_RETENTION_DAYS (optional, default: 14)
    /// - KEEL_HELM (optional, default: helm)
    pub fn from_env() -> anyhow::Result<Self> {
        let state_dir = std::env::var("KEEL_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".keel"));

        let mut config = Self::new(state_dir);

        if let Ok(dir) = std::env::var("KEEL_SOURCE_DIR") {
            config.source_dir = PathBuf::from(dir);
        }

        if let Ok(branch) = std::env::var("KEEL_PRIMARY_BRANCH") {
            config.primary_branch = Some(branch);
        }

        if let Some(jobs) = parse_var::<usize>("KEEL_MAX_PARALLEL_JOBS")? {
            config.max_parallel_jobs = jobs;
        }

        if let Some(secs) = parse_var::<u64>("KEEL_READINESS_TIMEOUT")? {
            config.readiness_timeout = Duration::from_secs(secs);
        }

        if let Some(days) = parse_var::<u64>("KEEL_RETENTION_DAYS")? {
            config.retention = retention_from_days(days)?;
        }

        if let Ok(helm) = std::env::var("KEEL_HELM") {
            config.helm_binary = helm;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            anyhow::bail!("state_dir cannot be empty");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.readiness_timeout.is_zero() {
            anyhow::bail!("readiness_timeout must be greater than 0");
        }

        if self.readiness_interval.is_zero() || self.readiness_interval > self.readiness_timeout {
            anyhow::bail!("readiness_interval must be between 0 and readiness_timeout");
        }

        if self.primary_branch.as_deref().is_some_and(|b| b.trim().is_empty()) {
            anyhow::bail!("primary_branch cannot be empty");
        }

        Ok(())
    }

    /// Directory of persisted run records
    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir.join("runs")
    }

    /// Directory for short-lived rendered values files
    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir.join("scratch")
    }

    /// Directory of per-environment deployment lock files
    pub fn gates_dir(&self) -> PathBuf {
        self.state_dir.join("gates")
    }
}

/// Converts a retention window in days, rejecting values that overflow
pub fn retention_from_days(days: u64) -> anyhow::Result<Duration> {
    days.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("retention of {} days is out of range", days))
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(".keel"))
    }
}

/// Loads an environment's bindings from `KEEL_SECRET_<ENV>_<NAME>` and
/// `KEEL_APP_URL_<ENV>` / `KEEL_NAMESPACE_<ENV>`
pub fn environment_from_env(name: &str) -> Environment {
    environment_from_vars(name, |key| std::env::var(key).ok())
}

/// Loads repository-scoped registry credentials from `KEEL_SECRET_<NAME>`
pub fn registry_secrets_from_env() -> SecretBindings {
    REGISTRY_SECRETS
        .iter()
        .filter_map(|name| {
            std::env::var(format!("KEEL_SECRET_{}", name))
                .ok()
                .map(|value| (name.to_string(), value))
        })
        .collect()
}

fn environment_from_vars(name: &str, lookup: impl Fn(&str) -> Option<String>) -> Environment {
    let key = env_key(name);
    let mut environment = Environment::new(name);

    for secret in REQUIRED_SECRETS {
        if let Some(value) = lookup(&format!("KEEL_SECRET_{}_{}", key, secret)) {
            environment.secrets.insert(secret, value);
        }
    }
    environment.app_url = lookup(&format!("KEEL_APP_URL_{}", key));
    if environment.app_url.is_none() {
        warn!(
            "KEEL_APP_URL_{} is not set, deployments to '{}' will fail their readiness check",
            key, name
        );
    }
    if let Some(namespace) = lookup(&format!("KEEL_NAMESPACE_{}", key)) {
        environment.namespace = namespace;
    }

    environment
}

/// `staging-eu` -> `STAGING_EU`
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_var<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative number, got '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}
