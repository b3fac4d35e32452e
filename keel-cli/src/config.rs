//! Configuration module
//!
//! Combines orchestrator and runner configuration loaded from the
//! environment with the global command-line overrides.

use anyhow::{Context, Result};
use keel_orchestrator::OrchestratorConfig;
use keel_runner::RunnerConfig;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub runner: RunnerConfig,
}

impl Config {
    /// Loads configuration from the environment, applies overrides and validates it
    pub fn load(state_dir: Option<PathBuf>, source_dir: Option<PathBuf>) -> Result<Self> {
        let mut orchestrator =
            OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
        if let Some(dir) = state_dir {
            orchestrator.state_dir = dir;
        }
        if let Some(dir) = source_dir {
            orchestrator.source_dir = dir;
        }
        orchestrator.validate()?;

        let runner = RunnerConfig::from_env().context("Invalid runner configuration")?;
        runner.validate()?;

        Ok(Self {
            orchestrator,
            runner,
        })
    }
}
