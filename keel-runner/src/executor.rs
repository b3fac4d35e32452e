//! Step execution
//!
//! A [`StepExecutor`] runs one step of a job inside the job's context and
//! reports its exit code. [`ShellExecutor`] runs the step's command line with
//! a shell in the job workspace and streams its output into the job log.

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use keel_core::domain::log::LogLevel;
use keel_core::domain::pipeline::Step;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::context::JobContext;

/// Runs a single step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Executes a step and returns its exit code
    ///
    /// `Err` means the step could not be started at all; the runner treats it
    /// the same as a non-zero exit.
    async fn run_step(&self, step: &Step, ctx: &JobContext) -> Result<i32>;
}

/// Executes steps as `<shell> -c <run>` child processes
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn run_step(&self, step: &Step, ctx: &JobContext) -> Result<i32> {
        debug!("Executing step '{}' of {}: {}", step.name, ctx.label, step.run);

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&step.run)
            .current_dir(ctx.workspace())
            .envs(&ctx.env)
            .envs(&step.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out job drops this future; the child must not outlive it
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for step '{}'", self.shell, step.name))?;

        let stdout = child.stdout.take().context("stdout not captured")?;
        let stderr = child.stderr.take().context("stderr not captured")?;

        let (_, _, status) = tokio::join!(
            forward_lines(stdout, ctx, LogLevel::Info),
            forward_lines(stderr, ctx, LogLevel::Warning),
            child.wait()
        );

        let status = status.context("Failed to wait for step process")?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Copies each output line of a child process into the job log
async fn forward_lines<R: AsyncRead + Unpin>(reader: R, ctx: &JobContext, level: LogLevel) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        ctx.log(level, line);
    }
}
