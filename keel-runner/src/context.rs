//! Execution context for a single job
//!
//! Contains all state a job owns while it runs:
//! - Log buffer for collecting step output and lifecycle messages
//! - Workspace directory, private to the job
//! - Environment variables exported to every step
//!
//! Sibling matrix jobs never share a context.

use keel_core::domain::log::{LogEntry, LogLevel};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Execution context of one job
pub struct JobContext {
    /// Display label, `stage (axis=value, ...)`
    pub label: String,

    /// Private working directory
    pub workspace: PathBuf,

    /// Variables exported to every step
    pub env: BTreeMap<String, String>,

    log_buffer: Mutex<Vec<LogEntry>>,
}

impl JobContext {
    /// Creates a new execution context
    ///
    /// The workspace directory is not created here; see [`JobContext::prepare_workspace`].
    pub fn new(label: String, workspace: PathBuf, env: BTreeMap<String, String>) -> Self {
        Self {
            label,
            workspace,
            env,
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Creates an empty workspace directory, replacing leftovers of a previous attempt
    pub fn prepare_workspace(&self) -> std::io::Result<()> {
        if self.workspace.exists() {
            std::fs::remove_dir_all(&self.workspace)?;
        }
        std::fs::create_dir_all(&self.workspace)
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self
            .log_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffer.push(entry);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.add_log(LogEntry::now(level, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self
            .log_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }
}

/// Name of the variable carrying a matrix coordinate
///
/// `python-version` becomes `KEEL_MATRIX_PYTHON_VERSION`.
pub fn matrix_env_name(axis: &str) -> String {
    let normalized: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("KEEL_MATRIX_{}", normalized)
}
