//! Job domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactKey;
use super::log::LogEntry;

/// Coordinates of one matrix combination, in axis declaration order
///
/// A stage without a matrix has exactly one job with an empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MatrixCell(pub Vec<(String, String)>);

impl MatrixCell {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of an axis in this cell
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    /// Filesystem-safe name for this cell, `default` when empty
    ///
    /// Distinct cells always get distinct slugs: coordinates are written as
    /// `name=value` joined by `+`, and any byte outside `[A-Za-z0-9._-]` is
    /// percent-encoded.
    pub fn slug(&self) -> String {
        if self.0.is_empty() {
            return "default".to_string();
        }
        self.0
            .iter()
            .map(|(name, value)| format!("{}={}", path_segment(name), path_segment(value)))
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Percent-encodes a name into a single path component
///
/// Injective; bytes outside `[A-Za-z0-9._-]` are written as `%XX`.
pub fn path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    // "." and ".." must not name a directory
    if out.chars().all(|c| c == '.') && !out.is_empty() {
        out = out.replace('.', "%2E");
    }
    out
}

impl std::fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let coords: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}", coords.join(", "))
    }
}

/// Job execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub stage: String,
    pub cell: MatrixCell,
    pub status: JobStatus,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub artifacts: Vec<ArtifactKey>,
    pub result: Option<JobResult>,
    pub logs: Vec<LogEntry>,
}

impl Job {
    pub fn new(stage: impl Into<String>, cell: MatrixCell) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: stage.into(),
            cell,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            artifacts: Vec::new(),
            result: None,
            logs: Vec::new(),
        }
    }

    /// Display label: `stage` or `stage (axis=value, ...)`
    pub fn label(&self) -> String {
        if self.cell.is_empty() {
            self.stage.clone()
        } else {
            format!("{} ({})", self.stage, self.cell)
        }
    }

    /// Marks a job that was never attempted
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.status = JobStatus::Skipped;
        self.result = Some(JobResult {
            success: false,
            exit_code: 0,
            error_message: Some(reason.into()),
        });
        self
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Result of a job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

impl JobResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: 0,
            error_message: None,
        }
    }

    pub fn failed(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            error_message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_display_and_slug() {
        let cell = MatrixCell(vec![
            ("version".to_string(), "3.8".to_string()),
            ("os".to_string(), "ubuntu latest".to_string()),
        ]);

        assert_eq!(cell.to_string(), "version=3.8, os=ubuntu latest");
        assert_eq!(cell.slug(), "version=3.8+os=ubuntu%20latest");
        assert_eq!(cell.get("os"), Some("ubuntu latest"));
        assert_eq!(MatrixCell::empty().slug(), "default");
    }

    #[test]
    fn test_slug_is_injective() {
        let slash = MatrixCell(vec![("os".to_string(), "linux/amd64".to_string())]);
        let underscore = MatrixCell(vec![("os".to_string(), "linux_amd64".to_string())]);
        let percent = MatrixCell(vec![("os".to_string(), "linux%2Famd64".to_string())]);
        assert_eq!(slash.slug(), "os=linux%2Famd64");
        assert_eq!(underscore.slug(), "os=linux_amd64");
        assert_eq!(percent.slug(), "os=linux%252Famd64");

        // separators inside coordinates are escaped too
        let joined = MatrixCell(vec![("a".to_string(), "1+b=2".to_string())]);
        let split = MatrixCell(vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert_ne!(joined.slug(), split.slug());

        let dots = MatrixCell(vec![("os".to_string(), "..".to_string())]);
        assert_eq!(dots.slug(), "os=%2E%2E");
    }

    #[test]
    fn test_skip_marks_terminal() {
        let job = Job::new("publish", MatrixCell::empty()).skip("condition false");
        assert_eq!(job.status, JobStatus::Skipped);
        assert!(job.status.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert_eq!(job.label(), "publish");
    }
}
