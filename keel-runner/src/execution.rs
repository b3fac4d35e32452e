//! Execution result of a job
//!
//! Only exists while a job is being finished; it is folded into the
//! [`JobResult`] stored on the job record.

use keel_core::domain::job::{JobResult, JobStatus};
use std::time::Duration;

/// Exit code reported for jobs that exceeded their time budget
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Result of running a job's steps
#[derive(Debug)]
pub enum ExecutionResult {
    Success,
    /// A step exited non-zero or could not be started; later steps were not run
    Failure {
        step: String,
        exit_code: i32,
        error: String,
    },
    Timeout {
        budget: Duration,
    },
}

impl ExecutionResult {
    pub fn status(&self) -> JobStatus {
        match self {
            ExecutionResult::Success => JobStatus::Succeeded,
            ExecutionResult::Failure { .. } | ExecutionResult::Timeout { .. } => JobStatus::Failed,
        }
    }

    /// Convert execution result to job result for the run record
    pub fn into_job_result(self) -> JobResult {
        match self {
            ExecutionResult::Success => JobResult::succeeded(),
            ExecutionResult::Failure {
                step,
                exit_code,
                error,
            } => JobResult::failed(exit_code, format!("Step '{}' failed: {}", step, error)),
            ExecutionResult::Timeout { budget } => JobResult::failed(
                TIMEOUT_EXIT_CODE,
                format!("Execution timed out after {}s", budget.as_secs()),
            ),
        }
    }
}
