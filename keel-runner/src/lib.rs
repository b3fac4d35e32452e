//! Keel Runner
//!
//! Executes single jobs on isolated contexts and holds the run-scoped
//! artifact store.
//!
//! Architecture:
//! - Configuration: workspace location, job time budget, shell
//! - Executor: runs one step and reports its exit code
//! - Runner: fail-fast step sequencing, timeout, artifact hand-off
//! - Store: append-only artifact storage keyed by (stage, cell, name)

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod runner;
pub mod store;

pub use config::RunnerConfig;
pub use context::JobContext;
pub use error::ArtifactError;
pub use executor::{ShellExecutor, StepExecutor};
pub use runner::{JobRequest, JobRunner};
pub use store::ArtifactStore;
