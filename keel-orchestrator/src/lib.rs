//! Keel orchestrator
//!
//! Validates a pipeline definition into a stage graph, runs it against
//! trigger events, and deploys through the per-environment gated
//! deployment procedure. Finished runs are persisted by the run repository.

pub mod config;
pub mod deploy;
pub mod error;
pub mod gate;
pub mod graph;
pub mod matrix;
pub mod orchestrator;
pub mod repository;

pub use config::OrchestratorConfig;
pub use error::{DeployError, GraphError, OrchestratorError, StoreError};
pub use gate::{DeploymentGates, GateToken};
pub use graph::StageGraph;
pub use orchestrator::Orchestrator;
