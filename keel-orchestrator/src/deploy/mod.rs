//! Deployment procedure
//!
//! Values rendering, release backends, readiness probing and the invoker
//! that ties them together.

pub mod backend;
pub mod invoker;
pub mod probe;
pub mod values;

pub use backend::{HelmBackend, ReleaseBackend, ReleaseSpec};
pub use invoker::DeploymentInvoker;
pub use probe::{HttpReadinessProbe, ReadinessProbe};
