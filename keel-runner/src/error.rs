//! Artifact errors

use keel_core::domain::artifact::ArtifactKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A different blob set was already published under this key
    #[error("artifact {0} is already published with different content")]
    Conflict(ArtifactKey),

    /// Declared artifact path does not exist in the job workspace
    #[error("artifact '{name}' path '{path}' not found in workspace")]
    MissingPath { name: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
