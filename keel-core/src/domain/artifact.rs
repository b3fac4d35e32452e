//! Artifact domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::MatrixCell;

/// Composite key of an artifact within one run
///
/// Parallel matrix cells of the same stage publish under distinct keys, so an
/// artifact name never has to encode its producing cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub stage: String,
    pub cell: MatrixCell,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(stage: impl Into<String>, cell: MatrixCell, name: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cell,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cell.is_empty() {
            write!(f, "{}/{}", self.stage, self.name)
        } else {
            write!(f, "{}[{}]/{}", self.stage, self.cell, self.name)
        }
    }
}

/// Immutable blob set published by a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: ArtifactKey,
    /// Relative path -> file contents
    pub files: BTreeMap<String, Vec<u8>>,
    /// Hex SHA-256 over the sorted file set
    pub digest: String,
}

impl Artifact {
    pub fn size(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}
