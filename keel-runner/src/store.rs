//! Run-scoped artifact store
//!
//! Append-only map from [`ArtifactKey`] to immutable [`Artifact`]s. An
//! artifact is built completely before it is inserted, so consumers see it
//! either whole or not at all.

use keel_core::domain::artifact::{Artifact, ArtifactKey};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ArtifactError, Result};

/// Artifact storage for one pipeline run
pub struct ArtifactStore {
    run_id: Uuid,
    artifacts: RwLock<HashMap<ArtifactKey, Arc<Artifact>>>,
}

impl ArtifactStore {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            artifacts: RwLock::new(HashMap::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Publishes an artifact
    ///
    /// Re-publishing identical content under the same key returns the stored
    /// artifact unchanged. Different content under an existing key is rejected.
    pub async fn publish(&self, artifact: Artifact) -> Result<Arc<Artifact>> {
        let mut artifacts = self.artifacts.write().await;

        if let Some(existing) = artifacts.get(&artifact.key) {
            if existing.digest == artifact.digest {
                debug!("Artifact {} republished with identical content", artifact.key);
                return Ok(Arc::clone(existing));
            }
            return Err(ArtifactError::Conflict(artifact.key));
        }

        info!(
            "Published artifact {} ({} file(s), {} bytes) in run {}",
            artifact.key,
            artifact.files.len(),
            artifact.size(),
            self.run_id
        );
        let artifact = Arc::new(artifact);
        artifacts.insert(artifact.key.clone(), Arc::clone(&artifact));
        Ok(artifact)
    }

    pub async fn get(&self, key: &ArtifactKey) -> Option<Arc<Artifact>> {
        self.artifacts.read().await.get(key).cloned()
    }

    /// Union of all artifacts produced by the given stages, ordered by key
    pub async fn produced_by(&self, stages: &[String]) -> Vec<Arc<Artifact>> {
        let artifacts = self.artifacts.read().await;
        let mut found: Vec<Arc<Artifact>> = artifacts
            .values()
            .filter(|a| stages.contains(&a.key.stage))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

/// Builds an artifact from in-memory files, computing its digest
pub fn build_artifact(key: ArtifactKey, files: BTreeMap<String, Vec<u8>>) -> Artifact {
    let digest = digest_files(&files);
    Artifact { key, files, digest }
}

/// Hex SHA-256 over path and content of every file, in path order
pub fn digest_files(files: &BTreeMap<String, Vec<u8>>) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}

/// Reads a file or a directory tree from a job workspace
///
/// A single file is stored under its file name; directory entries under
/// their `/`-separated path relative to the directory.
pub fn collect_files(workspace: &Path, name: &str, path: &str) -> Result<BTreeMap<String, Vec<u8>>> {
    let root = workspace.join(path);
    let mut files = BTreeMap::new();

    if root.is_file() {
        let file_name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        files.insert(file_name, std::fs::read(&root)?);
    } else if root.is_dir() {
        collect_dir(&root, &root, &mut files)?;
    } else {
        return Err(ArtifactError::MissingPath {
            name: name.to_string(),
            path: path.to_string(),
        });
    }

    Ok(files)
}

fn collect_dir(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_dir(root, &path, files)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(relative, std::fs::read(&path)?);
        }
    }
    Ok(())
}

/// Writes an upstream artifact under `<dir>/<stage>/<cell>/<name>/`
pub fn materialize(dir: &Path, artifact: &Artifact) -> Result<()> {
    let target = dir
        .join(&artifact.key.stage)
        .join(artifact.key.cell.slug())
        .join(&artifact.key.name);

    for (relative, content) in &artifact.files {
        let path = target.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::job::MatrixCell;

    fn cell(os: &str) -> MatrixCell {
        MatrixCell(vec![("os".to_string(), os.to_string())])
    }

    fn artifact(stage: &str, cell: MatrixCell, content: &str) -> Artifact {
        let mut files = BTreeMap::new();
        files.insert("report.xml".to_string(), content.as_bytes().to_vec());
        build_artifact(ArtifactKey::new(stage, cell, "report"), files)
    }

    #[tokio::test]
    async fn test_cells_do_not_collide() {
        let store = ArtifactStore::new(Uuid::new_v4());
        store.publish(artifact("test", cell("A"), "a")).await.unwrap();
        store.publish(artifact("test", cell("B"), "b")).await.unwrap();

        assert_eq!(store.len().await, 2);
        let a = store
            .get(&ArtifactKey::new("test", cell("A"), "report"))
            .await
            .unwrap();
        assert_eq!(a.files["report.xml"], b"a");
    }

    #[tokio::test]
    async fn test_identical_republish_is_noop() {
        let store = ArtifactStore::new(Uuid::new_v4());
        let first = store.publish(artifact("build", MatrixCell::empty(), "x")).await.unwrap();
        let second = store.publish(artifact("build", MatrixCell::empty(), "x")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_different_content_conflicts() {
        let store = ArtifactStore::new(Uuid::new_v4());
        store.publish(artifact("build", MatrixCell::empty(), "x")).await.unwrap();
        let result = store.publish(artifact("build", MatrixCell::empty(), "y")).await;

        assert!(matches!(result, Err(ArtifactError::Conflict(_))));
        let stored = store
            .get(&ArtifactKey::new("build", MatrixCell::empty(), "report"))
            .await
            .unwrap();
        assert_eq!(stored.files["report.xml"], b"x");
    }

    #[tokio::test]
    async fn test_produced_by_unions_stages() {
        let store = ArtifactStore::new(Uuid::new_v4());
        store.publish(artifact("test", cell("A"), "a")).await.unwrap();
        store.publish(artifact("lint", MatrixCell::empty(), "l")).await.unwrap();
        store.publish(artifact("other", MatrixCell::empty(), "o")).await.unwrap();

        let inputs = store
            .produced_by(&["test".to_string(), "lint".to_string()])
            .await;
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].key.stage, "lint");
    }

    #[test]
    fn test_collect_and_materialize_directory() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join("dist/sub")).unwrap();
        std::fs::write(ws.path().join("dist/a.txt"), "a").unwrap();
        std::fs::write(ws.path().join("dist/sub/b.txt"), "b").unwrap();

        let files = collect_files(ws.path(), "dist", "dist").unwrap();
        assert_eq!(files.keys().collect::<Vec<_>>(), vec!["a.txt", "sub/b.txt"]);

        let out = tempfile::tempdir().unwrap();
        let artifact = build_artifact(ArtifactKey::new("build", cell("A"), "dist"), files);
        materialize(out.path(), &artifact).unwrap();
        assert!(out.path().join("build/os=A/dist/sub/b.txt").exists());
    }

    #[test]
    fn test_similar_cells_materialize_apart() {
        let out = tempfile::tempdir().unwrap();
        materialize(out.path(), &artifact("test", cell("linux/amd64"), "slash")).unwrap();
        materialize(out.path(), &artifact("test", cell("linux_amd64"), "underscore")).unwrap();

        let dirs = std::fs::read_dir(out.path().join("test")).unwrap().count();
        assert_eq!(dirs, 2);
        let slash = out.path().join("test/os=linux%2Famd64/report/report.xml");
        assert_eq!(std::fs::read_to_string(slash).unwrap(), "slash");
    }

    #[test]
    fn test_collect_missing_path() {
        let ws = tempfile::tempdir().unwrap();
        let result = collect_files(ws.path(), "coverage", "coverage.xml");
        assert!(matches!(result, Err(ArtifactError::MissingPath { .. })));
    }

    #[test]
    fn test_digest_depends_on_paths() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), b"1".to_vec());
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), b"1".to_vec());
        assert_ne!(digest_files(&a), digest_files(&b));
    }
}
