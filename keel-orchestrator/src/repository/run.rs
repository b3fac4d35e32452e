//! Run Repository
//!
//! Handles all file operations related to pipeline run records.

use chrono::{DateTime, Utc};
use keel_core::domain::run::PipelineRun;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

fn record_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{}.json", id))
}

/// Persist a run record, replacing any previous version
///
/// Written to a temporary file first and renamed into place, so readers
/// never see a partial record.
pub async fn save(dir: &Path, run: &PipelineRun) -> Result<(), StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = record_path(dir, run.id);
    let tmp = path.with_extension("json.tmp");

    let body = serde_json::to_vec_pretty(run)?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, &path).await?;

    debug!("Saved run {} to {}", run.id, path.display());
    Ok(())
}

/// Find a run by ID
pub async fn find_by_id(dir: &Path, id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
    match tokio::fs::read(record_path(dir, id)).await {
        Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List all runs, newest first
///
/// Unreadable records are skipped with a warning.
pub async fn list_all(dir: &Path) -> Result<Vec<PipelineRun>, StoreError> {
    let mut runs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let body = tokio::fs::read(&path).await?;
        match serde_json::from_slice::<PipelineRun>(&body) {
            Ok(run) => runs.push(run),
            Err(e) => warn!("Skipping unreadable run record {}: {}", path.display(), e),
        }
    }

    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(runs)
}

/// Resolve a run id from its full form or an unambiguous prefix
pub async fn resolve_prefix(dir: &Path, prefix: &str) -> Result<Uuid, StoreError> {
    if let Ok(id) = Uuid::parse_str(prefix) {
        return Ok(id);
    }

    let needle = prefix.to_lowercase();
    let matches: Vec<Uuid> = list_all(dir)
        .await?
        .into_iter()
        .map(|run| run.id)
        .filter(|id| id.to_string().starts_with(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(StoreError::NotFound(prefix.to_string())),
        [id] => Ok(*id),
        _ => Err(StoreError::Ambiguous {
            prefix: prefix.to_string(),
            matches: matches.iter().map(Uuid::to_string).collect(),
        }),
    }
}

/// Delete a run record
pub async fn delete(dir: &Path, id: Uuid) -> Result<bool, StoreError> {
    match tokio::fs::remove_file(record_path(dir, id)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete every run created before `cutoff`, returns the deleted ids
pub async fn delete_created_before(
    dir: &Path,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Uuid>, StoreError> {
    let mut deleted = Vec::new();
    for run in list_all(dir).await? {
        if run.created_at < cutoff && delete(dir, run.id).await? {
            deleted.push(run.id);
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::trigger::TriggerEvent;

    fn run_created(hours_ago: i64) -> PipelineRun {
        let mut run = PipelineRun::new(
            "app",
            TriggerEvent::Push {
                git_ref: "refs/heads/main".to_string(),
                sha: "abc123".to_string(),
            },
        );
        run.created_at = Utc::now() - chrono::Duration::hours(hours_ago);
        run
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_created(0);
        save(dir.path(), &run).await.unwrap();

        let loaded = find_by_id(dir.path(), run.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.trigger, run.trigger);
        assert!(find_by_id(dir.path(), Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let old = run_created(5);
        let new = run_created(1);
        save(dir.path(), &old).await.unwrap();
        save(dir.path(), &new).await.unwrap();

        let ids: Vec<Uuid> = list_all(dir.path()).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_all(&dir.path().join("runs")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_created(0);
        save(dir.path(), &run).await.unwrap();

        let full = run.id.to_string();
        assert_eq!(resolve_prefix(dir.path(), &full[..8]).await.unwrap(), run.id);
        assert_eq!(resolve_prefix(dir.path(), &full).await.unwrap(), run.id);
        assert!(matches!(
            resolve_prefix(dir.path(), "zzzz").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            save(dir.path(), &run_created(0)).await.unwrap();
        }
        assert!(matches!(
            resolve_prefix(dir.path(), "").await,
            Err(StoreError::Ambiguous { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_created_before() {
        let dir = tempfile::tempdir().unwrap();
        let stale = run_created(24 * 20);
        let fresh = run_created(1);
        save(dir.path(), &stale).await.unwrap();
        save(dir.path(), &fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(14);
        let deleted = delete_created_before(dir.path(), cutoff).await.unwrap();
        assert_eq!(deleted, vec![stale.id]);
        assert!(find_by_id(dir.path(), fresh.id).await.unwrap().is_some());
    }
}
