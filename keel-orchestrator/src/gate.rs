//! Per-environment deployment gates
//!
//! At most one deployment per environment is in flight at any instant.
//! Within a process, waiters queue on a semaphore and are served in arrival
//! order. With a lock directory, the holder also takes an exclusive lock on
//! `<dir>/<environment>.lock`, which excludes deployments started by other
//! `keel` processes sharing the same state directory. An in-flight
//! deployment is never cancelled, and different environments never block
//! each other.

use fs2::FileExt;
use keel_core::domain::job::path_segment;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

use crate::error::DeployError;

/// Registry of one mutual-exclusion gate per environment
#[derive(Debug, Default)]
pub struct DeploymentGates {
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    lock_dir: Option<PathBuf>,
}

/// Held while a deployment to an environment is in flight
///
/// Dropping the token releases the gate.
#[derive(Debug)]
pub struct GateToken {
    environment: String,
    queued: Duration,
    // released before the permit, so the next local waiter finds the file free
    _lock: Option<File>,
    _permit: OwnedSemaphorePermit,
}

impl GateToken {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// How long the holder waited for the gate
    pub fn queued(&self) -> Duration {
        self.queued
    }
}

impl DeploymentGates {
    /// Gates local to this process
    pub fn new() -> Self {
        Self::default()
    }

    /// Gates that also exclude other processes locking the same directory
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            gates: Mutex::default(),
            lock_dir: Some(dir.into()),
        }
    }

    /// Waits until the environment's gate is free and takes it
    pub async fn acquire(&self, environment: &str) -> Result<GateToken, DeployError> {
        let gate = self.gate(environment);
        let start = Instant::now();

        let permit = match gate.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                info!(
                    "Deployment to '{}' queued behind an in-flight deployment",
                    environment
                );
                gate.acquire_owned()
                    .await
                    .map_err(|_| DeployError::GateClosed(environment.to_string()))?
            }
        };

        let lock = match &self.lock_dir {
            Some(dir) => Some(lock_environment(dir, environment).await?),
            None => None,
        };

        Ok(GateToken {
            environment: environment.to_string(),
            queued: start.elapsed(),
            _lock: lock,
            _permit: permit,
        })
    }

    /// Releases a gate token
    pub fn release(&self, token: GateToken) {
        info!("Released deployment gate for '{}'", token.environment);
        drop(token);
    }

    /// Whether a deployment to the environment is in flight in this process
    pub fn is_held(&self, environment: &str) -> bool {
        let gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .get(environment)
            .is_some_and(|gate| gate.available_permits() == 0)
    }

    fn gate(&self, environment: &str) -> Arc<Semaphore> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates
            .entry(environment.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

/// Blocks on the environment's lock file off the async runtime
async fn lock_environment(dir: &Path, environment: &str) -> Result<File, DeployError> {
    let path = dir.join(format!("{}.lock", path_segment(environment)));
    let name = environment.to_string();

    tokio::task::spawn_blocking(move || -> Result<File, DeployError> {
        std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            info!(
                "Deployment to '{}' queued behind another process ({})",
                name,
                path.display()
            );
            FileExt::lock_exclusive(&file)?;
        }
        Ok(file)
    })
    .await
    .map_err(|_| DeployError::GateClosed(environment.to_string()))?
}
