//! Readiness probing
//!
//! After a release is applied the deployed application must answer
//! positively on its readiness path within a bounded window. The application
//! reports not-ready (HTTP 500) while it warms up.

use async_trait::async_trait;
use keel_core::domain::environment::Environment;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::DeployError;

pub const DEFAULT_LIVENESS_PATH: &str = "/health";
pub const DEFAULT_READINESS_PATH: &str = "/ready";

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Waits until the environment reports ready or the window elapses
    async fn wait_ready(&self, environment: &Environment, window: Duration)
    -> Result<(), DeployError>;
}

/// Polls the application's HTTP health endpoints
#[derive(Debug, Clone)]
pub struct HttpReadinessProbe {
    client: Client,
    liveness_path: String,
    readiness_path: String,
    interval: Duration,
}

impl HttpReadinessProbe {
    pub fn new(interval: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            liveness_path: DEFAULT_LIVENESS_PATH.to_string(),
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            interval,
        }
    }

    pub fn with_paths(mut self, liveness: impl Into<String>, readiness: impl Into<String>) -> Self {
        self.liveness_path = liveness.into();
        self.readiness_path = readiness.into();
        self
    }

    async fn check(&self, base_url: &str, path: &str) -> bool {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        match self.client.get(&url).send().await {
            Ok(response) => {
                debug!("{} -> {}", url, response.status());
                response.status().is_success()
            }
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn wait_ready(
        &self,
        environment: &Environment,
        window: Duration,
    ) -> Result<(), DeployError> {
        let Some(base_url) = environment.app_url.as_deref() else {
            return Err(DeployError::MissingAppUrl(environment.name.clone()));
        };

        let deadline = Instant::now() + window;
        loop {
            if self.check(base_url, &self.readiness_path).await {
                info!("Environment '{}' is ready", environment.name);
                return Ok(());
            }
            if !self.check(base_url, &self.liveness_path).await {
                debug!("Environment '{}' is not live yet", environment.name);
            }
            if Instant::now() + self.interval > deadline {
                return Err(DeployError::NotReady {
                    environment: environment.name.clone(),
                    seconds: window.as_secs(),
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_url_is_not_ready() {
        let probe = HttpReadinessProbe::new(Duration::from_millis(10));
        let env = Environment::new("staging");
        let result = probe.wait_ready(&env, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(DeployError::MissingAppUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_times_out() {
        let probe = HttpReadinessProbe::new(Duration::from_millis(20));
        let mut env = Environment::new("staging");
        // nothing listens on the discard port
        env.app_url = Some("http://127.0.0.1:9".to_string());

        let result = probe.wait_ready(&env, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(DeployError::NotReady { .. })));
    }
}
