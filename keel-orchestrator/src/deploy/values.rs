//! Helm values rendering
//!
//! The chart's default `values.yaml` is deep-merged with the
//! environment-specific override file, then the version under deployment
//! and the environment's secret bindings are injected. The rendered file is
//! private to the invocation and removed when the handle is dropped.

use keel_core::domain::environment::SecretBindings;
use serde_yaml::{Mapping, Value};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::DeployError;

/// Deep merge: mappings merge key by key, any other overlay value replaces the base
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Renders the values document for one deployment
pub async fn render(
    chart_dir: &Path,
    values_path: &Path,
    version: &str,
    secrets: &SecretBindings,
) -> Result<Value, DeployError> {
    let defaults = chart_dir.join("values.yaml");
    let mut values = if tokio::fs::try_exists(&defaults).await? {
        load(&defaults).await?
    } else {
        Value::Mapping(Mapping::new())
    };

    merge(&mut values, load(values_path).await?);

    let mut image = Mapping::new();
    image.insert("tag".into(), version.into());
    merge(
        &mut values,
        Value::Mapping(Mapping::from_iter([("image".into(), Value::Mapping(image))])),
    );

    let secret_values: Mapping = secrets
        .iter()
        .map(|(name, value)| (Value::from(name), Value::from(value)))
        .collect();
    merge(
        &mut values,
        Value::Mapping(Mapping::from_iter([(
            "secrets".into(),
            Value::Mapping(secret_values),
        )])),
    );

    Ok(values)
}

/// Writes rendered values to a private temporary file in `dir`
pub fn write_private(values: &Value, dir: &Path) -> Result<NamedTempFile, DeployError> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::Builder::new()
        .prefix("values-")
        .suffix(".yaml")
        .tempfile_in(dir)?;
    file.write_all(serde_yaml::to_string(values)?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

async fn load(path: &Path) -> Result<Value, DeployError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DeployError::Values {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    if content.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    serde_yaml::from_str(&content).map_err(|e| DeployError::Values {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_is_deep() {
        let mut base = yaml("image:\n  repository: app\n  tag: latest\nreplicas: 1\n");
        merge(&mut base, yaml("image:\n  tag: abc123\nreplicas: 3\n"));
        assert_eq!(
            base,
            yaml("image:\n  repository: app\n  tag: abc123\nreplicas: 3\n")
        );
    }

    #[test]
    fn test_merge_replaces_non_mappings() {
        let mut base = yaml("hosts: [a, b]\n");
        merge(&mut base, yaml("hosts: [c]\n"));
        assert_eq!(base, yaml("hosts: [c]\n"));
    }

    #[tokio::test]
    async fn test_render_injects_version_and_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("chart");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(chart.join("values.yaml"), "image:\n  repository: app\nreplicas: 1\n")
            .unwrap();
        let overrides = dir.path().join("values-staging.yaml");
        std::fs::write(&overrides, "replicas: 2\n").unwrap();

        let mut secrets = SecretBindings::default();
        secrets.insert("MYSQL_PASSWORD", "hunter2");

        let values = render(&chart, &overrides, "abc123", &secrets).await.unwrap();
        assert_eq!(values["image"]["repository"], yaml("app"));
        assert_eq!(values["image"]["tag"], yaml("abc123"));
        assert_eq!(values["replicas"], yaml("2"));
        assert_eq!(values["secrets"]["MYSQL_PASSWORD"], yaml("hunter2"));
    }

    #[tokio::test]
    async fn test_render_requires_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = render(
            dir.path(),
            &dir.path().join("missing.yaml"),
            "abc123",
            &SecretBindings::default(),
        )
        .await;
        assert!(matches!(result, Err(DeployError::Values { .. })));
    }

    #[test]
    fn test_private_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_private(&yaml("a: 1\n"), dir.path()).unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a: 1\n");
        drop(file);
        assert!(!path.exists());
    }
}
