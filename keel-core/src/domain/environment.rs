//! Deployment environment types
//!
//! An environment is a named deployment target with its own secret bindings
//! and its own deployment gate.

use std::collections::BTreeMap;

/// Secret bindings every environment must provide to a deployment
pub const REQUIRED_SECRETS: [&str; 6] = [
    "MYSQL_ROOT_PASSWORD",
    "MYSQL_USER",
    "MYSQL_PASSWORD",
    "APP_SECRET_KEY",
    "APP_DB_NAME",
    "APP_DB_HOST",
];

/// Repository-scoped secrets exported to image publish jobs
pub const REGISTRY_SECRETS: [&str; 2] = ["REGISTRY_USERNAME", "REGISTRY_TOKEN"];

/// Named deployment target
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    /// Kubernetes namespace the release lives in, defaults to the environment name
    pub namespace: String,
    /// Base URL of the deployed application, used for readiness probing
    pub app_url: Option<String>,
    pub secrets: SecretBindings,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            namespace: name.clone(),
            name,
            app_url: None,
            secrets: SecretBindings::default(),
        }
    }
}

/// Secret name -> value map
///
/// Never serialized; `Debug` prints names only.
#[derive(Clone, Default)]
pub struct SecretBindings(BTreeMap<String, String>);

impl SecretBindings {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Required bindings that are absent
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.0.contains_key(**name))
            .copied()
            .collect()
    }

    /// Only the named bindings
    pub fn subset(&self, names: &[&str]) -> SecretBindings {
        SecretBindings(
            self.0
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl std::fmt::Debug for SecretBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "***")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        SecretBindings(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_values() {
        let secrets: SecretBindings = [("APP_SECRET_KEY", "hunter2")].into_iter().collect();
        let printed = format!("{:?}", secrets);
        assert!(printed.contains("APP_SECRET_KEY"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_missing_required() {
        let secrets: SecretBindings = [("MYSQL_USER", "todo"), ("MYSQL_PASSWORD", "pw")]
            .into_iter()
            .collect();
        let missing = secrets.missing(&REQUIRED_SECRETS);
        assert_eq!(missing.len(), 4);
        assert!(missing.contains(&"APP_SECRET_KEY"));
        assert!(!missing.contains(&"MYSQL_USER"));
    }

    #[test]
    fn test_subset() {
        let secrets: SecretBindings = [("REGISTRY_TOKEN", "t"), ("APP_SECRET_KEY", "k")]
            .into_iter()
            .collect();
        let registry = secrets.subset(&REGISTRY_SECRETS);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["REGISTRY_TOKEN"]);
    }
}
