//! Trigger domain types
//!
//! A trigger event starts a pipeline run. Conditions never look at the raw
//! event; they are evaluated against the [`TriggerContext`] derived from it.

use serde::{Deserialize, Serialize};

/// Event that starts a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Commit pushed to a branch
    Push { git_ref: String, sha: String },

    /// Pull request opened or updated. Never authorises a deployment.
    PullRequest { git_ref: String, sha: String },

    /// Operator-initiated deployment to a chosen environment
    ManualDispatch {
        environment: String,
        version: Option<String>,
        git_ref: String,
        sha: String,
    },
}

/// Kind of trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    ManualDispatch,
}

impl TriggerKind {
    /// Parses the names used in pipeline definitions and on the command line
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => Some(TriggerKind::Push),
            "pull_request" | "pr" => Some(TriggerKind::PullRequest),
            "manual_dispatch" | "workflow_dispatch" | "dispatch" => {
                Some(TriggerKind::ManualDispatch)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::PullRequest => write!(f, "pull_request"),
            TriggerKind::ManualDispatch => write!(f, "manual_dispatch"),
        }
    }
}

impl TriggerEvent {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::Push { .. } => TriggerKind::Push,
            TriggerEvent::PullRequest { .. } => TriggerKind::PullRequest,
            TriggerEvent::ManualDispatch { .. } => TriggerKind::ManualDispatch,
        }
    }

    /// Structured context used for condition evaluation
    pub fn context(&self) -> TriggerContext {
        match self {
            TriggerEvent::Push { git_ref, sha } | TriggerEvent::PullRequest { git_ref, sha } => {
                TriggerContext {
                    kind: self.kind(),
                    branch: branch_name(git_ref).to_string(),
                    sha: sha.clone(),
                    environment: None,
                }
            }
            TriggerEvent::ManualDispatch {
                environment,
                version,
                git_ref,
                sha,
            } => TriggerContext {
                kind: TriggerKind::ManualDispatch,
                branch: branch_name(git_ref).to_string(),
                sha: version.clone().unwrap_or_else(|| sha.clone()),
                environment: Some(environment.clone()),
            },
        }
    }
}

/// Trigger data visible to run conditions and jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub kind: TriggerKind,

    /// Branch name with any `refs/heads/` prefix removed
    pub branch: String,

    /// Version being built or deployed (commit SHA)
    pub sha: String,

    /// Environment chosen by the operator, manual dispatch only
    pub environment: Option<String>,
}

/// Strips the `refs/heads/` prefix from a git ref
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_context_strips_ref_prefix() {
        let event = TriggerEvent::Push {
            git_ref: "refs/heads/main".to_string(),
            sha: "abc123".to_string(),
        };

        let ctx = event.context();
        assert_eq!(ctx.kind, TriggerKind::Push);
        assert_eq!(ctx.branch, "main");
        assert_eq!(ctx.sha, "abc123");
        assert!(ctx.environment.is_none());
    }

    #[test]
    fn test_dispatch_version_overrides_sha() {
        let event = TriggerEvent::ManualDispatch {
            environment: "staging".to_string(),
            version: Some("def456".to_string()),
            git_ref: "main".to_string(),
            sha: "abc123".to_string(),
        };

        let ctx = event.context();
        assert_eq!(ctx.sha, "def456");
        assert_eq!(ctx.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn test_parse_trigger_kind() {
        assert_eq!(TriggerKind::parse("push"), Some(TriggerKind::Push));
        assert_eq!(
            TriggerKind::parse("pull-request"),
            Some(TriggerKind::PullRequest)
        );
        assert_eq!(
            TriggerKind::parse("workflow_dispatch"),
            Some(TriggerKind::ManualDispatch)
        );
        assert_eq!(TriggerKind::parse("tag"), None);
    }

    #[test]
    fn test_event_json_is_tagged_by_kind() {
        let event = TriggerEvent::PullRequest {
            git_ref: "refs/heads/feature/x".to_string(),
            sha: "abc123".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "pull_request");
        assert_eq!(json["git_ref"], "refs/heads/feature/x");
        assert_eq!(serde_json::from_value::<TriggerEvent>(json).unwrap(), event);
    }
}
