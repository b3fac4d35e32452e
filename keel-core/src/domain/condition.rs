//! Run conditions
//!
//! Every branch, event and environment check of a pipeline is expressed as a
//! [`RunCondition`] and evaluated in one place against a [`TriggerContext`].

use serde::{Deserialize, Serialize};

use super::trigger::{TriggerContext, TriggerKind};

/// Predicate deciding whether a stage executes or is skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunCondition {
    #[default]
    Always,
    /// Branch equals the pipeline's primary branch
    PrimaryBranch,
    /// Branch equals the given name
    Branch(String),
    /// Trigger is of the given kind
    Event(TriggerKind),
    /// Manual dispatch targeting the given environment
    Environment(String),
    All(Vec<RunCondition>),
    Any(Vec<RunCondition>),
    Not(Box<RunCondition>),
}

impl RunCondition {
    /// Evaluates the condition for one run
    pub fn evaluate(&self, ctx: &TriggerContext, primary_branch: &str) -> bool {
        match self {
            RunCondition::Always => true,
            RunCondition::PrimaryBranch => ctx.branch == primary_branch,
            RunCondition::Branch(name) => ctx.branch == *name,
            RunCondition::Event(kind) => ctx.kind == *kind,
            RunCondition::Environment(env) => ctx.environment.as_deref() == Some(env.as_str()),
            RunCondition::All(conds) => conds.iter().all(|c| c.evaluate(ctx, primary_branch)),
            RunCondition::Any(conds) => conds.iter().any(|c| c.evaluate(ctx, primary_branch)),
            RunCondition::Not(cond) => !cond.evaluate(ctx, primary_branch),
        }
    }
}

impl std::fmt::Display for RunCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |conds: &[RunCondition], sep: &str| {
            conds
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            RunCondition::Always => write!(f, "always"),
            RunCondition::PrimaryBranch => write!(f, "branch == <primary>"),
            RunCondition::Branch(name) => write!(f, "branch == {}", name),
            RunCondition::Event(kind) => write!(f, "event == {}", kind),
            RunCondition::Environment(env) => write!(f, "environment == {}", env),
            RunCondition::All(conds) => write!(f, "({})", join(conds, " && ")),
            RunCondition::Any(conds) => write!(f, "({})", join(conds, " || ")),
            RunCondition::Not(cond) => write!(f, "!{}", cond),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: TriggerKind, branch: &str, env: Option<&str>) -> TriggerContext {
        TriggerContext {
            kind,
            branch: branch.to_string(),
            sha: "abc123".to_string(),
            environment: env.map(str::to_string),
        }
    }

    #[test]
    fn test_primary_branch() {
        let cond = RunCondition::PrimaryBranch;
        assert!(cond.evaluate(&ctx(TriggerKind::Push, "main", None), "main"));
        assert!(!cond.evaluate(&ctx(TriggerKind::Push, "feature/x", None), "main"));
    }

    #[test]
    fn test_composite_conditions() {
        let cond = RunCondition::All(vec![
            RunCondition::PrimaryBranch,
            RunCondition::Not(Box::new(RunCondition::Event(TriggerKind::PullRequest))),
        ]);

        assert!(cond.evaluate(&ctx(TriggerKind::Push, "main", None), "main"));
        assert!(!cond.evaluate(&ctx(TriggerKind::PullRequest, "main", None), "main"));

        let any = RunCondition::Any(vec![
            RunCondition::Branch("release".to_string()),
            RunCondition::Environment("staging".to_string()),
        ]);
        assert!(any.evaluate(
            &ctx(TriggerKind::ManualDispatch, "dev", Some("staging")),
            "main"
        ));
        assert!(!any.evaluate(&ctx(TriggerKind::Push, "dev", None), "main"));
    }
}
