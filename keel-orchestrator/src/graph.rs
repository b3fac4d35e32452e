//! Stage graph
//!
//! Validates a [`PipelineDefinition`] into a directed acyclic graph of
//! stages. Edges point from a dependency to its dependent. Validation
//! happens once, before any job of a run is started.

use keel_core::domain::job::MatrixCell;
use keel_core::domain::pipeline::{PipelineDefinition, StageDefinition};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GraphError;
use crate::matrix;

/// Validated, immutable stage graph of one pipeline
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    primary_branch: String,
    graph: DiGraph<Arc<StageDefinition>, ()>,
    index: HashMap<String, NodeIndex>,
    order: Vec<String>,
    cells: HashMap<String, Vec<MatrixCell>>,
}

impl StageGraph {
    /// Builds and validates the graph
    ///
    /// Rejects duplicate stage names, unknown dependencies, cycles,
    /// malformed matrices and stages that are neither a step stage nor a
    /// deploy stage.
    pub fn build(definition: &PipelineDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut cells = HashMap::new();

        for stage in &definition.stages {
            if index.contains_key(&stage.name) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
            validate_shape(stage)?;
            cells.insert(stage.name.clone(), matrix::expand(stage)?);
            let node = graph.add_node(Arc::new(stage.clone()));
            index.insert(stage.name.clone(), node);
        }

        for stage in &definition.stages {
            let to = index[&stage.name];
            for dependency in &stage.needs {
                let from = index.get(dependency).copied().ok_or_else(|| {
                    GraphError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dependency.clone(),
                    }
                })?;
                graph.update_edge(from, to, ());
            }
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(graph[cycle.node_id()].name.clone()))?
            .into_iter()
            .map(|node| graph[node].name.clone())
            .collect();

        Ok(Self {
            name: definition.name.clone(),
            primary_branch: definition.primary_branch.clone(),
            graph,
            index,
            order,
            cells,
        })
    }

    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    pub fn primary_branch(&self) -> &str {
        &self.primary_branch
    }

    /// Stage names in a topological order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn stage(&self, name: &str) -> Option<&Arc<StageDefinition>> {
        self.index.get(name).map(|node| &self.graph[*node])
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<StageDefinition>> {
        self.order.iter().filter_map(|name| self.stage(name))
    }

    /// Direct dependencies of a stage
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Stages that directly depend on a stage
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Matrix cells of a stage, one per job
    pub fn cells(&self, name: &str) -> &[MatrixCell] {
        self.cells.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of jobs a run of this graph would create
    pub fn job_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Environment names deploy stages with a fixed target deploy to
    pub fn fixed_environments(&self) -> Vec<&str> {
        use keel_core::domain::pipeline::DeployTarget;

        let mut envs: Vec<&str> = self
            .stages()
            .filter_map(|stage| match stage.deploy.as_ref().map(|d| &d.target) {
                Some(DeployTarget::Fixed(env)) => Some(env.as_str()),
                _ => None,
            })
            .collect();
        envs.sort_unstable();
        envs.dedup();
        envs
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

fn validate_shape(stage: &StageDefinition) -> Result<(), GraphError> {
    match (stage.steps.is_empty(), stage.deploy.is_some()) {
        (true, false) => Err(GraphError::EmptyStage(stage.name.clone())),
        (false, true) => Err(GraphError::ConflictingStage(stage.name.clone())),
        (true, true) if !stage.matrix.is_empty() => {
            Err(GraphError::DeployMatrix(stage.name.clone()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::pipeline::{DeploySpec, DeployTarget, MatrixAxis, Step};

    fn stage(name: &str, needs: &[&str]) -> StageDefinition {
        let mut stage = StageDefinition::new(name);
        stage.needs = needs.iter().map(|n| n.to_string()).collect();
        stage.steps = vec![Step::new("run", "true")];
        stage
    }

    fn definition(stages: Vec<StageDefinition>) -> PipelineDefinition {
        PipelineDefinition {
            name: "app".to_string(),
            description: None,
            primary_branch: "main".to_string(),
            stages,
        }
    }

    #[test]
    fn test_topological_order() {
        let graph = StageGraph::build(&definition(vec![
            stage("deploy", &["publish"]),
            stage("publish", &["test", "lint"]),
            stage("lint", &[]),
            stage("test", &[]),
        ]))
        .unwrap();

        let position = |name: &str| graph.order().iter().position(|s| s == name).unwrap();
        assert!(position("test") < position("publish"));
        assert!(position("lint") < position("publish"));
        assert!(position("publish") < position("deploy"));
        assert_eq!(graph.dependencies("publish"), vec!["lint", "test"]);
        assert_eq!(graph.dependents("publish"), vec!["deploy"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let result = StageGraph::build(&definition(vec![
            stage("a", &["c"]),
            stage("b", &["a"]),
            stage("c", &["b"]),
        ]));
        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let result = StageGraph::build(&definition(vec![stage("a", &["a"])]));
        assert!(matches!(result, Err(GraphError::Cycle(name)) if name == "a"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = StageGraph::build(&definition(vec![stage("a", &["missing"])]));
        assert_eq!(
            result.unwrap_err(),
            GraphError::UnknownDependency {
                stage: "a".to_string(),
                dependency: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = StageGraph::build(&definition(vec![stage("a", &[]), stage("a", &[])]));
        assert_eq!(result.unwrap_err(), GraphError::DuplicateStage("a".to_string()));
    }

    #[test]
    fn test_stage_shape_rules() {
        let empty = StageDefinition::new("empty");
        assert_eq!(
            StageGraph::build(&definition(vec![empty])).unwrap_err(),
            GraphError::EmptyStage("empty".to_string())
        );

        let deploy = DeploySpec {
            target: DeployTarget::Fixed("staging".to_string()),
            values_path: "values-staging.yaml".to_string(),
            release_name: "app".to_string(),
            chart: "chart".to_string(),
        };

        let mut both = stage("both", &[]);
        both.deploy = Some(deploy.clone());
        assert_eq!(
            StageGraph::build(&definition(vec![both])).unwrap_err(),
            GraphError::ConflictingStage("both".to_string())
        );

        let mut matrixed = StageDefinition::new("matrixed");
        matrixed.deploy = Some(deploy);
        matrixed.matrix = vec![MatrixAxis::new("region", &["eu", "us"])];
        assert_eq!(
            StageGraph::build(&definition(vec![matrixed])).unwrap_err(),
            GraphError::DeployMatrix("matrixed".to_string())
        );
    }

    #[test]
    fn test_cells_and_job_count() {
        let mut test = stage("test", &[]);
        test.matrix = vec![
            MatrixAxis::new("version", &["3.8", "3.9", "3.10"]),
            MatrixAxis::new("os", &["A", "B"]),
        ];
        let graph =
            StageGraph::build(&definition(vec![test, stage("publish", &["test"])])).unwrap();

        assert_eq!(graph.cells("test").len(), 6);
        assert_eq!(graph.cells("publish").len(), 1);
        assert_eq!(graph.job_count(), 7);
    }

    #[test]
    fn test_fixed_environments() {
        let mut deploy = StageDefinition::new("deploy-staging");
        deploy.deploy = Some(DeploySpec {
            target: DeployTarget::Fixed("staging".to_string()),
            values_path: "values-staging.yaml".to_string(),
            release_name: "app".to_string(),
            chart: "chart".to_string(),
        });
        let mut dispatched = StageDefinition::new("deploy");
        dispatched.deploy = Some(DeploySpec {
            target: DeployTarget::Dispatched,
            values_path: "values.yaml".to_string(),
            release_name: "app".to_string(),
            chart: "chart".to_string(),
        });

        let graph = StageGraph::build(&definition(vec![deploy, dispatched])).unwrap();
        assert_eq!(graph.fixed_environments(), vec!["staging"]);
    }
}
