//! Pipeline definition parser
//!
//! Evaluates a Lua pipeline definition in the sandbox and converts the
//! resulting table into an immutable [`PipelineDefinition`].
//!
//! Structural checks that need the whole graph (unknown dependencies, cycles,
//! empty matrix axes) belong to the stage graph builder, not to this parser.

use keel_core::domain::condition::RunCondition;
use keel_core::domain::pipeline::{
    ArtifactSpec, DEFAULT_PRIMARY_BRANCH, DeploySpec, DeployTarget, MatrixAxis,
    PipelineDefinition, StageDefinition, Step,
};
use keel_core::domain::trigger::TriggerKind;
use mlua::{Table, Value};
use std::collections::BTreeMap;

use crate::error::{DefinitionError, Result};
use crate::sandbox::create_sandbox;

/// Chart directory used when a deploy block does not name one
pub const DEFAULT_CHART: &str = "chart";

/// Parse a pipeline definition from Lua source code
///
/// # Example
/// ```no_run
/// use keel_lua::parser::parse_pipeline_definition;
///
/// let source = r#"
///     return pipeline.define {
///         name = "todo-app",
///         stages = {
///             {
///                 name = "test",
///                 matrix = { pipeline.axis("python", {"3.8", "3.9"}) },
///                 steps = { "pip install -r requirements.txt", "python manage.py test" },
///             },
///             {
///                 name = "publish",
///                 needs = { "test" },
///                 when = { primary = true, event = "push" },
///                 steps = { pipeline.step("build", "docker build -t todo .") },
///             },
///         },
///     }
/// "#;
///
/// let definition = parse_pipeline_definition(source)?;
/// assert_eq!(definition.stages.len(), 2);
/// # Ok::<(), keel_lua::DefinitionError>(())
/// ```
pub fn parse_pipeline_definition(source: &str) -> Result<PipelineDefinition> {
    let lua = create_sandbox()?;

    let pipeline: Table = lua.load(source).set_name("pipeline").eval()?;

    let name: String = pipeline
        .get::<Option<String>>("name")?
        .ok_or_else(|| DefinitionError::missing("pipeline", "name"))?;

    let description: Option<String> = pipeline.get("description")?;
    let primary_branch: String = pipeline
        .get::<Option<String>>("primary_branch")?
        .unwrap_or_else(|| DEFAULT_PRIMARY_BRANCH.to_string());

    let stages = parse_stages(&pipeline)?;

    Ok(PipelineDefinition {
        name,
        description,
        primary_branch,
        stages,
    })
}

/// Parse the 'stages' array
fn parse_stages(pipeline: &Table) -> Result<Vec<StageDefinition>> {
    let stages_table = match pipeline.get::<Value>("stages")? {
        Value::Table(table) => table,
        Value::Nil => return Err(DefinitionError::missing("pipeline", "stages")),
        _ => {
            return Err(DefinitionError::invalid(
                "pipeline",
                "stages",
                "must be an array of stage tables",
            ));
        }
    };

    let mut stages = Vec::new();
    for (idx, value) in stages_table.sequence_values::<Table>().enumerate() {
        let table = value.map_err(|e| {
            DefinitionError::invalid("pipeline", "stages", format!("entry {}: {}", idx + 1, e))
        })?;
        stages.push(parse_stage(&table, idx)?);
    }

    Ok(stages)
}

fn parse_stage(table: &Table, idx: usize) -> Result<StageDefinition> {
    let name: String = table
        .get::<Option<String>>("name")?
        .ok_or_else(|| DefinitionError::missing(format!("stage #{}", idx + 1), "name"))?;
    let context = format!("stage '{}'", name);

    let mut stage = StageDefinition::new(name);
    stage.needs = string_list(table.get("needs")?, &context, "needs")?;
    stage.condition = parse_condition(table.get("when")?, &context)?;
    stage.matrix = parse_matrix(table.get("matrix")?, &context)?;
    stage.steps = parse_steps(table.get("steps")?, &context)?;
    stage.artifacts = parse_artifacts(table.get("artifacts")?, &context)?;
    stage.deploy = parse_deploy(table.get("deploy")?, &context)?;
    stage.registry = table.get::<Option<bool>>("registry")?.unwrap_or(false);
    stage.timeout_seconds = table.get("timeout")?;

    Ok(stage)
}

/// Accepts `"x"` or `{ "x", "y" }`
fn string_list(value: Value, context: &str, field: &str) -> Result<Vec<String>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s.to_string_lossy().to_string()]),
        Value::Table(table) => table
            .sequence_values::<String>()
            .map(|v| v.map_err(|e| DefinitionError::invalid(context, field, e.to_string())))
            .collect(),
        _ => Err(DefinitionError::invalid(
            context,
            field,
            "must be a string or an array of strings",
        )),
    }
}

/// Parse a `when` clause
///
/// Accepted forms: `"always"`, `"primary"`, a boolean, or a table whose keys
/// (`primary`, `branch`, `event`, `environment`, `all`, `any`, `not`) must
/// all hold.
fn parse_condition(value: Value, context: &str) -> Result<RunCondition> {
    match value {
        Value::Nil => Ok(RunCondition::Always),
        Value::Boolean(true) => Ok(RunCondition::Always),
        Value::Boolean(false) => Ok(RunCondition::Not(Box::new(RunCondition::Always))),
        Value::String(s) => match s.to_string_lossy().to_string().as_str() {
            "always" => Ok(RunCondition::Always),
            "primary" => Ok(RunCondition::PrimaryBranch),
            other => Err(DefinitionError::invalid(
                context,
                "when",
                format!("unknown condition '{}'", other),
            )),
        },
        Value::Table(table) => parse_condition_table(&table, context),
        _ => Err(DefinitionError::invalid(
            context,
            "when",
            "must be a string, boolean or table",
        )),
    }
}

fn parse_condition_table(table: &Table, context: &str) -> Result<RunCondition> {
    const KNOWN: [&str; 7] = ["primary", "branch", "event", "environment", "all", "any", "not"];

    for pair in table.pairs::<Value, Value>() {
        let (key, _) = pair?;
        let known = match &key {
            Value::String(s) => KNOWN.contains(&s.to_string_lossy().to_string().as_str()),
            _ => false,
        };
        if !known {
            return Err(DefinitionError::invalid(
                context,
                "when",
                format!("unknown key {:?}", key),
            ));
        }
    }

    let mut conds = Vec::new();

    if let Some(primary) = table.get::<Option<bool>>("primary")? {
        let cond = RunCondition::PrimaryBranch;
        conds.push(if primary {
            cond
        } else {
            RunCondition::Not(Box::new(cond))
        });
    }

    let branches = string_list(table.get("branch")?, context, "when.branch")?;
    if !branches.is_empty() {
        conds.push(any_of(branches.into_iter().map(RunCondition::Branch).collect()));
    }

    let events = string_list(table.get("event")?, context, "when.event")?;
    if !events.is_empty() {
        let kinds = events
            .iter()
            .map(|e| {
                TriggerKind::parse(e)
                    .map(RunCondition::Event)
                    .ok_or_else(|| {
                        DefinitionError::invalid(
                            context,
                            "when.event",
                            format!("unknown event '{}'", e),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        conds.push(any_of(kinds));
    }

    let environments = string_list(table.get("environment")?, context, "when.environment")?;
    if !environments.is_empty() {
        conds.push(any_of(
            environments.into_iter().map(RunCondition::Environment).collect(),
        ));
    }

    let combinators: [(&str, fn(Vec<RunCondition>) -> RunCondition); 2] =
        [("all", RunCondition::All), ("any", RunCondition::Any)];
    for (key, combine) in combinators {
        if let Some(list) = table.get::<Option<Table>>(key)? {
            let nested = list
                .sequence_values::<Value>()
                .map(|v| parse_condition(v?, context))
                .collect::<Result<Vec<_>>>()?;
            conds.push(combine(nested));
        }
    }

    let negated: Value = table.get("not")?;
    if !negated.is_nil() {
        conds.push(RunCondition::Not(Box::new(parse_condition(negated, context)?)));
    }

    Ok(match conds.len() {
        0 => RunCondition::Always,
        1 => conds.remove(0),
        _ => RunCondition::All(conds),
    })
}

fn any_of(mut conds: Vec<RunCondition>) -> RunCondition {
    if conds.len() == 1 {
        conds.remove(0)
    } else {
        RunCondition::Any(conds)
    }
}

/// Parse matrix axes, which must be a list to keep declaration order
fn parse_matrix(value: Value, context: &str) -> Result<Vec<MatrixAxis>> {
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => {
            return Err(DefinitionError::invalid(
                context,
                "matrix",
                "must be a list of { name, values } axes",
            ));
        }
    };

    let declared = table.pairs::<Value, Value>().count();
    if declared != table.raw_len() {
        return Err(DefinitionError::invalid(
            context,
            "matrix",
            "must be a list of { name, values } axes so that axis order is preserved",
        ));
    }

    let mut axes = Vec::new();
    for value in table.sequence_values::<Table>() {
        let axis = value?;
        let name: String = axis
            .get::<Option<String>>("name")?
            .ok_or_else(|| DefinitionError::missing(format!("matrix axis of {}", context), "name"))?;
        let values: Vec<String> = match axis.get::<Value>("values")? {
            Value::Table(values) => values
                .sequence_values::<Value>()
                .map(|v| axis_value(v?, context))
                .collect::<Result<Vec<_>>>()?,
            Value::Nil => {
                return Err(DefinitionError::missing(
                    format!("matrix axis '{}' of {}", name, context),
                    "values",
                ));
            }
            _ => {
                return Err(DefinitionError::invalid(
                    context,
                    "matrix",
                    format!("values of axis '{}' must be an array", name),
                ));
            }
        };
        axes.push(MatrixAxis { name, values });
    }

    Ok(axes)
}

/// Axis values are strings, integers or booleans
///
/// Floats lose their written form (`3.10` reads back as `3.1`), so versions
/// must be quoted.
fn axis_value(value: Value, context: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Number(n) => Err(DefinitionError::invalid(
            context,
            "matrix",
            format!("axis value {} is a float, write it as a string (\"{}\")", n, n),
        )),
        other => Err(DefinitionError::invalid(
            context,
            "matrix",
            format!("unsupported axis value {:?}", other),
        )),
    }
}

/// Steps are command strings or `{ name, run, env }` tables
fn parse_steps(value: Value, context: &str) -> Result<Vec<Step>> {
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => {
            return Err(DefinitionError::invalid(
                context,
                "steps",
                "must be an array",
            ));
        }
    };

    let mut steps = Vec::new();
    for (idx, value) in table.sequence_values::<Value>().enumerate() {
        let step = match value? {
            Value::String(run) => Step::new(format!("step {}", idx + 1), run.to_string_lossy()),
            Value::Table(step) => {
                let run: String = step.get::<Option<String>>("run")?.ok_or_else(|| {
                    DefinitionError::missing(format!("step {} of {}", idx + 1, context), "run")
                })?;
                let name: String = step
                    .get::<Option<String>>("name")?
                    .unwrap_or_else(|| format!("step {}", idx + 1));
                let env = match step.get::<Option<Table>>("env")? {
                    Some(env) => env
                        .pairs::<String, String>()
                        .collect::<mlua::Result<BTreeMap<_, _>>>()?,
                    None => BTreeMap::new(),
                };
                Step { name, run, env }
            }
            _ => {
                return Err(DefinitionError::invalid(
                    context,
                    "steps",
                    format!("step {} must be a string or table", idx + 1),
                ));
            }
        };
        steps.push(step);
    }

    Ok(steps)
}

fn parse_artifacts(value: Value, context: &str) -> Result<Vec<ArtifactSpec>> {
    let table = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Table(table) => table,
        _ => {
            return Err(DefinitionError::invalid(
                context,
                "artifacts",
                "must be an array of { name, path } tables",
            ));
        }
    };

    let mut artifacts = Vec::new();
    for value in table.sequence_values::<Table>() {
        let artifact = value?;
        let name: Option<String> = artifact.get("name")?;
        let path: Option<String> = artifact.get("path")?;
        match (name, path) {
            (Some(name), Some(path)) => artifacts.push(ArtifactSpec { name, path }),
            (None, _) => return Err(DefinitionError::missing(format!("artifact of {}", context), "name")),
            (Some(name), None) => {
                return Err(DefinitionError::missing(
                    format!("artifact '{}' of {}", name, context),
                    "path",
                ));
            }
        }
    }

    Ok(artifacts)
}

/// Parse a `deploy` block
///
/// `environment = "development"` deploys to a fixed environment;
/// `dispatched = true` deploys to the environment chosen by a manual dispatch.
fn parse_deploy(value: Value, context: &str) -> Result<Option<DeploySpec>> {
    let table = match value {
        Value::Nil => return Ok(None),
        Value::Table(table) => table,
        _ => {
            return Err(DefinitionError::invalid(
                context,
                "deploy",
                "must be a table",
            ));
        }
    };

    let environment: Option<String> = table.get("environment")?;
    let dispatched = table.get::<Option<bool>>("dispatched")?.unwrap_or(false);
    let target = match (environment, dispatched) {
        (Some(env), false) => DeployTarget::Fixed(env),
        (None, true) => DeployTarget::Dispatched,
        (Some(_), true) => {
            return Err(DefinitionError::invalid(
                context,
                "deploy",
                "'environment' and 'dispatched' are mutually exclusive",
            ));
        }
        (None, false) => {
            return Err(DefinitionError::missing(
                format!("deploy block of {}", context),
                "environment",
            ));
        }
    };

    let values_path: String = table
        .get::<Option<String>>("values")?
        .ok_or_else(|| DefinitionError::missing(format!("deploy block of {}", context), "values"))?;
    let release_name: String = table
        .get::<Option<String>>("release")?
        .ok_or_else(|| DefinitionError::missing(format!("deploy block of {}", context), "release"))?;
    let chart: String = table
        .get::<Option<String>>("chart")?
        .unwrap_or_else(|| DEFAULT_CHART.to_string());

    Ok(Some(DeploySpec {
        target,
        values_path,
        release_name,
        chart,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_PIPELINE: &str = r#"
        return pipeline.define {
            name = "todo-app",
            description = "Build, test and deploy the todo app",
            stages = {
                pipeline.stage {
                    name = "test",
                    matrix = {
                        pipeline.axis("version", { "3.8", "3.9" }),
                        { name = "os", values = { "A", "B" } },
                    },
                    steps = {
                        "pip install -r requirements.txt",
                        { name = "unit", run = "python manage.py test", env = { DJANGO_SETTINGS_MODULE = "todo.settings" } },
                    },
                    artifacts = { { name = "coverage", path = "coverage.xml" } },
                },
                {
                    name = "publish",
                    needs = { "test" },
                    when = { primary = true, event = "push" },
                    registry = true,
                    steps = { pipeline.step("image", "docker build -t todo .") },
                },
                {
                    name = "deploy-development",
                    needs = "publish",
                    when = "primary",
                    deploy = { environment = "development", values = "chart/values-dev.yaml", release = "todo" },
                },
                {
                    name = "deploy-dispatch",
                    when = { event = "manual_dispatch" },
                    deploy = { dispatched = true, values = "chart/values-staging.yaml", release = "todo", chart = "helm/todo" },
                    timeout = 600,
                },
            },
        }
    "#;

    #[test]
    fn test_parse_full_definition() {
        let def = parse_pipeline_definition(SERVICE_PIPELINE).unwrap();
        assert_eq!(def.name, "todo-app");
        assert_eq!(def.primary_branch, "main");
        assert_eq!(def.stages.len(), 4);

        let test = def.stage("test").unwrap();
        assert_eq!(test.matrix.len(), 2);
        assert_eq!(test.matrix[0].name, "version");
        assert_eq!(test.matrix[0].values, vec!["3.8", "3.9"]);
        assert_eq!(test.steps.len(), 2);
        assert_eq!(test.steps[0].name, "step 1");
        assert_eq!(
            test.steps[1].env.get("DJANGO_SETTINGS_MODULE").map(String::as_str),
            Some("todo.settings")
        );
        assert_eq!(test.artifacts[0].path, "coverage.xml");
        assert_eq!(test.condition, RunCondition::Always);

        let publish = def.stage("publish").unwrap();
        assert_eq!(publish.needs, vec!["test"]);
        assert!(publish.registry);
        assert_eq!(
            publish.condition,
            RunCondition::All(vec![
                RunCondition::PrimaryBranch,
                RunCondition::Event(TriggerKind::Push),
            ])
        );

        let deploy = def.stage("deploy-development").unwrap();
        assert_eq!(deploy.condition, RunCondition::PrimaryBranch);
        let spec = deploy.deploy.as_ref().unwrap();
        assert_eq!(spec.target, DeployTarget::Fixed("development".to_string()));
        assert_eq!(spec.chart, DEFAULT_CHART);

        let dispatch = def.stage("deploy-dispatch").unwrap();
        assert_eq!(dispatch.deploy.as_ref().unwrap().target, DeployTarget::Dispatched);
        assert_eq!(dispatch.timeout_seconds, Some(600));
    }

    #[test]
    fn test_missing_name() {
        let result = parse_pipeline_definition("return { stages = {} }");
        assert!(matches!(result, Err(DefinitionError::MissingField { .. })));
    }

    #[test]
    fn test_missing_stages() {
        let result = parse_pipeline_definition(r#"return { name = "x" }"#);
        assert!(matches!(result, Err(DefinitionError::MissingField { .. })));
    }

    #[test]
    fn test_matrix_map_form_rejected() {
        let source = r#"
            return {
                name = "x",
                stages = { { name = "test", matrix = { os = { "A" } }, steps = { "true" } } },
            }
        "#;
        let result = parse_pipeline_definition(source);
        assert!(matches!(result, Err(DefinitionError::InvalidField { .. })));
    }

    #[test]
    fn test_float_axis_values_rejected() {
        let source = r#"
            return {
                name = "x",
                stages = {
                    { name = "test", matrix = { pipeline.axis("version", { 3.8, 3.9, 3.10 }) }, steps = { "true" } },
                },
            }
        "#;
        let err = parse_pipeline_definition(source).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidField { .. }));
        assert!(err.to_string().contains("string"));
    }

    #[test]
    fn test_integer_and_string_axis_values_kept() {
        let source = r#"
            return {
                name = "x",
                stages = {
                    { name = "test", matrix = { pipeline.axis("version", { "3.10", 20 }) }, steps = { "true" } },
                },
            }
        "#;
        let def = parse_pipeline_definition(source).unwrap();
        assert_eq!(def.stages[0].matrix[0].values, vec!["3.10", "20"]);
    }

    #[test]
    fn test_unknown_condition_key_rejected() {
        let source = r#"
            return {
                name = "x",
                stages = { { name = "test", when = { tag = "v1" }, steps = { "true" } } },
            }
        "#;
        let err = parse_pipeline_definition(source).unwrap_err();
        assert!(err.to_string().contains("when"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let source = r#"
            return {
                name = "x",
                stages = { { name = "test", when = { event = "schedule" }, steps = { "true" } } },
            }
        "#;
        assert!(parse_pipeline_definition(source).is_err());
    }

    #[test]
    fn test_nested_conditions() {
        let source = r#"
            return {
                name = "x",
                stages = {
                    {
                        name = "s",
                        when = { any = { "primary", { branch = { "release", "hotfix" } } }, ["not"] = { event = "pull_request" } },
                        steps = { "true" },
                    },
                },
            }
        "#;
        let def = parse_pipeline_definition(source).unwrap();
        assert_eq!(
            def.stages[0].condition,
            RunCondition::All(vec![
                RunCondition::Any(vec![
                    RunCondition::PrimaryBranch,
                    RunCondition::Any(vec![
                        RunCondition::Branch("release".to_string()),
                        RunCondition::Branch("hotfix".to_string()),
                    ]),
                ]),
                RunCondition::Not(Box::new(RunCondition::Event(TriggerKind::PullRequest))),
            ])
        );
    }

    #[test]
    fn test_sandbox_blocks_os_access() {
        let result = parse_pipeline_definition(r#"os.execute("true"); return { name = "x", stages = {} }"#);
        assert!(matches!(result, Err(DefinitionError::Lua(_))));
    }
}
