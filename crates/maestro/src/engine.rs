//! Workflow engine: input validation and sequential step execution.

use crate::loader;
use maestro_core::{
    dispatch, ActionIdentity, Context, PluginRegistry, Resources, Scope, Step, WorkflowError,
};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Lifecycle of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Loaded,
    ValidatingInputs,
    RunningSteps,
    Completed,
    Failed,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::Loaded => "loaded",
            WorkflowState::ValidatingInputs => "validating-inputs",
            WorkflowState::RunningSteps => "running-steps",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl InputSpec {
    pub fn required(name: impl Into<String>) -> Self {
        InputSpec {
            name: name.into(),
            required: true,
            default: None,
            description: None,
        }
    }

    /// A required input with a default is satisfied without being provided.
    fn is_satisfied_by(&self, provided: &Mapping) -> bool {
        !self.required || self.default.is_some() || provided.contains_key(self.name.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct InputDeclaration {
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Parses an `inputs` block: a list of names, a list of `{name, ...}`
/// mappings, or a mapping of name to declaration.
fn parse_inputs(block: Option<&Value>) -> Result<Vec<InputSpec>, WorkflowError> {
    let block = match block {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(block) => loader::strip_line_markers(block),
    };
    let declared = |name: String, declaration: Value| -> Result<InputSpec, WorkflowError> {
        if declaration.is_null() {
            return Ok(InputSpec::required(name));
        }
        let declaration: InputDeclaration = serde_yaml::from_value(declaration)?;
        Ok(InputSpec {
            name,
            required: declaration.required,
            default: declaration.default,
            description: declaration.description,
        })
    };

    match block {
        Value::Sequence(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(InputSpec::required(name)),
                Value::Mapping(mut mapping) => {
                    let name = mapping
                        .remove("name")
                        .and_then(|name| name.as_str().map(str::to_string))
                        .ok_or_else(|| {
                            WorkflowError::InvalidConfiguration(
                                "input declarations in a list need a 'name'".to_string(),
                            )
                        })?;
                    declared(name, Value::Mapping(mapping))
                }
                other => Err(WorkflowError::InvalidConfiguration(format!(
                    "invalid input declaration: {other:?}"
                ))),
            })
            .collect(),
        Value::Mapping(mapping) => mapping
            .into_iter()
            .map(|(name, declaration)| match name {
                Value::String(name) => declared(name, declaration),
                other => Err(WorkflowError::InvalidConfiguration(format!(
                    "input names must be strings, found {other:?}"
                ))),
            })
            .collect(),
        _ => Err(WorkflowError::InvalidConfiguration(
            "'inputs' must be a list or a mapping".to_string(),
        )),
    }
}

/// Checks provided inputs against declarations.
///
/// Every missing required input is reported, in declaration order.
pub fn validate_inputs(declared: &[InputSpec], provided: &Mapping) -> Result<(), WorkflowError> {
    let missing: Vec<String> = declared
        .iter()
        .filter(|spec| !spec.is_satisfied_by(provided))
        .map(|spec| spec.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::WorkflowValidation { missing })
    }
}

/// A parsed workflow document.
#[derive(Debug, Clone)]
pub struct Workflow {
    document: Mapping,
    name: Option<String>,
    inputs: Vec<InputSpec>,
    plugins: Vec<String>,
    steps: Vec<Step>,
}

impl Workflow {
    /// Loads and parses the workflow document at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        Self::from_document(loader::load_document(path).await?)
    }

    /// Parses an already loaded document.
    ///
    /// Every step is discriminated here, so a malformed step fails the
    /// whole workflow before anything executes.
    pub fn from_document(document: Value) -> Result<Self, WorkflowError> {
        let Value::Mapping(document) = document else {
            return Err(WorkflowError::InvalidConfiguration(
                "workflow document must be a mapping".to_string(),
            ));
        };

        let steps = match document.get("steps").or_else(|| document.get("body")) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .enumerate()
                .map(|(index, raw)| Step::parse(index, raw))
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(WorkflowError::InvalidConfiguration(
                    "'steps' must be a list".to_string(),
                ))
            }
        };

        let plugins = match document.get("plugins") {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Workflow {
            name: document.get("name").and_then(Value::as_str).map(str::to_string),
            inputs: parse_inputs(document.get("inputs"))?,
            plugins,
            steps,
            document,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Builds the workflow scope: `env`, then input defaults, then provided inputs.
    fn scope(&self, provided: &Mapping) -> Result<Scope, WorkflowError> {
        let defaults = self
            .inputs
            .iter()
            .filter_map(|spec| Some((spec.name.clone(), spec.default.clone()?)));
        let provided = provided
            .iter()
            .filter_map(|(key, value)| Some((key.as_str()?.to_string(), value.clone())));
        Ok(Scope::from_env_block(self.document.get("env"))?
            .with_overrides(defaults)
            .with_overrides(provided))
    }
}

/// The outcome of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub steps_completed: usize,
    /// Each step's identity and result, in execution order.
    pub results: Vec<(ActionIdentity, Value)>,
    /// Resources held by the root context when the run finished.
    pub resources: Resources,
}

/// Runs one workflow, top-level or nested.
#[derive(Debug)]
pub struct WorkflowRunner<'r> {
    registry: &'r PluginRegistry,
    workflow: Workflow,
    inputs: Mapping,
    state: WorkflowState,
}

impl<'r> WorkflowRunner<'r> {
    pub fn new(registry: &'r PluginRegistry, workflow: Workflow) -> Self {
        WorkflowRunner {
            registry,
            workflow,
            inputs: Mapping::new(),
            state: WorkflowState::Loaded,
        }
    }

    /// Replaces the provided inputs.
    pub fn with_inputs(mut self, inputs: Mapping) -> Self {
        self.inputs = inputs;
        self
    }

    /// Adds one provided input.
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(Value::from(name.into()), value.into());
        self
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    fn transition(&mut self, next: WorkflowState) {
        debug!(workflow = ?self.workflow.name(), from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Runs the workflow in a fresh context tree.
    pub async fn run(&mut self) -> Result<RunSummary, WorkflowError> {
        let scope = self.prepare()?;
        let root = Context::root(self.workflow.document.clone(), scope);
        self.run_in(&root).await
    }

    /// Runs the workflow as a subtree of `parent`, sharing its resources.
    pub async fn run_nested(&mut self, parent: &Context<'_>) -> Result<RunSummary, WorkflowError> {
        let scope = self.prepare()?;
        let ctx = parent.child(self.workflow.document.clone(), scope);
        self.run_in(&ctx).await
    }

    /// Validates inputs and builds the workflow scope.
    fn prepare(&mut self) -> Result<Scope, WorkflowError> {
        self.transition(WorkflowState::ValidatingInputs);
        for plugin in self.workflow.plugins() {
            if !self.registry.contains(plugin) {
                warn!("Declared plugin '{plugin}' is not registered; steps using it will fail");
            }
        }

        let prepared = validate_inputs(self.workflow.inputs(), &self.inputs)
            .and_then(|()| self.workflow.scope(&self.inputs));
        if prepared.is_err() {
            self.transition(WorkflowState::Failed);
        }
        prepared
    }

    async fn run_in(&mut self, ctx: &Context<'_>) -> Result<RunSummary, WorkflowError> {
        self.transition(WorkflowState::RunningSteps);
        info!(
            "Start workflow: {}",
            self.workflow.name().unwrap_or("<unnamed>")
        );

        let outcome = run_steps(self.registry, self.workflow.steps(), ctx).await;
        match outcome {
            Ok(summary) => {
                self.transition(WorkflowState::Completed);
                info!(
                    steps = summary.steps_completed,
                    "Finished workflow: {}",
                    self.workflow.name().unwrap_or("<unnamed>")
                );
                Ok(summary)
            }
            Err(error) => {
                self.transition(WorkflowState::Failed);
                Err(error)
            }
        }
    }
}

async fn run_steps(
    registry: &PluginRegistry,
    steps: &[Step],
    ctx: &Context<'_>,
) -> Result<RunSummary, WorkflowError> {
    let mut summary = RunSummary::default();
    for step in steps {
        let identity = step.identity();
        info!("Executing step: {identity}");

        let config = step.config().as_mapping().cloned().unwrap_or_default();
        let scope = Scope::from_env_block(config.get("env")).map_err(|e| e.attribute(identity))?;
        let mut step_ctx = ctx.child(config, scope);
        step_ctx.set_action(identity.clone());

        let result = dispatch(
            registry,
            &mut step_ctx,
            step.kind().plugin_tag(),
            step.config(),
        )
        .await?;

        info!("Completed {identity}");
        summary.steps_completed += 1;
        summary.results.push((identity.clone(), result));
    }
    summary.resources = ctx.resources_snapshot();
    Ok(summary)
}
