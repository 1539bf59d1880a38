use crate::engine::{Workflow, WorkflowRunner};
use async_trait::async_trait;
use maestro_core::{require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

/// Runs another workflow document as a single step.
///
/// `use` is a path relative to the current directory; `inputs` seeds the
/// nested workflow's declared inputs. The nested run gets its own context
/// subtree under the calling step, so it shares the root's resources.
#[derive(Debug, Default)]
pub struct NestedWorkflow;

#[async_trait(?Send)]
impl Executor for NestedWorkflow {
    fn param_key(&self) -> &'static str {
        "use"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "use")?;
        match args.get("inputs") {
            None | Some(Value::Null) | Some(Value::Mapping(_)) => Ok(()),
            Some(_) => Err(WorkflowError::InvalidConfiguration(
                "'inputs' must be a mapping".to_string(),
            )),
        }
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let path = require_str(args, "use")?;
        let inputs = match args.get("inputs") {
            Some(Value::Mapping(inputs)) => inputs.clone(),
            _ => Mapping::new(),
        };

        info!("Executing workflow: {path}");
        debug!("Workflow inputs: {inputs:?}");
        let workflow = Workflow::load(path).await?;
        let summary = WorkflowRunner::new(registry, workflow)
            .with_inputs(inputs)
            .run_nested(ctx)
            .await?;
        info!("Workflow {path} completed ({} steps)", summary.steps_completed);

        Ok(Value::Sequence(
            summary.results.into_iter().map(|(_, result)| result).collect(),
        ))
    }
}
