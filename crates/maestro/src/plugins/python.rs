use super::{process_env, working_dir};
use crate::process::{self, CommandSpec};
use async_trait::async_trait;
use maestro_core::{optional_str, require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

/// Runs an embedded script in an external interpreter.
///
/// The script is piped to `<interpreter> -` on stdin, so it never touches
/// the filesystem. Writes `last_python_output`, and either
/// `last_python_exit_code` or `last_python_error`.
#[derive(Debug, Default)]
pub struct Python;

#[async_trait(?Send)]
impl Executor for Python {
    fn param_key(&self) -> &'static str {
        "python"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "python")?;
        optional_str(args, "interpreter")?;
        working_dir(args)?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let script = require_str(args, "python")?;
        let interpreter = optional_str(args, "interpreter")?.unwrap_or("python3");
        let mut spec = CommandSpec::program(interpreter, ["-"])
            .envs(process_env(ctx, args)?)
            .stdin(script);
        if let Some(dir) = working_dir(args)? {
            spec = spec.working_dir(dir);
        }

        info!("Executing embedded script with {interpreter}");
        debug!("script:\n{script}");
        let output = process::run(&spec).await?;
        ctx.set_resource("last_python_output", output.stdout.clone());
        if output.success() {
            if let Some(code) = output.exit_code {
                ctx.set_resource("last_python_exit_code", code);
            }
        } else {
            ctx.set_resource("last_python_error", output.stderr.clone());
        }

        let output = output.check()?;
        info!("Script output:\n{}", output.stdout.trim_end());
        Ok(Value::from(output.stdout))
    }
}
