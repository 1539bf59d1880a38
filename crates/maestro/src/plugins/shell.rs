use super::{process_env, working_dir};
use crate::process::{self, CommandSpec};
use async_trait::async_trait;
use maestro_core::{optional_str, require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

/// Runs a command through a shell.
///
/// Config: `run` (required), `shell` (default `sh`), `working_dir`, `env`.
/// Writes `last_command_output` and `last_command_exit_code`, plus
/// `last_command_error` when the command fails.
#[derive(Debug, Default)]
pub struct Shell;

#[async_trait(?Send)]
impl Executor for Shell {
    fn param_key(&self) -> &'static str {
        "run"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "run")?;
        optional_str(args, "shell")?;
        working_dir(args)?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let command = require_str(args, "run")?;
        let shell = optional_str(args, "shell")?.unwrap_or("sh");
        let mut spec = CommandSpec::with_shell(shell, command).envs(process_env(ctx, args)?);
        if let Some(dir) = working_dir(args)? {
            spec = spec.working_dir(dir);
        }

        info!("Executing command: {command}");
        let output = process::run(&spec).await?;
        if !output.stdout.is_empty() {
            info!("Command output:\n{}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            warn!("Command error output:\n{}", output.stderr.trim_end());
        }

        ctx.set_resource("last_command_output", output.stdout.clone());
        if let Some(code) = output.exit_code {
            ctx.set_resource("last_command_exit_code", code);
        }
        if !output.success() {
            ctx.set_resource("last_command_error", output.stderr.clone());
        }
        let output = output.check()?;
        Ok(Value::from(output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::Scope;

    fn args(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_output_lands_in_resources() {
        let registry = PluginRegistry::new();
        let root = Context::root(
            Mapping::new(),
            Scope::new().with_overrides([("WHO", Value::from("maestro"))]),
        );

        let result = Shell
            .execute(&root, &registry, &args("{run: 'echo hello $WHO'}"))
            .await
            .unwrap();

        assert_eq!(result, Value::from("hello maestro\n"));
        assert_eq!(
            root.get_resource("last_command_output"),
            Some(Value::from("hello maestro\n"))
        );
        assert_eq!(root.get_resource("last_command_exit_code"), Some(Value::from(0)));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let registry = PluginRegistry::new();
        let root = Context::root(Mapping::new(), Scope::new());

        let error = Shell
            .execute(&root, &registry, &args("{run: 'echo oops >&2; exit 3'}"))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            WorkflowError::CommandFailed {
                exit_code: Some(3),
                ..
            }
        ));
        assert_eq!(root.get_resource("last_command_exit_code"), Some(Value::from(3)));
        assert_eq!(root.get_resource("last_command_error"), Some(Value::from("oops\n")));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut config = Mapping::new();
        config.insert("run".into(), "touch created".into());
        config.insert("working_dir".into(), dir.path().display().to_string().into());

        Shell.execute(&root, &registry, &config).await.unwrap();
        assert!(dir.path().join("created").exists());
    }

    #[test]
    fn test_validate_requires_run() {
        assert!(Shell.validate(&args("{working_dir: /tmp}")).is_err());
        assert!(Shell.validate(&args("{run: [a, b]}")).is_err());
        assert!(Shell.validate(&args("{run: ls}")).is_ok());
    }
}
