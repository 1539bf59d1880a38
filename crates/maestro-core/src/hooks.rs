//! Plugin dispatch and the pre/post hook runner.
//!
//! A dispatch resolves a raw config against its context, validates it,
//! runs `pre` hooks, executes the primary action and then runs `post`
//! hooks. Every failure leaving a dispatch is attributed to the action
//! identity of the dispatching context.

use crate::context::Context;
use crate::error::{HookPhase, WorkflowError};
use crate::registry::PluginRegistry;
use crate::step::{ActionIdentity, LINE_KEY};
use serde_yaml::{Mapping, Value};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info};

/// A boxed, single-threaded future; dispatch recurses through hooks and
/// nested workflows, so its future must be boxed.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Dispatches `raw` to the plugin registered as `plugin`.
///
/// `ctx` must already carry the identity of the action being dispatched.
pub fn dispatch<'a, 'p: 'a>(
    registry: &'a PluginRegistry,
    ctx: &'a mut Context<'p>,
    plugin: &'a str,
    raw: &'a Value,
) -> LocalBoxFuture<'a, Result<Value, WorkflowError>> {
    Box::pin(async move {
        match run_action(registry, ctx, plugin, raw).await {
            Ok(result) => Ok(result),
            Err(error) => Err(ctx.attribute(error)),
        }
    })
}

async fn run_action(
    registry: &PluginRegistry,
    ctx: &mut Context<'_>,
    plugin: &str,
    raw: &Value,
) -> Result<Value, WorkflowError> {
    let executor = registry.create(plugin)?;
    let args = executor.resolve_config(ctx, raw)?;
    ctx.set_action_args(args.clone());
    executor.validate(&args)?;

    let ctx: &Context<'_> = ctx;
    execute_hooks(registry, ctx, HookPhase::Pre, &args).await?;
    debug!(plugin, "executing primary action");
    let result = executor.execute(ctx, registry, &args).await?;
    execute_hooks(registry, ctx, HookPhase::Post, &args).await?;
    Ok(result)
}

/// Runs the hooks declared under `args[phase]`, in order.
///
/// Each hook runs in a transient child context with a synthesized identity
/// (`Hook-<n>` unless it declares a `name`). The first failing hook aborts
/// the phase.
pub fn execute_hooks<'a, 'p: 'a>(
    registry: &'a PluginRegistry,
    ctx: &'a Context<'p>,
    phase: HookPhase,
    args: &'a Mapping,
) -> LocalBoxFuture<'a, Result<(), WorkflowError>> {
    Box::pin(async move {
        let hooks = match args.get(phase.key()) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Sequence(items)) => items.iter().collect::<Vec<_>>(),
            Some(single @ Value::Mapping(_)) => vec![single],
            Some(other) => {
                return Err(WorkflowError::InvalidConfiguration(format!(
                    "'{phase}' hooks must be a mapping or a list of mappings, found {other:?}"
                )))
            }
        };

        for (index, hook) in hooks.into_iter().enumerate() {
            let identity = ActionIdentity::from_declaration(hook, format!("Hook-{}", index + 1));
            let (plugin, config) = hook_target(hook).map_err(|e| e.attribute(&identity))?;

            let mut hook_ctx = ctx.push(hook_scope_config(hook))?;
            hook_ctx.set_action(identity.clone());
            info!("Executing {phase} hook: {identity} via '{plugin}'");
            dispatch(registry, &mut hook_ctx, plugin, config).await?;
        }
        Ok(())
    })
}

/// Splits a hook entry into its plugin tag and plugin config.
///
/// The tag is the first key other than `name`, `env` and the line marker.
fn hook_target(hook: &Value) -> Result<(&str, &Value), WorkflowError> {
    let mapping = hook.as_mapping().ok_or_else(|| {
        WorkflowError::InvalidConfiguration("hook entries must be mappings".to_string())
    })?;
    mapping
        .iter()
        .find_map(|(key, value)| match key.as_str() {
            Some("name") | Some("env") | Some(LINE_KEY) | None => None,
            Some(tag) => Some((tag, value)),
        })
        .ok_or_else(|| {
            WorkflowError::InvalidConfiguration(
                "hook entry must name a plugin, e.g. `sh: <command>`".to_string(),
            )
        })
}

/// Keeps only the keys of a hook entry that shape its own context.
fn hook_scope_config(hook: &Value) -> Mapping {
    hook.as_mapping()
        .map(|mapping| {
            mapping
                .iter()
                .filter(|(key, _)| matches!(key.as_str(), Some("name") | Some("env") | Some(LINE_KEY)))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::scope::Scope;
    use async_trait::async_trait;

    /// Appends its `record` argument to the `log` resource; fails on `fail: true`.
    #[derive(Debug)]
    struct Recorder;

    #[async_trait(?Send)]
    impl Executor for Recorder {
        fn param_key(&self) -> &'static str {
            "record"
        }

        async fn execute(
            &self,
            ctx: &Context<'_>,
            _registry: &PluginRegistry,
            args: &Mapping,
        ) -> Result<Value, WorkflowError> {
            if args.get("fail") == Some(&Value::Bool(true)) {
                return Err(WorkflowError::InvalidConfiguration("told to fail".to_string()));
            }
            let mut log = match ctx.get_resource("log") {
                Some(Value::Sequence(items)) => items,
                _ => Vec::new(),
            };
            let entry = args.get("record").cloned().unwrap_or(Value::Null);
            log.push(entry.clone());
            ctx.set_resource("log", Value::Sequence(log));
            Ok(entry)
        }
    }

    fn recorder() -> Box<dyn Executor> {
        Box::new(Recorder)
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::with_plugins(&[("rec", recorder as crate::ExecutorFactory)]).unwrap()
    }

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn log(ctx: &Context<'_>) -> Value {
        ctx.get_resource("log").unwrap_or(Value::Null)
    }

    #[test]
    fn test_hooks_run_around_primary_action() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", Some(1)));
        let config = yaml(
            "
record: main
pre:
  - rec: before-1
  - rec: before-2
post:
  rec: after
",
        );

        let result = tokio_test::block_on(dispatch(&registry, &mut step, "rec", &config)).unwrap();

        assert_eq!(result, Value::from("main"));
        assert_eq!(log(&root), yaml("[before-1, before-2, main, after]"));
    }

    #[test]
    fn test_failing_pre_hook_skips_primary_action() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", Some(1)));
        let config = yaml(
            "
record: main
pre:
  - {rec: {record: bad, fail: true}, __line__: 4}
post:
  - rec: after
",
        );

        let error =
            tokio_test::block_on(dispatch(&registry, &mut step, "rec", &config)).unwrap_err();

        assert_eq!(error.action(), Some(&ActionIdentity::new("main", Some(1))));
        match &error {
            WorkflowError::Execution { source, .. } => {
                assert_eq!(source.action(), Some(&ActionIdentity::new("Hook-1", Some(4))));
            }
            other => unreachable!("unexpected error: {other}"),
        }
        assert_eq!(log(&root), Value::Null);
    }

    #[test]
    fn test_failing_primary_action_skips_post_hooks() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", None));
        let config = yaml("{record: main, fail: true, post: [{rec: after}]}");

        assert!(tokio_test::block_on(dispatch(&registry, &mut step, "rec", &config)).is_err());
        assert_eq!(log(&root), Value::Null);
    }

    #[test]
    fn test_hooks_can_reference_parent_action_args() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", None));
        let config = yaml("{record: payload, post: [{name: announce, rec: 'saw $[action.record]'}]}");

        tokio_test::block_on(dispatch(&registry, &mut step, "rec", &config)).unwrap();
        assert_eq!(log(&root), yaml("[payload, saw payload]"));
    }

    #[test]
    fn test_hooks_may_carry_their_own_hooks() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", None));
        let config = yaml("{record: main, pre: [{rec: {record: outer, pre: [{rec: inner}]}}]}");

        tokio_test::block_on(dispatch(&registry, &mut step, "rec", &config)).unwrap();
        assert_eq!(log(&root), yaml("[inner, outer, main]"));
    }

    #[test]
    fn test_unknown_plugin_is_attributed() {
        let registry = registry();
        let root = Context::root(Mapping::new(), Scope::new());
        let mut step = root.child(Mapping::new(), Scope::new());
        step.set_action(ActionIdentity::new("main", Some(2)));

        let error = tokio_test::block_on(dispatch(&registry, &mut step, "nope", &Value::from("x")))
            .unwrap_err();
        assert_eq!(error.action(), Some(&ActionIdentity::new("main", Some(2))));
        assert!(matches!(error.root_cause(), WorkflowError::UnknownPlugin(_)));
    }

    #[test]
    fn test_hook_entry_without_plugin_is_invalid() {
        assert!(hook_target(&yaml("{name: lonely}")).is_err());
        let hook = yaml("{name: tag, rec: x}");
        let (plugin, config) = hook_target(&hook).unwrap();
        assert_eq!(plugin, "rec");
        assert_eq!(config, &Value::from("x"));
    }
}
