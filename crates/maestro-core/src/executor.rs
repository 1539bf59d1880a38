//! The plugin contract every step type implements.

use crate::context::Context;
use crate::error::WorkflowError;
use crate::registry::PluginRegistry;
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

/// Constructs a fresh executor for one dispatch.
pub type ExecutorFactory = fn() -> Box<dyn Executor>;

/// A step-type handler.
///
/// Executors are stateless: a new instance is constructed for every
/// dispatch, and everything an execution needs arrives through the
/// [`Context`] and the resolved argument mapping.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use maestro_core::{Context, Executor, PluginRegistry, WorkflowError};
/// use serde_yaml::{Mapping, Value};
///
/// #[derive(Debug, Default)]
/// struct Echo;
///
/// #[async_trait(?Send)]
/// impl Executor for Echo {
///     fn param_key(&self) -> &'static str {
///         "message"
///     }
///
///     async fn execute(
///         &self,
///         ctx: &Context<'_>,
///         _registry: &PluginRegistry,
///         args: &Mapping,
///     ) -> Result<Value, WorkflowError> {
///         let message = args.get("message").cloned().unwrap_or(Value::Null);
///         ctx.set_resource("last_echo", message.clone());
///         Ok(message)
///     }
/// }
/// ```
#[async_trait(?Send)]
pub trait Executor: std::fmt::Debug {
    /// Canonical key a bare scalar config is wrapped under.
    fn param_key(&self) -> &'static str;

    /// Checks the resolved config before execution.
    ///
    /// The default accepts any mapping that carries [`param_key`](Self::param_key).
    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_key(args, self.param_key())
    }

    /// Normalizes and resolves a raw config against the owning context.
    ///
    /// Scalars are wrapped as `{param_key: scalar}`; every mapping value is
    /// then passed through [`Context::resolve`]. Hook declarations are kept
    /// raw and resolve later, in their own context, when they are dispatched.
    fn resolve_config(&self, ctx: &Context<'_>, raw: &Value) -> Result<Mapping, WorkflowError> {
        match raw {
            Value::Mapping(mapping) => Ok(mapping
                .iter()
                .map(|(key, value)| match key.as_str() {
                    Some("pre") | Some("post") => (key.clone(), value.clone()),
                    _ => (key.clone(), ctx.resolve(value)),
                })
                .collect()),
            Value::Sequence(_) => Err(WorkflowError::InvalidConfiguration(format!(
                "config for '{}' must be a mapping or a scalar",
                self.param_key()
            ))),
            scalar => {
                let mut wrapped = Mapping::new();
                wrapped.insert(Value::from(self.param_key()), ctx.resolve(scalar));
                Ok(wrapped)
            }
        }
    }

    /// Performs the step's effect and returns an opaque result.
    async fn execute(
        &self,
        ctx: &Context<'_>,
        registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError>;
}

/// Fails with `InvalidConfiguration` unless `args[key]` is present and non-null.
pub fn require_key(args: &Mapping, key: &str) -> Result<(), WorkflowError> {
    match args.get(key) {
        Some(value) if !value.is_null() => Ok(()),
        _ => Err(WorkflowError::InvalidConfiguration(format!(
            "Missing required configuration key: '{key}'"
        ))),
    }
}

/// Returns `args[key]` as a string, failing with `InvalidConfiguration`.
pub fn require_str<'a>(args: &'a Mapping, key: &str) -> Result<&'a str, WorkflowError> {
    require_key(args, key)?;
    optional_str(args, key)?.ok_or_else(|| {
        WorkflowError::InvalidConfiguration(format!("'{key}' must be a string"))
    })
}

/// Returns `args[key]` as a string when present.
pub fn optional_str<'a>(args: &'a Mapping, key: &str) -> Result<Option<&'a str>, WorkflowError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(other) => Err(WorkflowError::InvalidConfiguration(format!(
            "'{key}' must be a string, found {other:?}"
        ))),
    }
}

/// Returns `args[key]` as a boolean, `default` when absent.
pub fn optional_bool(args: &Mapping, key: &str, default: bool) -> Result<bool, WorkflowError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(WorkflowError::InvalidConfiguration(format!(
            "'{key}' must be a boolean, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[derive(Debug)]
    struct Probe;

    #[async_trait(?Send)]
    impl Executor for Probe {
        fn param_key(&self) -> &'static str {
            "run"
        }

        async fn execute(
            &self,
            _ctx: &Context<'_>,
            _registry: &PluginRegistry,
            args: &Mapping,
        ) -> Result<Value, WorkflowError> {
            Ok(Value::Mapping(args.clone()))
        }
    }

    #[test]
    fn test_scalar_config_is_wrapped_under_param_key() {
        let ctx = Context::root(
            Mapping::new(),
            Scope::new().with_overrides([("WHO", Value::from("world"))]),
        );
        let args = Probe
            .resolve_config(&ctx, &Value::from("echo $[WHO]"))
            .unwrap();

        assert_eq!(args.get("run"), Some(&Value::from("echo world")));
        assert!(Probe.validate(&args).is_ok());
    }

    #[test]
    fn test_default_validation_requires_param_key() {
        let args: Mapping = serde_yaml::from_str("{working_dir: /tmp}").unwrap();
        assert!(matches!(
            Probe.validate(&args),
            Err(WorkflowError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_hook_declarations_stay_unresolved() {
        let ctx = Context::root(
            Mapping::new(),
            Scope::new().with_overrides([("WHO", Value::from("world"))]),
        );
        let raw: Value = serde_yaml::from_str("{run: 'echo $[WHO]', post: [{sh: 'echo $[WHO]'}]}").unwrap();
        let args = Probe.resolve_config(&ctx, &raw).unwrap();

        assert_eq!(args.get("run"), Some(&Value::from("echo world")));
        assert_eq!(args.get("post"), raw.get("post"));
    }

    #[test]
    fn test_sequence_config_is_rejected() {
        let ctx = Context::root(Mapping::new(), Scope::new());
        let raw: Value = serde_yaml::from_str("[a, b]").unwrap();
        assert!(Probe.resolve_config(&ctx, &raw).is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let args: Mapping = serde_yaml::from_str("{name: x, flag: true, count: 2}").unwrap();
        assert_eq!(require_str(&args, "name").unwrap(), "x");
        assert!(require_str(&args, "count").is_err());
        assert!(require_str(&args, "missing").is_err());
        assert_eq!(optional_str(&args, "missing").unwrap(), None);
        assert!(optional_bool(&args, "flag", false).unwrap());
        assert!(!optional_bool(&args, "absent", false).unwrap());
    }
}
