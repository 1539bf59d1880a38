//! Built-in step types.

mod dir_sync;
mod file_sync;
mod git;
mod python;
mod shell;
mod workflow;

pub use dir_sync::DirSync;
pub use file_sync::FileSync;
pub use git::{GitClone, GitPush};
pub use python::Python;
pub use shell::Shell;
pub use workflow::NestedWorkflow;

use indexmap::IndexMap;
use maestro_core::{env_text, optional_str, Context, Executor, ExecutorFactory, Scope, WorkflowError};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

/// Every built-in tag and its constructor, registered once at startup.
pub const BUILTINS: &[(&str, ExecutorFactory)] = &[
    ("sh", shell),
    ("python", python),
    ("workflow", workflow),
    ("dir_sync", dir_sync),
    ("file_sync", file_sync),
    ("git_clone", git_clone),
    ("git_push", git_push),
];

fn shell() -> Box<dyn Executor> {
    Box::new(Shell)
}

fn python() -> Box<dyn Executor> {
    Box::new(Python)
}

fn workflow() -> Box<dyn Executor> {
    Box::new(NestedWorkflow)
}

fn dir_sync() -> Box<dyn Executor> {
    Box::new(DirSync)
}

fn file_sync() -> Box<dyn Executor> {
    Box::new(FileSync)
}

fn git_clone() -> Box<dyn Executor> {
    Box::new(GitClone)
}

fn git_push() -> Box<dyn Executor> {
    Box::new(GitPush)
}

/// Builds the environment a spawned process sees on top of the inherited one.
///
/// Layers, lowest first: the aggregated scope chain, `CONTEXT_<NAME>_PATH`
/// for every resource carrying a `path`, and the action's own `env` mapping.
pub(crate) fn process_env(
    ctx: &Context<'_>,
    args: &Mapping,
) -> Result<IndexMap<String, String>, WorkflowError> {
    let mut env = ctx.aggregated_env()?;

    for (name, resource) in ctx.resources_snapshot() {
        if let Some(path) = resource.get("path").and_then(Value::as_str) {
            env.insert(format!("CONTEXT_{}_PATH", name.to_uppercase()), path.to_string());
        }
    }

    if let Some(declared) = args.get("env") {
        for (key, value) in Scope::from_env_block(Some(declared))?.iter() {
            let text = env_text(value).ok_or_else(|| ctx.invalid_env(key))?;
            env.insert(key.clone(), text);
        }
    }
    Ok(env)
}

/// Returns `working_dir` when declared.
pub(crate) fn working_dir(args: &Mapping) -> Result<Option<PathBuf>, WorkflowError> {
    Ok(optional_str(args, "working_dir")?.map(PathBuf::from))
}

/// Reads `path` from a `{path: ...}` resource named by `args[key]`.
///
/// The key may hold the resource itself (a whole `$[resources.x]`
/// reference) or the name of a resource.
pub(crate) fn resource_root(
    ctx: &Context<'_>,
    args: &Mapping,
    key: &str,
) -> Result<Option<PathBuf>, WorkflowError> {
    let resource = match args.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(name)) => ctx.get_resource(name).ok_or_else(|| {
            WorkflowError::InvalidConfiguration(format!("'{key}' names unknown resource '{name}'"))
        })?,
        Some(resource) => resource.clone(),
    };
    resource
        .get("path")
        .and_then(Value::as_str)
        .map(|path| Some(PathBuf::from(path)))
        .ok_or_else(|| {
            WorkflowError::InvalidConfiguration(format!("'{key}' resource has no 'path'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_env_layers() {
        let root = Context::root(
            Mapping::new(),
            Scope::new().with_overrides([("A", Value::from("scope")), ("B", Value::from("scope"))]),
        );
        let repo: Value = serde_yaml::from_str("{path: /srv/docs, url: git@x:docs.git}").unwrap();
        root.set_resource("docs_repo", repo);
        root.set_resource("last_command_output", "ignored");
        let args: Mapping = serde_yaml::from_str("{env: {B: action, PORT: 8080}}").unwrap();

        let env = process_env(&root, &args).unwrap();

        assert_eq!(env["A"], "scope");
        assert_eq!(env["B"], "action");
        assert_eq!(env["PORT"], "8080");
        assert_eq!(env["CONTEXT_DOCS_REPO_PATH"], "/srv/docs");
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn test_process_env_rejects_structured_action_env() {
        let root = Context::root(Mapping::new(), Scope::new());
        let args: Mapping = serde_yaml::from_str("{env: {HOSTS: [a, b]}}").unwrap();

        match process_env(&root, &args) {
            Err(WorkflowError::InvalidEnvironmentValue { key, .. }) => assert_eq!(key, "HOSTS"),
            other => unreachable!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_resource_root_by_name_or_value() {
        let root = Context::root(Mapping::new(), Scope::new());
        root.set_resource("src", serde_yaml::from_str::<Value>("{path: /a}").unwrap());
        let args: Mapping =
            serde_yaml::from_str("{by_name: src, by_value: {path: /b}, broken: {url: x}}").unwrap();

        assert_eq!(resource_root(&root, &args, "by_name").unwrap(), Some(PathBuf::from("/a")));
        assert_eq!(resource_root(&root, &args, "by_value").unwrap(), Some(PathBuf::from("/b")));
        assert_eq!(resource_root(&root, &args, "absent").unwrap(), None);
        assert!(resource_root(&root, &args, "broken").is_err());
    }

    #[test]
    fn test_builtin_table_has_unique_tags() {
        let registry = maestro_core::PluginRegistry::with_plugins(BUILTINS).unwrap();
        assert_eq!(registry.names().len(), BUILTINS.len());
    }
}
