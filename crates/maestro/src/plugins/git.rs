use super::process_env;
use crate::process::{self, CommandOutput, CommandSpec};
use async_trait::async_trait;
use indexmap::IndexMap;
use maestro_core::{optional_str, require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::info;

/// Runs `git <args>` inside `dir` and fails on a non-zero exit.
pub(crate) async fn git<I, S>(
    dir: &Path,
    args: I,
    env: IndexMap<String, String>,
) -> Result<CommandOutput, WorkflowError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let spec = CommandSpec::program("git", args).working_dir(dir).envs(env);
    process::run(&spec).await?.check()
}

/// Clones a repository, or pulls it when the clone path already exists.
///
/// Publishes `{path, url}` under `resource_name` (default `repo`) so later
/// steps can reach it as `$[resources.<name>.path]`.
#[derive(Debug, Default)]
pub struct GitClone;

#[async_trait(?Send)]
impl Executor for GitClone {
    fn param_key(&self) -> &'static str {
        "src_repo"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "src_repo")?;
        require_str(args, "clone_path")?;
        optional_str(args, "resource_name")?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let url = require_str(args, "src_repo")?;
        let clone_path = require_str(args, "clone_path")?;
        let resource_name = optional_str(args, "resource_name")?.unwrap_or("repo");
        let env = process_env(ctx, args)?;

        if Path::new(clone_path).exists() {
            info!("Pulling {url} in {clone_path}");
            git(Path::new(clone_path), ["pull"], env).await?;
        } else {
            info!("Cloning {url} into {clone_path}");
            git(Path::new("."), ["clone", url, clone_path], env).await?;
        }

        let mut resource = Mapping::new();
        resource.insert("path".into(), clone_path.into());
        resource.insert("url".into(), url.into());
        let resource = Value::Mapping(resource);
        ctx.set_resource(resource_name, resource.clone());
        info!("Set as resource: {resource_name}");
        Ok(resource)
    }
}

/// Stages everything in a working tree, commits when anything changed and
/// pushes the current branch.
///
/// Config: `path` (required), `message`, `remote` (default `origin`).
/// Writes `last_push_committed`.
#[derive(Debug, Default)]
pub struct GitPush;

#[async_trait(?Send)]
impl Executor for GitPush {
    fn param_key(&self) -> &'static str {
        "path"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "path")?;
        optional_str(args, "message")?;
        optional_str(args, "remote")?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let path = Path::new(require_str(args, "path")?);
        let message = optional_str(args, "message")?.unwrap_or("Automated sync update");
        let remote = optional_str(args, "remote")?.unwrap_or("origin");
        let env = process_env(ctx, args)?;

        let committed = commit_all(path, message, env.clone()).await?;
        if committed {
            git(path, ["push", remote, "HEAD"], env).await?;
            info!("Pushed changes in {}", path.display());
        } else {
            info!("No changes in {}", path.display());
        }
        ctx.set_resource("last_push_committed", committed);
        Ok(Value::Bool(committed))
    }
}

/// Stages every change under `dir` and commits it; `false` when clean.
pub(crate) async fn commit_all(
    dir: &Path,
    message: &str,
    env: IndexMap<String, String>,
) -> Result<bool, WorkflowError> {
    git(dir, ["add", "-A"], env.clone()).await?;
    commit_staged(dir, message, env).await
}

/// Commits whatever is staged under `dir`; `false` when nothing is.
pub(crate) async fn commit_staged(
    dir: &Path,
    message: &str,
    env: IndexMap<String, String>,
) -> Result<bool, WorkflowError> {
    let staged = CommandSpec::program("git", ["diff", "--cached", "--quiet"])
        .working_dir(dir)
        .envs(env.clone());
    if process::run(&staged).await?.success() {
        return Ok(false);
    }
    git(dir, ["commit", "-m", message], env).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::Scope;
    use std::fs;

    fn identity_scope() -> Scope {
        Scope::new().with_overrides(
            [
                "GIT_AUTHOR_NAME",
                "GIT_COMMITTER_NAME",
                "GIT_AUTHOR_EMAIL",
                "GIT_COMMITTER_EMAIL",
            ]
            .map(|key| (key, Value::from("maestro@example.com"))),
        )
    }

    async fn git_available() -> bool {
        process::run(&CommandSpec::direct("git --version"))
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_clone_then_push_round_trip() {
        if !git_available().await {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin.git");
        let checkout = dir.path().join("checkout");
        git(dir.path(), ["init", "--bare", "origin.git"], IndexMap::new())
            .await
            .unwrap();

        let root = Context::root(Mapping::new(), identity_scope());
        let registry = PluginRegistry::new();
        let mut clone_args = Mapping::new();
        clone_args.insert("src_repo".into(), origin.display().to_string().into());
        clone_args.insert("clone_path".into(), checkout.display().to_string().into());
        clone_args.insert("resource_name".into(), "docs".into());
        GitClone.execute(&root, &registry, &clone_args).await.unwrap();

        let resource = root.get_resource("docs").unwrap();
        assert_eq!(resource["path"], Value::from(checkout.display().to_string()));

        fs::write(checkout.join("README.md"), "hello").unwrap();
        let mut push_args = Mapping::new();
        push_args.insert("path".into(), checkout.display().to_string().into());
        push_args.insert("message".into(), "add readme".into());

        let pushed = GitPush.execute(&root, &registry, &push_args).await.unwrap();
        assert_eq!(pushed, Value::Bool(true));

        let clean = GitPush.execute(&root, &registry, &push_args).await.unwrap();
        assert_eq!(clean, Value::Bool(false));
        assert_eq!(root.get_resource("last_push_committed"), Some(Value::Bool(false)));

        let log = git(&origin, ["log", "--format=%s"], IndexMap::new()).await.unwrap();
        assert_eq!(log.stdout.trim(), "add readme");
    }
}
