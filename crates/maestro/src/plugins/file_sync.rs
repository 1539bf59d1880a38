use super::git::{commit_staged, git};
use super::{process_env, resource_root};
use crate::sync;
use async_trait::async_trait;
use maestro_core::{optional_bool, require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;
use tracing::info;

/// Copies a single file, optionally between two cloned repositories.
///
/// `src` and `dst` are joined onto the `path` of `src_resource` /
/// `dst_resource` when those are given. With `commit: true` the copied file
/// is committed in the destination repository.
#[derive(Debug, Default)]
pub struct FileSync;

#[async_trait(?Send)]
impl Executor for FileSync {
    fn param_key(&self) -> &'static str {
        "src"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "src")?;
        require_str(args, "dst")?;
        let commit = optional_bool(args, "commit", false)?;
        if commit && args.get("dst_resource").filter(|v| !v.is_null()).is_none() {
            return Err(WorkflowError::InvalidConfiguration(
                "'commit' requires a 'dst_resource' repository".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let src = require_str(args, "src")?;
        let dst = require_str(args, "dst")?;
        let src_root = resource_root(ctx, args, "src_resource")?;
        let dst_root = resource_root(ctx, args, "dst_resource")?;
        let src_path = join(src_root.as_ref(), src);
        let dst_path = join(dst_root.as_ref(), dst);

        let report = sync::sync_file(&src_path, &dst_path)?;
        info!(
            "File synced from {} to {}",
            src_path.display(),
            dst_path.display()
        );

        if optional_bool(args, "commit", false)? {
            if let Some(repo) = &dst_root {
                let env = process_env(ctx, args)?;
                git(repo, ["add", dst], env.clone()).await?;
                let message = format!("Sync file from {src} to {dst}");
                if commit_staged(repo, &message, env).await? {
                    info!("Committed {dst} in {}", repo.display());
                }
            }
        }

        let report = report.to_value();
        ctx.set_resource("last_sync_report", report.clone());
        Ok(report)
    }
}

fn join(root: Option<&PathBuf>, relative: &str) -> PathBuf {
    match root {
        Some(root) => root.join(relative),
        None => PathBuf::from(relative),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::Scope;
    use std::fs;

    #[tokio::test]
    async fn test_copy_between_resource_roots() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("VERSION"), "1.2.3").unwrap();

        let root = Context::root(Mapping::new(), Scope::new());
        let mut upstream = Mapping::new();
        upstream.insert("path".into(), src.path().display().to_string().into());
        root.set_resource("upstream", Value::Mapping(upstream));

        let mut args = Mapping::new();
        args.insert("src".into(), "VERSION".into());
        args.insert("dst".into(), "meta/VERSION".into());
        args.insert("src_resource".into(), "upstream".into());
        let mut target = Mapping::new();
        target.insert("path".into(), dst.path().display().to_string().into());
        args.insert("dst_resource".into(), Value::Mapping(target));

        FileSync
            .execute(&root, &PluginRegistry::new(), &args)
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("meta/VERSION")).unwrap(),
            "1.2.3"
        );
        assert!(root.get_resource("last_sync_report").is_some());
    }

    #[test]
    fn test_commit_needs_destination_repository() {
        let args: Mapping = serde_yaml::from_str("{src: a, dst: b, commit: true}").unwrap();
        assert!(FileSync.validate(&args).is_err());
    }
}
