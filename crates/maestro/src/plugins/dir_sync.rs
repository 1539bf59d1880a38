use crate::sync::{self, PathFilter};
use async_trait::async_trait;
use maestro_core::{require_str, Context, Executor, PluginRegistry, WorkflowError};
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Mirrors a directory: copy-if-newer plus removal of orphaned files.
#[derive(Debug, Default)]
pub struct DirSync;

#[async_trait(?Send)]
impl Executor for DirSync {
    fn param_key(&self) -> &'static str {
        "src_dir"
    }

    fn validate(&self, args: &Mapping) -> Result<(), WorkflowError> {
        require_str(args, "src_dir")?;
        require_str(args, "dst_dir")?;
        PathFilter::from_values(args.get("include_pattern"), args.get("exclude_pattern"))?;
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &Context<'_>,
        _registry: &PluginRegistry,
        args: &Mapping,
    ) -> Result<Value, WorkflowError> {
        let src_dir = require_str(args, "src_dir")?;
        let dst_dir = require_str(args, "dst_dir")?;
        let filter =
            PathFilter::from_values(args.get("include_pattern"), args.get("exclude_pattern"))?;

        let report = sync::sync_directory(Path::new(src_dir), Path::new(dst_dir), &filter)?;
        let report = report.to_value();
        ctx.set_resource("last_sync_report", report.clone());
        Ok(report)
    }
}
