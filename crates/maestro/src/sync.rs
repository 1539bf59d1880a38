//! Directory and file synchronization.
//!
//! Copying is copy-if-newer: a source file is copied when the destination is
//! missing or has an older modification time. Directory sync also deletes
//! destination files that no longer exist in the source.

use maestro_core::WorkflowError;
use regex::Regex;
use serde::Serialize;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// One include or exclude pattern, matched against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// Shell-style glob; `*` also matches across directory separators.
    Glob(glob::Pattern),
    /// Regular expression, matched anywhere in the path.
    Regex(Regex),
}

impl PathPattern {
    pub fn glob(pattern: &str) -> Result<Self, WorkflowError> {
        glob::Pattern::new(pattern)
            .map(PathPattern::Glob)
            .map_err(|e| WorkflowError::Pattern {
                pattern: pattern.to_string(),
                details: e.to_string(),
            })
    }

    pub fn regex(pattern: &str) -> Result<Self, WorkflowError> {
        Regex::new(pattern)
            .map(PathPattern::Regex)
            .map_err(|e| WorkflowError::Pattern {
                pattern: pattern.to_string(),
                details: e.to_string(),
            })
    }

    /// Parses `"*.md"` or `{pattern: "^docs/", is_regex: true}`.
    pub fn from_value(value: &Value) -> Result<Self, WorkflowError> {
        match value {
            Value::String(pattern) => Self::glob(pattern),
            Value::Mapping(mapping) => {
                let pattern = mapping
                    .get("pattern")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        WorkflowError::InvalidConfiguration(
                            "pattern mapping requires a string 'pattern'".to_string(),
                        )
                    })?;
                match mapping.get("is_regex").and_then(Value::as_bool) {
                    Some(true) => Self::regex(pattern),
                    _ => Self::glob(pattern),
                }
            }
            other => Err(WorkflowError::InvalidConfiguration(format!(
                "invalid pattern format: {other:?}"
            ))),
        }
    }

    pub fn matches(&self, relative_path: &str) -> bool {
        match self {
            PathPattern::Glob(pattern) => pattern.matches(relative_path),
            PathPattern::Regex(regex) => regex.is_match(relative_path),
        }
    }
}

/// Include/exclude rules: a path passes when it matches at least one
/// include pattern and no exclude pattern. No include patterns means
/// everything is included.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
}

impl PathFilter {
    pub fn new(include: Vec<PathPattern>, exclude: Vec<PathPattern>) -> Self {
        PathFilter { include, exclude }
    }

    /// Builds a filter from `include_pattern` / `exclude_pattern` config values,
    /// each a single pattern or a list of patterns.
    pub fn from_values(
        include: Option<&Value>,
        exclude: Option<&Value>,
    ) -> Result<Self, WorkflowError> {
        Ok(Self::new(patterns(include)?, patterns(exclude)?))
    }

    pub fn allows(&self, relative_path: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|p| p.matches(relative_path)))
            && !self.exclude.iter().any(|p| p.matches(relative_path))
    }
}

fn patterns(value: Option<&Value>) -> Result<Vec<PathPattern>, WorkflowError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(items)) => items.iter().map(PathPattern::from_value).collect(),
        Some(single) => Ok(vec![PathPattern::from_value(single)?]),
    }
}

/// What a sync run changed, stored as a resource after every sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub copied: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    pub skipped: usize,
}

impl SyncReport {
    pub fn to_value(&self) -> Value {
        serde_yaml::to_value(self).unwrap_or(Value::Null)
    }
}

/// Mirrors the files of `src_dir` into `dst_dir` through `filter`.
pub fn sync_directory(
    src_dir: &Path,
    dst_dir: &Path,
    filter: &PathFilter,
) -> Result<SyncReport, WorkflowError> {
    if !src_dir.is_dir() {
        return Err(WorkflowError::InvalidConfiguration(format!(
            "source directory not found: {}",
            src_dir.display()
        )));
    }
    info!(src = %src_dir.display(), dst = %dst_dir.display(), "syncing directory");

    let mut report = SyncReport::default();
    for (relative, src_path) in files_under(src_dir)? {
        if !filter.allows(&relative) {
            debug!("skipped: {relative}");
            report.skipped += 1;
            continue;
        }
        if copy_if_newer(&src_path, &dst_dir.join(&relative))? {
            info!("copied: {relative}");
            report.copied.push(relative);
        } else {
            report.unchanged += 1;
        }
    }

    if dst_dir.is_dir() {
        for (relative, dst_path) in files_under(dst_dir)? {
            if !src_dir.join(&relative).exists() && filter.allows(&relative) {
                fs::remove_file(&dst_path)?;
                info!("removed: {relative}");
                report.removed.push(relative);
            }
        }
    }

    info!(
        copied = report.copied.len(),
        removed = report.removed.len(),
        "directory sync completed"
    );
    Ok(report)
}

/// Copies a single file, creating missing destination directories.
pub fn sync_file(src: &Path, dst: &Path) -> Result<SyncReport, WorkflowError> {
    if !src.is_file() {
        return Err(WorkflowError::InvalidConfiguration(format!(
            "source file not found: {}",
            src.display()
        )));
    }
    let mut report = SyncReport::default();
    if copy_if_newer(src, dst)? {
        info!(src = %src.display(), dst = %dst.display(), "file synced");
        report.copied.push(dst.display().to_string());
    } else {
        report.unchanged += 1;
    }
    Ok(report)
}

/// Regular files under `root`, keyed by their `/`-separated relative path.
fn files_under(root: &Path) -> Result<Vec<(String, PathBuf)>, WorkflowError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| WorkflowError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }
    Ok(files)
}

fn copy_if_newer(src: &Path, dst: &Path) -> Result<bool, WorkflowError> {
    if dst.exists() {
        let src_modified = fs::metadata(src)?.modified()?;
        let dst_modified = fs::metadata(dst)?.modified()?;
        if src_modified <= dst_modified {
            return Ok(false);
        }
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(true)
}
