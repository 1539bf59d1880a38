//! Workflow document loading with source-line markers.
//!
//! Every mapping that is an item of a block sequence (steps, hooks) gets a
//! `__line__` entry holding the 1-based line of its `- key:` line, and the
//! root mapping gets the line of its first entry. Items written inline
//! (`pre: [{sh: x}]`) are left unmarked. The markers are only used to
//! identify actions in logs and errors.

use maestro_core::{WorkflowError, LINE_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

#[allow(clippy::expect_used)]
static MAPPING_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:"([^"]*)"|'([^']*)'|([^\s"'#\-\[\]{},:][^:#]*?))\s*:(?:\s+(.*))?$"#)
        .expect("literal pattern")
});

/// Reads and parses the workflow document at `path`.
pub async fn load_document(path: impl AsRef<Path>) -> Result<Value, WorkflowError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading workflow document");
    let text = tokio::fs::read_to_string(path).await?;
    parse_document(&text)
}

/// Parses a workflow document and injects `__line__` markers.
///
/// The document root must be a mapping.
pub fn parse_document(text: &str) -> Result<Value, WorkflowError> {
    let mut document: Value = serde_yaml::from_str(text)?;
    let Value::Mapping(root) = &mut document else {
        return Err(WorkflowError::InvalidConfiguration(
            "workflow document must be a mapping".to_string(),
        ));
    };

    let source = Source::new(text);
    let end = source.lines.len();
    if let Some(first) = (0..end).find(|&index| source.is_content(index)) {
        mark_mapping(root, &source, source.indent(first), first, end);
        root.insert(Value::from(LINE_KEY), Value::from(first + 1));
    }
    Ok(document)
}

/// The document text split into lines; indices are 0-based.
struct Source<'t> {
    lines: Vec<&'t str>,
}

/// A `key: value` line.
struct Entry<'t> {
    key: &'t str,
    /// Text after the colon; empty when the value is a nested block.
    inline: &'t str,
}

impl<'t> Source<'t> {
    fn new(text: &'t str) -> Self {
        Source {
            lines: text.lines().collect(),
        }
    }

    fn is_content(&self, index: usize) -> bool {
        let trimmed = self.lines[index].trim();
        !trimmed.is_empty() && !trimmed.starts_with('#') && trimmed != "---"
    }

    fn indent(&self, index: usize) -> usize {
        let line = self.lines[index];
        line.len() - line.trim_start_matches(' ').len()
    }

    /// Parses the line as a mapping entry whose key starts at `column`,
    /// possibly behind the `- ` of a sequence item.
    fn entry_at(&self, index: usize, column: usize) -> Option<Entry<'t>> {
        let line = self.lines[index];
        if !line.get(..column)?.chars().all(|c| c == ' ' || c == '-') {
            return None;
        }
        let captures = MAPPING_KEY.captures(line.get(column..)?)?;
        let key = captures
            .get(1)
            .or_else(|| captures.get(2))
            .or_else(|| captures.get(3))?
            .as_str();
        let inline = captures.get(4).map_or("", |rest| rest.as_str().trim());
        let inline = if inline.starts_with('#') { "" } else { inline };
        Some(Entry { key, inline })
    }

    /// Column of the `-` when the line opens a block sequence item.
    fn dash_at(&self, index: usize) -> Option<usize> {
        let rest = self.lines[index].trim_start_matches(' ');
        (rest == "-" || rest.starts_with("- ")).then(|| self.indent(index))
    }

    /// Text following the `- ` of a sequence item line.
    fn item_text(&self, index: usize, dash: usize) -> &'t str {
        self.lines[index].get(dash + 1..).unwrap_or("").trim()
    }
}

/// Marks the values of `mapping`, whose keys sit at `column` within lines `lo..hi`.
fn mark_mapping(mapping: &mut Mapping, source: &Source<'_>, column: usize, lo: usize, hi: usize) {
    let mut cursor = lo;
    for (key, value) in mapping.iter_mut() {
        let Some(name) = key.as_str().filter(|name| *name != LINE_KEY) else {
            continue;
        };
        let found = (cursor..hi).find_map(|index| {
            source
                .entry_at(index, column)
                .filter(|entry| entry.key == name)
                .map(|entry| (index, entry.inline.is_empty()))
        });
        let Some((line, is_block)) = found else {
            continue;
        };
        let end = (line + 1..hi)
            .find(|&index| {
                source.is_content(index)
                    && (source.indent(index) < column || source.entry_at(index, column).is_some())
            })
            .unwrap_or(hi);
        cursor = end;
        if is_block {
            mark_block(value, source, line + 1, end);
        }
    }
}

/// Marks a value written as an indented block on lines `lo..hi`.
fn mark_block(value: &mut Value, source: &Source<'_>, lo: usize, hi: usize) {
    match value {
        Value::Sequence(items) => mark_sequence(items, source, lo, hi),
        Value::Mapping(mapping) => {
            if let Some(first) = (lo..hi).find(|&index| source.is_content(index)) {
                mark_mapping(mapping, source, source.indent(first), first, hi);
            }
        }
        _ => {}
    }
}

fn mark_sequence(items: &mut [Value], source: &Source<'_>, lo: usize, hi: usize) {
    let Some(dash) = (lo..hi).find_map(|index| source.dash_at(index)) else {
        return;
    };
    let starts: Vec<usize> = (lo..hi)
        .filter(|&index| source.dash_at(index) == Some(dash))
        .collect();

    for (position, (item, &line)) in items.iter_mut().zip(&starts).enumerate() {
        let Value::Mapping(mapping) = item else {
            continue;
        };
        mapping.insert(Value::from(LINE_KEY), Value::from(line + 1));

        let next = starts.get(position + 1).copied().unwrap_or(hi);
        let text = source.item_text(line, dash);
        if text.starts_with('{') {
            continue;
        }
        let column = if text.is_empty() {
            match (line + 1..next).find(|&index| source.is_content(index)) {
                Some(first) => source.indent(first),
                None => continue,
            }
        } else {
            let after = source.lines[line].get(dash + 1..).unwrap_or("");
            dash + 1 + after.len() - after.trim_start_matches(' ').len()
        };
        mark_mapping(mapping, source, column, line, next);
    }
}

/// Removes every `__line__` marker from `value`.
pub fn strip_line_markers(value: &Value) -> Value {
    match value {
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .iter()
                .filter(|(key, _)| key.as_str() != Some(LINE_KEY))
                .map(|(key, child)| (key.clone(), strip_line_markers(child)))
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.iter().map(strip_line_markers).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::line_of;

    const DOCUMENT: &str = "\
# deploy pipeline
name: deploy
env:
  TARGET: prod
steps:
  - name: build
    run: make build
    pre:
      - sh: echo before
      - name: check
        sh: test -f Makefile
  - run: make test

  - {use: child.yaml}
";

    #[test]
    fn test_sequence_items_carry_their_line() {
        let document = parse_document(DOCUMENT).unwrap();
        let steps = document["steps"].as_sequence().unwrap();

        assert_eq!(line_of(&document), Some(2));
        assert_eq!(line_of(&steps[0]), Some(6));
        assert_eq!(line_of(&steps[0]["pre"][0]), Some(9));
        assert_eq!(line_of(&steps[0]["pre"][1]), Some(10));
        assert_eq!(line_of(&steps[1]), Some(12));
        assert_eq!(line_of(&steps[2]), Some(14));
        assert_eq!(line_of(&document["env"]), None);
    }

    #[test]
    fn test_inline_hooks_do_not_shift_later_lines() {
        let document = parse_document(
            "\
steps:
  - name: a
    pre: [{sh: x}]
    run: x
  - name: b
    run: y
    post:
      - sh: z
",
        )
        .unwrap();
        let steps = &document["steps"];

        assert_eq!(line_of(&steps[0]), Some(2));
        assert_eq!(line_of(&steps[0]["pre"][0]), None);
        assert_eq!(line_of(&steps[1]), Some(5));
        assert_eq!(line_of(&steps[1]["post"][0]), Some(8));
    }

    #[test]
    fn test_unindented_sequences_and_comments() {
        let document = parse_document(
            "\
---
steps:
# setup
- name: first
  run: a
  post:
  - sh: b
-   run: c
inputs: [x]
",
        )
        .unwrap();
        let steps = &document["steps"];

        assert_eq!(line_of(&document), Some(2));
        assert_eq!(line_of(&steps[0]), Some(4));
        assert_eq!(line_of(&steps[0]["post"][0]), Some(7));
        assert_eq!(line_of(&steps[1]), Some(8));
    }

    #[test]
    fn test_strip_line_markers_restores_document() {
        let document = parse_document(DOCUMENT).unwrap();
        let plain: Value = serde_yaml::from_str(DOCUMENT).unwrap();
        assert_eq!(strip_line_markers(&document), plain);
    }

    #[test]
    fn test_non_mapping_root_is_rejected() {
        assert!(matches!(
            parse_document("- a\n- b\n"),
            Err(WorkflowError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            parse_document("steps: [unclosed"),
            Err(WorkflowError::Yaml(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let result = load_document("/nonexistent/maestro/workflow.yaml").await;
        assert!(matches!(result, Err(WorkflowError::Io(_))));
    }
}
