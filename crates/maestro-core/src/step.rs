//! Step identity and step-type discrimination.

use crate::error::WorkflowError;
use serde_yaml::{Mapping, Value};
use std::fmt;

/// Key the document loader injects into every tracked mapping.
pub const LINE_KEY: &str = "__line__";

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The (name, source line) pair used to attribute failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionIdentity {
    name: StepName,
    line: Option<usize>,
}

impl ActionIdentity {
    /// Creates an identity; `line` is `None` when the source line is unknown.
    pub fn new(name: impl Into<StepName>, line: Option<usize>) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }

    /// Builds an identity from a declaration, falling back to `default_name`.
    pub fn from_declaration(declaration: &Value, default_name: impl Into<StepName>) -> Self {
        let name = declaration
            .get("name")
            .and_then(Value::as_str)
            .map(StepName::from)
            .unwrap_or_else(|| default_name.into());
        Self::new(name, line_of(declaration))
    }

    /// Returns the action name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the 1-based source line, if known.
    pub fn line(&self) -> Option<usize> {
        self.line
    }
}

impl fmt::Display for ActionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (line {})", self.name, line),
            None => write!(f, "{} (line Unknown)", self.name),
        }
    }
}

/// Reads the loader-injected source line of a mapping.
pub fn line_of(value: &Value) -> Option<usize> {
    match value.get(LINE_KEY)? {
        Value::Number(number) => number.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// The built-in step types a top-level step can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// A shell command, declared with `run`.
    Shell,
    /// An embedded script, declared with `python`.
    Python,
    /// A nested workflow, declared with `use`.
    Workflow,
}

impl StepKind {
    /// Key precedence used to discriminate a step.
    const PRECEDENCE: [(&'static str, StepKind); 3] = [
        ("run", StepKind::Shell),
        ("python", StepKind::Python),
        ("use", StepKind::Workflow),
    ];

    /// Determines the kind of a step mapping by first-match precedence.
    pub fn of(step: &Mapping) -> Option<StepKind> {
        Self::PRECEDENCE
            .iter()
            .find(|(key, _)| step.contains_key(*key))
            .map(|(_, kind)| *kind)
    }

    /// Returns the registry tag handling this kind.
    pub fn plugin_tag(&self) -> &'static str {
        match self {
            StepKind::Shell => "sh",
            StepKind::Python => "python",
            StepKind::Workflow => "workflow",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plugin_tag())
    }
}

/// A top-level workflow step, discriminated once when parsed.
#[derive(Debug, Clone)]
pub struct Step {
    identity: ActionIdentity,
    kind: StepKind,
    config: Value,
}

impl Step {
    /// Parses the step at `index` (0-based) of a step list.
    ///
    /// The step keeps its raw config; templated values are resolved later
    /// against the step's own context.
    pub fn parse(index: usize, raw: &Value) -> Result<Step, WorkflowError> {
        let identity = ActionIdentity::from_declaration(raw, format!("Action-{index}"));
        let mapping = raw.as_mapping().ok_or_else(|| {
            WorkflowError::InvalidConfiguration("step must be a mapping".to_string())
                .attribute(&identity)
        })?;
        let kind = StepKind::of(mapping).ok_or_else(|| {
            WorkflowError::InvalidConfiguration(
                "Step must contain either 'run', 'python', or 'use'".to_string(),
            )
            .attribute(&identity)
        })?;

        Ok(Step {
            identity,
            kind,
            config: raw.clone(),
        })
    }

    /// Returns the step identity.
    pub fn identity(&self) -> &ActionIdentity {
        &self.identity
    }

    /// Returns the step kind.
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Returns the raw, unresolved step config.
    pub fn config(&self) -> &Value {
        &self.config
    }
}
