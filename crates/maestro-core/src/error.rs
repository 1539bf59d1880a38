//! Workflow error types.

use crate::step::ActionIdentity;
use thiserror::Error;

/// The hook phase surrounding a primary action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Hooks declared under `pre`, run before the primary action.
    Pre,
    /// Hooks declared under `post`, run after the primary action succeeded.
    Post,
}

impl HookPhase {
    /// Returns the config key the phase is declared under.
    pub fn key(&self) -> &'static str {
        match self {
            HookPhase::Pre => "pre",
            HookPhase::Post => "post",
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Errors that can occur while loading, dispatching or running a workflow.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step's resolved config failed a plugin's shape check.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The step-type tag has no registered handler.
    #[error("Plugin '{0}' is not registered")]
    UnknownPlugin(String),

    /// A handler is already registered under the tag.
    #[error("Plugin '{0}' is already registered")]
    DuplicateRegistration(String),

    /// A scope value (null, list or mapping) cannot be passed to a process as text.
    #[error("Environment value for '{key}' in {action} cannot be rendered as text")]
    InvalidEnvironmentValue {
        /// The action that was active when the environment was aggregated.
        action: ActionIdentity,
        /// The offending variable name.
        key: String,
    },

    /// Declared required inputs were not provided.
    #[error("Missing required workflow inputs: {}", .missing.join(", "))]
    WorkflowValidation {
        /// Every missing input name, in declaration order.
        missing: Vec<String>,
    },

    /// A step failed; carries the step's identity and the underlying cause.
    #[error("Error in {action}: {source}")]
    Execution {
        /// The failing step.
        action: ActionIdentity,
        /// The underlying cause.
        #[source]
        source: Box<WorkflowError>,
    },

    /// A spawned process exited unsuccessfully.
    #[error("Command '{command}' failed with exit code {}: {stderr}", .exit_code.map_or_else(|| "none".to_string(), |code| code.to_string()))]
    CommandFailed {
        /// The command line as it was spawned.
        command: String,
        /// Exit code, `None` when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// A file-system or process-spawning operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A workflow document could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An include/exclude pattern could not be compiled.
    #[error("Invalid pattern '{pattern}': {details}")]
    Pattern {
        /// The pattern as written.
        pattern: String,
        /// Compiler message.
        details: String,
    },
}

impl WorkflowError {
    /// Wraps the error with the identity of the failing action.
    ///
    /// Errors already attributed to the same action are returned unchanged.
    pub fn attribute(self, action: &ActionIdentity) -> WorkflowError {
        match self {
            WorkflowError::Execution {
                action: ref existing,
                ..
            } if existing == action => self,
            other => WorkflowError::Execution {
                action: action.clone(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the action this error is attributed to, if any.
    pub fn action(&self) -> Option<&ActionIdentity> {
        match self {
            WorkflowError::Execution { action, .. } => Some(action),
            WorkflowError::InvalidEnvironmentValue { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Follows `Execution` wrappers down to the original cause.
    pub fn root_cause(&self) -> &WorkflowError {
        let mut current = self;
        while let WorkflowError::Execution { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns `true` for the wrapper produced at a dispatch point.
    pub fn is_execution(&self) -> bool {
        matches!(self, WorkflowError::Execution { .. })
    }
}
