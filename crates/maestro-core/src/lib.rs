//! Core types for the maestro workflow runner.
//!
//! This crate holds everything a step type needs to plug into the runner,
//! with no process, filesystem or runtime dependencies of its own.
//!
//! # Core Types
//!
//! - [`Context`] - Hierarchical execution context with root-owned resources
//! - [`Scope`] - Variables declared by an `env` block
//! - [`Executor`] - The contract every step type implements
//! - [`PluginRegistry`] - Step-type tag to executor constructor mapping
//! - [`WorkflowError`] - Error types for loading and execution
//!
//! # Dispatch
//!
//! - [`dispatch`] - Resolve, validate and execute one action with its hooks
//! - [`execute_hooks`] - Run the `pre` or `post` hooks of an action

mod context;
mod error;
mod executor;
mod hooks;
mod registry;
mod scope;
mod step;
mod template;

pub use context::{Context, Resources};
pub use error::{HookPhase, WorkflowError};
pub use executor::{
    optional_bool, optional_str, require_key, require_str, Executor, ExecutorFactory,
};
pub use hooks::{dispatch, execute_hooks, LocalBoxFuture};
pub use registry::PluginRegistry;
pub use scope::Scope;
pub use step::{line_of, ActionIdentity, Step, StepKind, StepName, LINE_KEY};
pub use template::{env_text, stringify, Reference};
