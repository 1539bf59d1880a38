//! A YAML-declared workflow runner.
//!
//! A workflow document lists steps (`run` shell commands, `python` scripts,
//! `use` nested workflows) that are dispatched one at a time to registered
//! step types, with `pre`/`post` hooks around each one.
//!
//! # Example
//!
//! ```rust,no_run
//! use maestro::prelude::*;
//!
//! # async fn example() -> Result<(), WorkflowError> {
//! let workflow = Workflow::load("deploy.yaml").await?;
//! let summary = WorkflowRunner::new(maestro::registry(), workflow)
//!     .with_input("target", "staging")
//!     .run()
//!     .await?;
//! println!("{} steps completed", summary.steps_completed);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod loader;
pub mod plugins;
pub mod process;
pub mod sync;

// Re-export core types
pub use maestro_core::*;

pub use engine::{validate_inputs, InputSpec, RunSummary, Workflow, WorkflowRunner, WorkflowState};

use once_cell::sync::Lazy;
use tracing::warn;

static REGISTRY: Lazy<PluginRegistry> = Lazy::new(|| {
    let registry = PluginRegistry::new();
    for (name, factory) in plugins::BUILTINS {
        if let Err(error) = registry.register(*name, *factory) {
            warn!("{error}");
        }
    }
    registry
});

/// Returns the process-wide registry, populated with the built-in step
/// types on first use.
///
/// Additional step types may be registered before the first workflow runs;
/// registration is add-only.
pub fn registry() -> &'static PluginRegistry {
    &REGISTRY
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        registry, ActionIdentity, Context, Executor, HookPhase, PluginRegistry, RunSummary, Scope,
        Workflow, WorkflowError, WorkflowRunner, WorkflowState,
    };
}
