//! Step-type tag to executor constructor mapping.

use crate::error::WorkflowError;
use crate::executor::{Executor, ExecutorFactory};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// An add-only registry of step-type handlers.
///
/// Registration happens during startup, before any step executes; lookups
/// during execution only read. The lock exists so a registry can live in a
/// `static`, not to support concurrent registration while running.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<IndexMap<String, ExecutorFactory>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a static table of built-in handlers.
    pub fn with_plugins(table: &[(&str, ExecutorFactory)]) -> Result<Self, WorkflowError> {
        let registry = Self::new();
        for (name, factory) in table {
            registry.register(*name, *factory)?;
        }
        Ok(registry)
    }

    /// Registers `factory` under `name`.
    ///
    /// Fails with `DuplicateRegistration` if the name is taken; the original
    /// handler is left in place.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: ExecutorFactory,
    ) -> Result<(), WorkflowError> {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&name) {
            return Err(WorkflowError::DuplicateRegistration(name));
        }
        entries.insert(name, factory);
        Ok(())
    }

    /// Returns the constructor registered under `name`.
    pub fn get(&self, name: &str) -> Result<ExecutorFactory, WorkflowError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .ok_or_else(|| WorkflowError::UnknownPlugin(name.to_string()))
    }

    /// Constructs a fresh executor for `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Executor>, WorkflowError> {
        self.get(name).map(|factory| factory())
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Returns a copy of every registration, in registration order.
    pub fn list(&self) -> IndexMap<String, ExecutorFactory> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns every registered name, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use async_trait::async_trait;
    use serde_yaml::{Mapping, Value};

    #[derive(Debug)]
    struct First;

    #[derive(Debug)]
    struct Second;

    #[async_trait(?Send)]
    impl Executor for First {
        fn param_key(&self) -> &'static str {
            "first"
        }

        async fn execute(
            &self,
            _ctx: &Context<'_>,
            _registry: &PluginRegistry,
            _args: &Mapping,
        ) -> Result<Value, WorkflowError> {
            Ok(Value::from("first"))
        }
    }

    #[async_trait(?Send)]
    impl Executor for Second {
        fn param_key(&self) -> &'static str {
            "second"
        }

        async fn execute(
            &self,
            _ctx: &Context<'_>,
            _registry: &PluginRegistry,
            _args: &Mapping,
        ) -> Result<Value, WorkflowError> {
            Ok(Value::from("second"))
        }
    }

    fn first() -> Box<dyn Executor> {
        Box::new(First)
    }

    fn second() -> Box<dyn Executor> {
        Box::new(Second)
    }

    #[test]
    fn test_duplicate_registration_keeps_original() {
        let registry = PluginRegistry::new();
        registry.register("sh", first).unwrap();

        let error = registry.register("sh", second).unwrap_err();
        assert!(matches!(error, WorkflowError::DuplicateRegistration(ref name) if name == "sh"));
        assert_eq!(registry.create("sh").unwrap().param_key(), "first");
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.get("rsync"),
            Err(WorkflowError::UnknownPlugin(ref name)) if name == "rsync"
        ));
    }

    #[test]
    fn test_list_is_a_copy() {
        let registry = PluginRegistry::with_plugins(&[("a", first as ExecutorFactory)]).unwrap();
        let mut listed = registry.list();
        listed.insert("b".to_string(), second);

        assert_eq!(registry.names(), vec!["a".to_string()]);
        assert!(!registry.contains("b"));
    }

    #[test]
    fn test_with_plugins_rejects_duplicate_table_entries() {
        let table: [(&str, ExecutorFactory); 2] = [("a", first), ("a", second)];
        assert!(matches!(
            PluginRegistry::with_plugins(&table),
            Err(WorkflowError::DuplicateRegistration(_))
        ));
    }
}
