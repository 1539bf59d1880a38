//! Variable scopes built from declared `env` blocks.

use crate::error::WorkflowError;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;

#[allow(clippy::expect_used)]
static PROCESS_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("literal pattern")
});

/// An immutable, ordered snapshot of variable bindings.
///
/// Built once from a declared `env` block; process-environment references
/// of the form `${VAR}` and `${VAR:-default}` are expanded at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    vars: IndexMap<String, Value>,
}

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a scope from an `env` block, reading the process environment.
    ///
    /// The block may be a mapping or a list of mappings; later entries
    /// override earlier ones.
    pub fn from_env_block(block: Option<&Value>) -> Result<Scope, WorkflowError> {
        Self::from_env_block_with(block, |name| std::env::var(name).ok())
    }

    /// Builds a scope from an `env` block using `lookup` for `${VAR}` references.
    pub fn from_env_block_with<F>(block: Option<&Value>, lookup: F) -> Result<Scope, WorkflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut scope = Scope::new();
        let Some(block) = block else {
            return Ok(scope);
        };

        let entries: Vec<&serde_yaml::Mapping> = match block {
            Value::Null => Vec::new(),
            Value::Mapping(mapping) => vec![mapping],
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    item.as_mapping().ok_or_else(|| {
                        WorkflowError::InvalidConfiguration(
                            "'env' list entries must be mappings".to_string(),
                        )
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(WorkflowError::InvalidConfiguration(
                    "'env' must be a mapping or a list of mappings".to_string(),
                ))
            }
        };

        for mapping in entries {
            for (key, value) in mapping {
                let Some(key) = key.as_str() else {
                    return Err(WorkflowError::InvalidConfiguration(format!(
                        "'env' keys must be strings, found {key:?}"
                    )));
                };
                if key == crate::step::LINE_KEY {
                    continue;
                }
                match expand(value, &lookup) {
                    Some(value) => {
                        scope.vars.insert(key.to_string(), value);
                    }
                    None => {
                        scope.vars.shift_remove(key);
                    }
                }
            }
        }

        Ok(scope)
    }

    /// Returns a new scope with `overrides` layered on top.
    pub fn with_overrides<I, K>(mut self, overrides: I) -> Scope
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in overrides {
            self.vars.insert(key.into(), value);
        }
        self
    }

    /// Returns the binding for `key`, if this scope defines it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Returns `true` if this scope defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterates bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Expands process-environment references in a declared value.
///
/// A value that is exactly one unresolvable reference without a default
/// yields `None`, leaving the variable undefined in this scope.
fn expand<F>(value: &Value, lookup: &F) -> Option<Value>
where
    F: Fn(&str) -> Option<String>,
{
    let Value::String(text) = value else {
        return Some(value.clone());
    };

    if let Some(captures) = PROCESS_REFERENCE.captures(text) {
        if captures.get(0).map(|m| m.as_str().len()) == Some(text.len()) {
            let resolved = lookup(&captures[1])
                .or_else(|| captures.get(2).map(|m| m.as_str().to_string()));
            return resolved.map(Value::String);
        }
    }

    let expanded = PROCESS_REFERENCE.replace_all(text, |captures: &Captures<'_>| {
        lookup(&captures[1])
            .or_else(|| captures.get(2).map(|m| m.as_str().to_string()))
            .unwrap_or_default()
    });
    Some(Value::String(expanded.into_owned()))
}
