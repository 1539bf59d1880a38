//! Hierarchical execution contexts.
//!
//! Every workflow and every step runs inside a [`Context`]. Contexts form a
//! parent-linked tree: a child borrows its parent and never outlives it, and
//! a parent does not track its children. Config and scope lookups fall back
//! through the parent chain; resources live only at the root.

use crate::error::WorkflowError;
use crate::scope::Scope;
use crate::step::ActionIdentity;
use crate::template::{self, Reference, REFERENCE_TOKEN};
use indexmap::IndexMap;
use regex::Captures;
use serde_yaml::{Mapping, Value};
use std::cell::RefCell;
use std::fmt;
use tracing::debug;

/// Named values shared across step boundaries.
pub type Resources = IndexMap<String, Value>;

enum Lineage<'p> {
    Root { resources: RefCell<Resources> },
    Child { parent: &'p Context<'p> },
}

/// A node in the execution-context tree.
///
/// Contexts are single-threaded: the resource map is mutated through a
/// `RefCell` and only one step executes at a time.
pub struct Context<'p> {
    config: Mapping,
    scope: Scope,
    lineage: Lineage<'p>,
    action: Option<ActionIdentity>,
    action_args: Option<Mapping>,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config_keys", &self.config.keys().collect::<Vec<_>>())
            .field("scope", &self.scope)
            .field("is_root", &self.is_root())
            .field("action", &self.action)
            .finish()
    }
}

impl Context<'static> {
    /// Creates the root of a context tree, owning an empty resource map.
    pub fn root(config: Mapping, scope: Scope) -> Self {
        Context {
            config,
            scope,
            lineage: Lineage::Root {
                resources: RefCell::new(Resources::new()),
            },
            action: None,
            action_args: None,
        }
    }

    /// Creates a root context whose scope is built from `config["env"]`.
    pub fn from_config(config: Mapping) -> Result<Self, WorkflowError> {
        let scope = Scope::from_env_block(config.get("env"))?;
        Ok(Context::root(config, scope))
    }
}

impl<'p> Context<'p> {
    /// Creates a child context with an explicit scope.
    pub fn child(&self, config: Mapping, scope: Scope) -> Context<'_> {
        Context {
            config,
            scope,
            lineage: Lineage::Child { parent: self },
            action: None,
            action_args: None,
        }
    }

    /// Pushes a child whose scope is built from the config's own `env` block.
    pub fn push(&self, config: Mapping) -> Result<Context<'_>, WorkflowError> {
        let scope = Scope::from_env_block(config.get("env"))
            .map_err(|e| self.attribute(e))?;
        Ok(self.child(config, scope))
    }

    /// Returns the enclosing context, `None` at the root.
    pub fn parent(&self) -> Option<&Context<'p>> {
        match &self.lineage {
            Lineage::Root { .. } => None,
            Lineage::Child { parent } => Some(*parent),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.lineage, Lineage::Root { .. })
    }

    /// Walks to the root of the tree.
    pub fn root_context(&self) -> &Context<'_> {
        let mut current: &Context<'_> = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Number of ancestors between this node and the root.
    pub fn depth(&self) -> usize {
        self.parent().map_or(0, |parent| parent.depth() + 1)
    }

    fn resources(&self) -> &RefCell<Resources> {
        match &self.lineage {
            Lineage::Root { resources } => resources,
            Lineage::Child { parent } => parent.resources(),
        }
    }

    /// Returns this node's own config mapping.
    pub fn config(&self) -> &Mapping {
        &self.config
    }

    /// Returns this node's own scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Looks up a config key, falling back through the parent chain.
    pub fn get_config(&self, key: &str) -> Option<&Value> {
        match self.config.get(key) {
            Some(value) if !value.is_null() => Some(value),
            _ => self.parent().and_then(|parent| parent.get_config(key)),
        }
    }

    /// Looks up a scope variable, falling back through the parent chain.
    pub fn get_env(&self, key: &str) -> Option<&Value> {
        match self.scope.get(key) {
            Some(value) if !value.is_null() => Some(value),
            _ => self.parent().and_then(|parent| parent.get_env(key)),
        }
    }

    /// Reads a resource from the root's resource map.
    pub fn get_resource(&self, key: &str) -> Option<Value> {
        self.resources().borrow().get(key).cloned()
    }

    /// Writes a resource into the root's resource map.
    pub fn set_resource(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        debug!(resource = %key, "set resource");
        self.resources().borrow_mut().insert(key, value.into());
    }

    /// Returns a snapshot of every resource.
    pub fn resources_snapshot(&self) -> Resources {
        self.resources().borrow().clone()
    }

    /// Associates this context with the step about to execute.
    pub fn set_action(&mut self, identity: ActionIdentity) {
        self.action = Some(identity);
    }

    /// Returns the identity of the nearest action, walking up the chain.
    pub fn action(&self) -> Option<&ActionIdentity> {
        self.action
            .as_ref()
            .or_else(|| self.parent().and_then(|parent| parent.action()))
    }

    /// Records the resolved arguments of the step executing at this node.
    pub fn set_action_args(&mut self, args: Mapping) {
        self.action_args = Some(args);
    }

    /// Returns this node's own resolved action arguments.
    pub fn action_args(&self) -> Option<&Mapping> {
        self.action_args.as_ref()
    }

    /// Looks up an action argument at the nearest node that has recorded one.
    pub fn get_action_arg(&self, key: &str) -> Option<&Value> {
        match self.action_args.as_ref().and_then(|args| args.get(key)) {
            Some(value) => Some(value),
            None => self.parent().and_then(|parent| parent.get_action_arg(key)),
        }
    }

    /// Wraps `error` with the current action identity, if one is set.
    pub fn attribute(&self, error: WorkflowError) -> WorkflowError {
        match self.action() {
            Some(identity) => error.attribute(identity),
            None => error,
        }
    }

    /// Aggregates scope variables from the root down to this node.
    ///
    /// Nearer scopes override farther ones. Numbers and booleans are
    /// rendered as text; null and structured values are rejected with
    /// `InvalidEnvironmentValue`.
    pub fn aggregated_env(&self) -> Result<IndexMap<String, String>, WorkflowError> {
        let mut chain = vec![self];
        while let Some(parent) = chain.last().and_then(|node| node.parent()) {
            chain.push(parent);
        }

        let mut env = IndexMap::new();
        for node in chain.iter().rev() {
            for (key, value) in node.scope.iter() {
                let text = template::env_text(value).ok_or_else(|| self.invalid_env(key))?;
                env.insert(key.clone(), text);
            }
        }
        Ok(env)
    }

    /// An `InvalidEnvironmentValue` for `key`, attributed to the current action.
    pub fn invalid_env(&self, key: &str) -> WorkflowError {
        WorkflowError::InvalidEnvironmentValue {
            action: self
                .action()
                .cloned()
                .unwrap_or_else(|| ActionIdentity::new("workflow", None)),
            key: key.to_string(),
        }
    }

    /// Resolves every reference token inside `raw`.
    ///
    /// Strings are substituted token by token; mappings and sequences are
    /// rebuilt element by element; other values pass through unchanged.
    pub fn resolve(&self, raw: &Value) -> Value {
        match raw {
            Value::String(text) => self.resolve_str(text),
            Value::Mapping(mapping) => Value::Mapping(self.resolve_mapping(mapping)),
            Value::Sequence(items) => {
                Value::Sequence(items.iter().map(|item| self.resolve(item)).collect())
            }
            other => other.clone(),
        }
    }

    /// Resolves every value of a mapping, keeping keys and order.
    pub fn resolve_mapping(&self, mapping: &Mapping) -> Mapping {
        mapping
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve(value)))
            .collect()
    }

    fn resolve_str(&self, text: &str) -> Value {
        if !template::has_reference(text) {
            return Value::String(text.to_string());
        }

        if let Some(reference) = template::whole_reference(text) {
            if reference.is_structured() {
                if let Some(value) = self.lookup(&reference) {
                    debug!("resolved '{}' => {:?}", text, value);
                    return value;
                }
                return Value::String(text.to_string());
            }
        }

        let resolved = REFERENCE_TOKEN.replace_all(text, |captures: &Captures<'_>| {
            let reference = Reference::parse(&captures[1]);
            match self.lookup(&reference) {
                Some(value) => template::stringify(&value),
                None => captures[0].to_string(),
            }
        });
        if resolved != text {
            debug!("resolved '{}' => '{}'", text, resolved);
        }
        Value::String(resolved.into_owned())
    }

    fn lookup(&self, reference: &Reference<'_>) -> Option<Value> {
        match reference {
            Reference::Resource { name, path } => self
                .get_resource(name)
                .and_then(|value| template::descend(&value, path).cloned()),
            Reference::Action { name, path } => self
                .get_action_arg(name)
                .and_then(|value| template::descend(value, path))
                .cloned(),
            Reference::Variable(name) => self.get_env(name).cloned(),
        }
    }
}
