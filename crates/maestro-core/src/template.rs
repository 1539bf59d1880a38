//! `$[...]` reference tokens embedded in config values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

#[allow(clippy::expect_used)]
pub(crate) static REFERENCE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\[([^\]\s]+)\]").expect("literal pattern"));

/// A parsed reference, classified by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `resources.<name>[.<path>]`, read from the root context.
    Resource { name: &'a str, path: Vec<&'a str> },
    /// `action.<name>[.<path>]`, read from the current action's arguments.
    Action { name: &'a str, path: Vec<&'a str> },
    /// Anything else, read from the scope chain.
    Variable(&'a str),
}

impl<'a> Reference<'a> {
    /// Classifies the text between the `$[` and `]` delimiters.
    pub fn parse(expression: &'a str) -> Reference<'a> {
        if let Some(rest) = expression.strip_prefix("resources.") {
            if let Some((name, path)) = split_path(rest) {
                return Reference::Resource { name, path };
            }
        }
        if let Some(rest) = expression.strip_prefix("action.") {
            if let Some((name, path)) = split_path(rest) {
                return Reference::Action { name, path };
            }
        }
        Reference::Variable(expression)
    }

    /// Returns `true` for references that may resolve to a structured value.
    pub fn is_structured(&self) -> bool {
        !matches!(self, Reference::Variable(_))
    }
}

fn split_path(rest: &str) -> Option<(&str, Vec<&str>)> {
    let mut segments = rest.split('.');
    let name = segments.next().filter(|name| !name.is_empty())?;
    Some((name, segments.collect()))
}

/// Returns the single reference if `text` consists of exactly one token.
pub fn whole_reference(text: &str) -> Option<Reference<'_>> {
    let captures = REFERENCE_TOKEN.captures(text)?;
    let token = captures.get(0)?;
    if token.start() != 0 || token.end() != text.len() {
        return None;
    }
    captures.get(1).map(|m| Reference::parse(m.as_str()))
}

/// Returns `true` if `text` contains at least one reference token.
pub fn has_reference(text: &str) -> bool {
    REFERENCE_TOKEN.is_match(text)
}

/// Descends into `value` along `path`; numeric segments index sequences.
pub fn descend<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Mapping(mapping) => mapping.get(*segment),
        Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Renders a value as a process environment variable.
///
/// Strings, numbers and booleans qualify; null and structured values do not.
pub fn env_text(value: &Value) -> Option<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(stringify(value)),
        _ => None,
    }
}

/// Renders a value as it appears when substituted into a larger string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Tagged(tagged) => stringify(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => serde_yaml::to_string(value)
            .map(|rendered| rendered.trim_end().to_string())
            .unwrap_or_default(),
    }
}
