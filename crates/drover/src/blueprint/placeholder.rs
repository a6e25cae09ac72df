//! `${source.key}` placeholder resolution over blueprint values.
//!
//! Supported sources: `params` (run parameters), `scope` (run scope,
//! LLM-invisible context), `env` (coordinator process environment), and
//! `runtime` (`session_id`, `run_id`). Placeholders with the `runner.`
//! prefix are intentionally left untouched: only the runner knows values
//! like its dynamically allocated ports. Unknown placeholders are also
//! preserved verbatim.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap_or_else(|_| unreachable!()));

const RUNNER_PREFIX: &str = "runner.";

/// Resolves placeholders in blueprint values.
pub struct PlaceholderResolver<'a> {
    params: &'a Map<String, Value>,
    scope: &'a Map<String, Value>,
    session_id: &'a str,
    run_id: &'a str,
}

impl<'a> PlaceholderResolver<'a> {
    pub fn new(
        params: &'a Map<String, Value>,
        scope: &'a Map<String, Value>,
        session_id: &'a str,
        run_id: &'a str,
    ) -> Self {
        Self {
            params,
            scope,
            session_id,
            run_id,
        }
    }

    /// Resolve all placeholders in a value tree, returning a new tree.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::String(s) => Value::String(self.resolve_string(s)),
            other => other.clone(),
        }
    }

    fn resolve_string(&self, s: &str) -> String {
        PLACEHOLDER_PATTERN
            .replace_all(s, |caps: &Captures<'_>| {
                let placeholder = &caps[1];
                if placeholder.starts_with(RUNNER_PREFIX) {
                    return caps[0].to_string();
                }
                match self.lookup(placeholder) {
                    Some(value) => value,
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn lookup(&self, placeholder: &str) -> Option<String> {
        let (source, key) = placeholder.split_once('.')?;
        match source {
            "params" => self.params.get(key).map(render),
            "scope" => self.scope.get(key).map(render),
            "env" => std::env::var(key).ok(),
            "runtime" => match key {
                "session_id" => Some(self.session_id.to_string()),
                "run_id" => Some(self.run_id.to_string()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Render a JSON value as substitution text; strings drop their quotes.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
