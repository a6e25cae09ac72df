//! MCP server registry and reference expansion.
//!
//! Blueprints reference MCP servers either inline or by registry ref.
//! Expansion merges registry defaults with caller-supplied config; any
//! required field still missing after placeholder resolution blocks run
//! creation with the list of missing keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::models::ConfigSchema;

/// A registry entry describing an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerDefinition {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Defaults merged under caller config.
    #[serde(default)]
    pub default_config: Map<String, Value>,
    /// Required/typed keys the final config must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<ConfigSchema>,
}

/// Expansion failure: either an unknown ref or missing required config.
#[derive(Debug, Error)]
pub enum McpConfigError {
    #[error("unknown MCP server ref: {0}")]
    UnknownRef(String),

    #[error("missing required MCP config keys: {}", .missing.join(", "))]
    MissingKeys { missing: Vec<String> },

    #[error("MCP server entry {0} must be an object")]
    InvalidEntry(String),
}

/// In-memory registry of MCP server definitions.
#[derive(Debug, Clone, Default)]
pub struct McpRegistry {
    servers: BTreeMap<String, McpServerDefinition>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, definition: McpServerDefinition) {
        self.servers.insert(id.into(), definition);
    }

    pub fn get(&self, id: &str) -> Option<&McpServerDefinition> {
        self.servers.get(id)
    }

    /// Expand a blueprint's `mcp_servers` map.
    ///
    /// Each entry is either `{"ref": "<id>", "config": {...}}` or an inline
    /// config object. The caller passes entries after placeholder
    /// resolution so that `${...}` tokens never mask a provided key.
    pub fn expand(
        &self,
        entries: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, McpConfigError> {
        let mut expanded = BTreeMap::new();
        let mut missing = Vec::new();

        for (name, entry) in entries {
            let obj = entry
                .as_object()
                .ok_or_else(|| McpConfigError::InvalidEntry(name.clone()))?;

            let (resolved, schema) = match obj.get("ref").and_then(Value::as_str) {
                Some(server_id) => {
                    let definition = self
                        .servers
                        .get(server_id)
                        .ok_or_else(|| McpConfigError::UnknownRef(server_id.to_string()))?;

                    let mut merged = definition.default_config.clone();
                    if let Some(overrides) = obj.get("config").and_then(Value::as_object) {
                        for (k, v) in overrides {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                    merged.insert("url".to_string(), Value::String(definition.url.clone()));
                    (merged, definition.config_schema.as_ref())
                }
                None => (obj.clone(), None),
            };

            if let Some(schema) = schema {
                for key in &schema.required {
                    let absent = match resolved.get(key) {
                        None | Some(Value::Null) => true,
                        Some(Value::String(s)) => s.is_empty(),
                        Some(_) => false,
                    };
                    if absent {
                        missing.push(format!("{name}.{key}"));
                    }
                }
            }

            expanded.insert(name.clone(), Value::Object(resolved));
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(McpConfigError::MissingKeys { missing });
        }

        Ok(expanded)
    }
}
