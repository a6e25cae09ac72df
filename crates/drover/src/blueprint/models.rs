//! Blueprint data models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A declarative agent definition fetched from the blueprint registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBlueprint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// MCP servers the agent uses. Each value is either an inline server
    /// config or a `{"ref": "<server-id>", "config": {...}}` registry
    /// reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp_servers: BTreeMap<String, Value>,
    /// Schema for run parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<ConfigSchema>,
    /// Capability tags every run of this agent demands.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub demands: BTreeSet<String>,
}

/// Primitive parameter types accepted in a config schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl PropertyType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Object => value.is_object(),
            PropertyType::Array => value.is_array(),
        }
    }
}

/// Typed replacement for the source registry's runtime parameter schemas:
/// a list of required keys plus per-key primitive types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyType>,
}

impl ConfigSchema {
    /// Validate parameters against the schema. Returns human-readable
    /// problems; an empty list means the parameters are acceptable.
    pub fn validate(&self, params: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut problems = Vec::new();

        for key in &self.required {
            if !params.contains_key(key) {
                problems.push(format!("missing required parameter: {key}"));
            }
        }

        for (key, value) in params {
            if let Some(expected) = self.properties.get(key) {
                if !expected.accepts(value) {
                    problems.push(format!("parameter {key} has the wrong type"));
                }
            }
        }

        problems.sort();
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema {
            required: vec!["repo_url".to_string()],
            properties: [
                ("repo_url".to_string(), PropertyType::String),
                ("depth".to_string(), PropertyType::Number),
            ]
            .into(),
        }
    }

    #[test]
    fn test_schema_accepts_valid_params() {
        let params = json!({"repo_url": "https://example.com/repo.git", "depth": 3});
        assert!(schema().validate(params.as_object().unwrap()).is_empty());
    }

    #[test]
    fn test_schema_reports_missing_and_mistyped() {
        let params = json!({"depth": "three"});
        let problems = schema().validate(params.as_object().unwrap());
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("repo_url"));
        assert!(problems[1].contains("depth"));
    }

    #[test]
    fn test_blueprint_toml_roundtrip() {
        let toml_src = r#"
            name = "reviewer"
            system_prompt = "Review the code at ${params.repo_url}"

            [mcp_servers.tracker]
            ref = "tracker"

            [config_schema]
            required = ["repo_url"]

            [config_schema.properties]
            repo_url = "string"
        "#;

        let blueprint: AgentBlueprint = toml::from_str(toml_src).unwrap();
        assert_eq!(blueprint.name, "reviewer");
        assert!(blueprint.mcp_servers.contains_key("tracker"));
        assert_eq!(
            blueprint.config_schema.unwrap().required,
            vec!["repo_url".to_string()]
        );
    }
}
