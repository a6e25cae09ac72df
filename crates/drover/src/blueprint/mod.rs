//! Agent blueprint collaborators: fetch, placeholder resolution, MCP
//! server expansion, and parameter validation.
//!
//! The blueprint registry itself (CRUD over definitions) is an external
//! concern; only the fetch contract lives here.

mod mcp;
mod models;
mod placeholder;
mod source;

pub use mcp::{McpConfigError, McpRegistry, McpServerDefinition};
pub use models::{AgentBlueprint, ConfigSchema, PropertyType};
pub use placeholder::PlaceholderResolver;
pub use source::{BlueprintSource, DirBlueprints, MemoryBlueprints};

use once_cell::sync::Lazy;
use regex::Regex;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$").unwrap_or_else(|_| unreachable!()));

/// Validate an agent name: 1-60 characters, alphanumeric plus hyphens and
/// underscores, starting with a letter or number.
pub fn validate_agent_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("agent name is required".to_string());
    }
    if name.len() > 60 {
        return Err("agent name must be 60 characters or less".to_string());
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(
            "agent name must start with a letter or number and contain only \
             alphanumeric characters, hyphens, and underscores"
                .to_string(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_validation() {
        assert!(validate_agent_name("reviewer-1").is_ok());
        assert!(validate_agent_name("0day_hunter").is_ok());
        assert!(validate_agent_name("").is_err());
        assert!(validate_agent_name("-leading-dash").is_err());
        assert!(validate_agent_name("has space").is_err());
        assert!(validate_agent_name("../escape").is_err());
        assert!(validate_agent_name(&"x".repeat(61)).is_err());
    }
}
