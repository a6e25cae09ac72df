//! Blueprint sources.
//!
//! The coordinator only fetches blueprints; authoring and CRUD live in an
//! external registry. Two sources are provided: an in-memory map (tests,
//! programmatic setup) and a directory of TOML files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::AgentBlueprint;
use super::validate_agent_name;

/// Fetch contract against the blueprint registry.
#[async_trait]
pub trait BlueprintSource: Send + Sync {
    /// Fetch a blueprint by agent name. `None` means the agent is unknown.
    async fn fetch(&self, agent_name: &str) -> Result<Option<AgentBlueprint>>;
}

/// In-memory blueprint source.
#[derive(Debug, Default)]
pub struct MemoryBlueprints {
    blueprints: RwLock<BTreeMap<String, AgentBlueprint>>,
}

impl MemoryBlueprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, blueprint: AgentBlueprint) {
        self.blueprints
            .write()
            .await
            .insert(blueprint.name.clone(), blueprint);
    }
}

#[async_trait]
impl BlueprintSource for MemoryBlueprints {
    async fn fetch(&self, agent_name: &str) -> Result<Option<AgentBlueprint>> {
        Ok(self.blueprints.read().await.get(agent_name).cloned())
    }
}

/// Directory-backed blueprint source: one `<agent_name>.toml` per agent.
#[derive(Debug, Clone)]
pub struct DirBlueprints {
    dir: PathBuf,
}

impl DirBlueprints {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl BlueprintSource for DirBlueprints {
    async fn fetch(&self, agent_name: &str) -> Result<Option<AgentBlueprint>> {
        // The name check doubles as path-traversal protection.
        if validate_agent_name(agent_name).is_err() {
            return Ok(None);
        }

        let path = self.dir.join(format!("{agent_name}.toml"));
        if !path.exists() {
            return Ok(None);
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading blueprint: {}", path.display()))?;
        let blueprint: AgentBlueprint = toml::from_str(&contents)
            .with_context(|| format!("parsing blueprint: {}", path.display()))?;

        debug!(agent_name, path = %path.display(), "blueprint loaded");
        Ok(Some(blueprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_source_fetch() {
        let source = MemoryBlueprints::new();
        source
            .insert(AgentBlueprint {
                name: "reviewer".to_string(),
                description: None,
                system_prompt: Some("review carefully".to_string()),
                mcp_servers: BTreeMap::new(),
                config_schema: None,
                demands: Default::default(),
            })
            .await;

        assert!(source.fetch("reviewer").await.unwrap().is_some());
        assert!(source.fetch("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dir_source_fetch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("scout.toml"),
            "name = \"scout\"\nsystem_prompt = \"explore\"\n",
        )
        .unwrap();

        let source = DirBlueprints::new(dir.path());
        let blueprint = source.fetch("scout").await.unwrap().unwrap();
        assert_eq!(blueprint.system_prompt.as_deref(), Some("explore"));

        assert!(source.fetch("missing").await.unwrap().is_none());
        // Traversal attempts resolve to unknown agents rather than paths.
        assert!(source.fetch("../etc/passwd").await.unwrap().is_none());
    }
}
