//! Coordinator configuration.
//!
//! Settings merge three layers: a TOML file, `DROVER_*` environment
//! variables via the config crate, and the well-known standalone variables
//! (`ADMIN_API_KEY`, `AUTH_DISABLED`, OIDC settings, timeout knobs) that
//! deployments already export.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::DispatchSettings;
use crate::auth::{AuthConfig, OidcConfig};
use crate::blueprint::McpServerDefinition;
use crate::queue::{SweeperConfig, TimeoutLimits};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let path = dirs::data_local_dir()
            .map(|dir| dir.join("drover").join("drover.db"))
            .unwrap_or_else(|| PathBuf::from("data/drover.db"));
        Self {
            path: path.to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub disabled: bool,
    pub admin_api_key: Option<String>,
    pub oidc_issuer: Option<String>,
    pub oidc_audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub poll_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub claim_timeout_secs: u64,
    pub run_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            heartbeat_interval_secs: 60,
            heartbeat_timeout_secs: 120,
            sweep_interval_secs: 10,
            claim_timeout_secs: 60,
            run_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// Directory of `<agent>.toml` blueprint files.
    pub blueprints_dir: Option<String>,
    /// Directory of scripts served to runners.
    pub scripts_dir: Option<String>,
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub dispatch: DispatchSection,
    pub paths: PathsSection,
    /// MCP server registry entries, keyed by server id.
    pub mcp_servers: BTreeMap<String, McpServerDefinition>,
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        } else {
            builder = builder.add_source(
                File::with_name("drover")
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        let mut config: AppConfig = builder
            .add_source(
                Environment::with_prefix("DROVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Standalone environment variables recognized by deployments.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("AUTH_DISABLED") {
            self.auth.disabled = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(value) = std::env::var("ADMIN_API_KEY") {
            if !value.is_empty() {
                self.auth.admin_api_key = Some(value);
            }
        }
        if let Ok(value) = std::env::var("OIDC_ISSUER") {
            self.auth.oidc_issuer = Some(value);
        }
        if let Ok(value) = std::env::var("OIDC_AUDIENCE") {
            self.auth.oidc_audience = Some(value);
        }
        if let Ok(value) = std::env::var("DROVER_PORT") {
            if let Ok(port) = value.parse() {
                self.server.port = port;
            }
        }
        if let Ok(value) = std::env::var("DROVER_DB_PATH") {
            self.database.path = value;
        }

        for (var, target) in [
            ("POLL_TIMEOUT_SECS", &mut self.dispatch.poll_timeout_secs),
            (
                "HEARTBEAT_TIMEOUT_SECS",
                &mut self.dispatch.heartbeat_timeout_secs,
            ),
            ("SWEEP_INTERVAL_SECS", &mut self.dispatch.sweep_interval_secs),
            ("CLAIM_TIMEOUT_SECS", &mut self.dispatch.claim_timeout_secs),
            ("RUN_TIMEOUT_SECS", &mut self.dispatch.run_timeout_secs),
        ] {
            if let Ok(value) = std::env::var(var) {
                if let Ok(parsed) = value.parse() {
                    *target = parsed;
                }
            }
        }
    }

    /// Database path with `~` expansion.
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).into_owned())
    }

    pub fn blueprints_dir(&self) -> Option<PathBuf> {
        self.paths
            .blueprints_dir
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }

    pub fn scripts_dir(&self) -> Option<PathBuf> {
        self.paths
            .scripts_dir
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }

    /// Auth configuration for the middleware.
    pub fn auth_config(&self) -> AuthConfig {
        let oidc = match (&self.auth.oidc_issuer, &self.auth.oidc_audience) {
            (Some(issuer), Some(audience)) => Some(OidcConfig {
                issuer: issuer.clone(),
                audience: audience.clone(),
            }),
            _ => None,
        };

        AuthConfig {
            disabled: self.auth.disabled,
            admin_api_key: self.auth.admin_api_key.clone(),
            oidc,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            poll_timeout_secs: self.dispatch.poll_timeout_secs,
            heartbeat_interval_secs: self.dispatch.heartbeat_interval_secs,
            scripts_dir: self.scripts_dir(),
        }
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval_secs: self.dispatch.sweep_interval_secs,
            limits: TimeoutLimits {
                claim_timeout_secs: self.dispatch.claim_timeout_secs,
                run_timeout_secs: self.dispatch.run_timeout_secs,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.dispatch.poll_timeout_secs, 30);
        assert_eq!(config.dispatch.heartbeat_timeout_secs, 120);
        assert_eq!(config.dispatch.claim_timeout_secs, 60);
        assert_eq!(config.dispatch.run_timeout_secs, 600);
        assert!(config.auth_config().oidc.is_none());
    }

    #[test]
    fn test_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9900

            [auth]
            disabled = true

            [dispatch]
            claim_timeout_secs = 15

            [mcp_servers.tracker]
            name = "Tracker"
            url = "https://tracker/mcp"
            "#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9900);
        assert!(config.auth.disabled);
        assert_eq!(config.dispatch.claim_timeout_secs, 15);
        assert!(config.mcp_servers.contains_key("tracker"));
    }
}
