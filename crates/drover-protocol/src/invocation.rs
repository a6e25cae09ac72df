//! Executor invocation payload.
//!
//! The runner writes a single JSON document to the executor's stdin. The
//! payload is versioned so runner and executor can evolve independently;
//! unknown top-level keys are accepted and logged for forward
//! compatibility.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Current payload schema version.
pub const SCHEMA_VERSION: &str = "2.0";

const KNOWN_FIELDS: &[&str] = &[
    "schema_version",
    "mode",
    "session_id",
    "prompt",
    "project_dir",
    "agent_blueprint",
    "metadata",
];

/// Execution mode for the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    Start,
    Resume,
}

impl std::fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Resume => f.write_str("resume"),
        }
    }
}

/// Errors produced while parsing an invocation payload.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("no input received on stdin")]
    Empty,

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unsupported schema version: {found}. Supported: {SCHEMA_VERSION}")]
    UnsupportedVersion { found: String },

    #[error("invalid mode: {0}. Must be 'start' or 'resume'")]
    InvalidMode(String),
}

/// Structured payload for the unified executor entrypoint.
///
/// `agent_blueprint` arrives fully resolved except for `${runner.*}`
/// placeholders, which the runner substitutes immediately before spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInvocation {
    pub schema_version: String,
    pub mode: InvocationMode,
    pub session_id: String,
    pub prompt: String,
    /// Working directory (start mode only; ignored with a warning on resume).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    /// Resolved agent blueprint (start mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_blueprint: Option<Value>,
    /// Extensible key-value map.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ExecutorInvocation {
    /// Build a start-mode payload.
    pub fn start(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            mode: InvocationMode::Start,
            session_id: session_id.into(),
            prompt: prompt.into(),
            project_dir: None,
            agent_blueprint: None,
            metadata: Map::new(),
        }
    }

    /// Build a resume-mode payload.
    pub fn resume(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            mode: InvocationMode::Resume,
            session_id: session_id.into(),
            prompt: prompt.into(),
            project_dir: None,
            agent_blueprint: None,
            metadata: Map::new(),
        }
    }

    /// Parse and validate a payload from a raw JSON string.
    ///
    /// Validates required fields, the schema version, and the mode. In
    /// resume mode, `project_dir` and `agent_blueprint` are dropped with a
    /// warning. Unknown top-level keys are logged and ignored.
    pub fn from_json(raw: &str) -> Result<Self, InvocationError> {
        if raw.trim().is_empty() {
            return Err(InvocationError::Empty);
        }

        let value: Value = serde_json::from_str(raw)?;
        let obj = value.as_object().ok_or(InvocationError::NotAnObject)?;

        for field in ["schema_version", "mode", "session_id", "prompt"] {
            if !obj.contains_key(field) {
                return Err(InvocationError::MissingField(field));
            }
        }

        let version = obj
            .get("schema_version")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if version != SCHEMA_VERSION {
            return Err(InvocationError::UnsupportedVersion {
                found: version.to_string(),
            });
        }

        let mode = match obj.get("mode").and_then(Value::as_str) {
            Some("start") => InvocationMode::Start,
            Some("resume") => InvocationMode::Resume,
            other => {
                return Err(InvocationError::InvalidMode(
                    other.unwrap_or("<non-string>").to_string(),
                ));
            }
        };

        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                warn!("unknown invocation field '{key}' ignored");
            }
        }

        let mut invocation: Self = serde_json::from_value(value)?;

        if mode == InvocationMode::Resume {
            if invocation.project_dir.take().is_some() {
                warn!("field 'project_dir' ignored in resume mode");
            }
            if invocation.agent_blueprint.take().is_some() {
                warn!("field 'agent_blueprint' ignored in resume mode");
            }
        }

        Ok(invocation)
    }

    /// Serialize for the executor's stdin.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// One-line summary safe for logs (no prompt content).
    pub fn log_summary(&self) -> String {
        let agent = self
            .agent_blueprint
            .as_ref()
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("no_agent");
        format!(
            "version={} mode={} session={} agent={} prompt_len={}",
            self.schema_version,
            self.mode,
            self.session_id,
            agent,
            self.prompt.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_start() {
        let raw = json!({
            "schema_version": "2.0",
            "mode": "start",
            "session_id": "sess_1",
            "prompt": "hello",
            "project_dir": "/work",
            "agent_blueprint": {"name": "reviewer"},
        })
        .to_string();

        let inv = ExecutorInvocation::from_json(&raw).unwrap();
        assert_eq!(inv.mode, InvocationMode::Start);
        assert_eq!(inv.session_id, "sess_1");
        assert_eq!(inv.project_dir.as_deref(), Some("/work"));
        assert!(inv.log_summary().contains("agent=reviewer"));
    }

    #[test]
    fn test_resume_drops_start_only_fields() {
        let raw = json!({
            "schema_version": "2.0",
            "mode": "resume",
            "session_id": "sess_1",
            "prompt": "continue",
            "project_dir": "/work",
            "agent_blueprint": {"name": "reviewer"},
        })
        .to_string();

        let inv = ExecutorInvocation::from_json(&raw).unwrap();
        assert_eq!(inv.mode, InvocationMode::Resume);
        assert!(inv.project_dir.is_none());
        assert!(inv.agent_blueprint.is_none());
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(
            ExecutorInvocation::from_json("  "),
            Err(InvocationError::Empty)
        ));
    }

    #[test]
    fn test_rejects_missing_prompt() {
        let raw = json!({
            "schema_version": "2.0",
            "mode": "start",
            "session_id": "sess_1",
        })
        .to_string();
        assert!(matches!(
            ExecutorInvocation::from_json(&raw),
            Err(InvocationError::MissingField(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_version() {
        let raw = json!({
            "schema_version": "1.0",
            "mode": "start",
            "session_id": "sess_1",
            "prompt": "x",
        })
        .to_string();
        assert!(matches!(
            ExecutorInvocation::from_json(&raw),
            Err(InvocationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_mode() {
        let raw = json!({
            "schema_version": "2.0",
            "mode": "replay",
            "session_id": "sess_1",
            "prompt": "x",
        })
        .to_string();
        assert!(matches!(
            ExecutorInvocation::from_json(&raw),
            Err(InvocationError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        let raw = json!({
            "schema_version": "2.0",
            "mode": "start",
            "session_id": "sess_1",
            "prompt": "x",
            "future_field": {"a": 1},
        })
        .to_string();
        let inv = ExecutorInvocation::from_json(&raw).unwrap();
        assert_eq!(inv.prompt, "x");
    }

    #[test]
    fn test_roundtrip() {
        let mut inv = ExecutorInvocation::start("sess_9", "do the thing");
        inv.project_dir = Some("/repo".to_string());

        let raw = inv.to_json().unwrap();
        let back = ExecutorInvocation::from_json(&raw).unwrap();
        assert_eq!(back.session_id, "sess_9");
        assert_eq!(back.project_dir.as_deref(), Some("/repo"));
    }
}
