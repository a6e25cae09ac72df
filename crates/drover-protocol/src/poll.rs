//! Runner HTTP protocol: registration, long-poll envelope, status reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of run a runner is asked to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Fresh session: executor starts a new conversation.
    StartSession,
    /// Resume an existing, previously bound session.
    ResumeSession,
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartSession => f.write_str("start_session"),
            Self::ResumeSession => f.write_str("resume_session"),
        }
    }
}

impl std::str::FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_session" => Ok(Self::StartSession),
            "resume_session" => Ok(Self::ResumeSession),
            other => Err(format!("unknown run type: {other}")),
        }
    }
}

/// Request body for `POST /runner/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Hostname the runner executes on.
    pub hostname: String,
    /// Default working directory for runs on this runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    /// Executor flavor this runner spawns (e.g. "claude-code").
    pub executor_type: String,
    /// Static capability tags declared at registration.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Response body for `POST /runner/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Opaque runner identifier to present on every later call.
    pub runner_id: String,
    /// Path of the long-poll endpoint.
    pub poll_endpoint: String,
    /// Server-side long-poll timeout in seconds.
    pub poll_timeout_secs: u64,
    /// Interval at which the runner should heartbeat, in seconds.
    pub heartbeat_interval_secs: u64,
}

/// Request body for `POST /runner/heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub runner_id: String,
}

/// A run handed to a runner by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAssignment {
    pub run_id: String,
    pub session_id: String,
    pub run_type: RunType,
    pub prompt: String,
    /// Working directory (start runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,
    /// Agent the run executes (start runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Resolved agent blueprint; `${runner.*}` placeholders are still
    /// present and are substituted by the runner before spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_blueprint: Option<serde_json::Value>,
    /// Executor session id to resume with (resume runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_session_id: Option<String>,
}

/// Long-poll response envelope for `GET /runner/runs`.
///
/// A 204 response carries no body; a 200 response carries this envelope
/// with at most one run and all commands pending for the runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunAssignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_runs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_scripts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_scripts: Vec<String>,
    /// Set when the runner has been deregistered; the runner must exit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deregistered: bool,
}

impl PollResponse {
    /// Whether the envelope carries anything worth returning.
    pub fn is_empty(&self) -> bool {
        self.run.is_none()
            && self.stop_runs.is_empty()
            && self.sync_scripts.is_empty()
            && self.remove_scripts.is_empty()
            && !self.deregistered
    }
}

/// `POST /runner/runs/{id}/started`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStartedRequest {
    pub runner_id: String,
}

/// `POST /runner/runs/{id}/completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCompletedRequest {
    pub runner_id: String,
}

/// `POST /runner/runs/{id}/failed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFailedRequest {
    pub runner_id: String,
    pub error: String,
}

/// `POST /runner/runs/{id}/stopped`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStoppedRequest {
    pub runner_id: String,
    /// Name of the signal that terminated the executor (SIGTERM or SIGKILL).
    pub signal: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_response_empty_envelope() {
        let resp = PollResponse::default();
        assert!(resp.is_empty());

        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_poll_response_roundtrip() {
        let resp = PollResponse {
            run: Some(RunAssignment {
                run_id: "run_1".to_string(),
                session_id: "sess_1".to_string(),
                run_type: RunType::StartSession,
                prompt: "hello".to_string(),
                project_dir: Some("/work".to_string()),
                agent_name: Some("reviewer".to_string()),
                agent_blueprint: None,
                executor_session_id: None,
            }),
            stop_runs: vec!["run_0".to_string()],
            ..Default::default()
        };

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("start_session"));
        assert!(!json.contains("deregistered"));

        let parsed: PollResponse = serde_json::from_str(&json).unwrap();
        assert!(!parsed.is_empty());
        assert_eq!(parsed.run.unwrap().run_id, "run_1");
        assert_eq!(parsed.stop_runs, vec!["run_0".to_string()]);
    }

    #[test]
    fn test_run_type_parse() {
        assert_eq!(
            "start_session".parse::<RunType>().unwrap(),
            RunType::StartSession
        );
        assert_eq!(
            "resume_session".parse::<RunType>().unwrap(),
            RunType::ResumeSession
        );
        assert!("jobs".parse::<RunType>().is_err());
    }
}
