//! Session data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use drover_protocol::SessionEventBody;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no executor bound yet.
    Pending,
    /// An executor has bound and is working.
    Running,
    /// Last event was a successful terminal event.
    Finished,
    /// Last event was a failure terminal event.
    Failed,
}

impl SessionStatus {
    /// Whether the session accepts further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finished | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Finished => write!(f, "finished"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "finished" => Ok(SessionStatus::Finished),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

// Implement conversion from String for SQLx
impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A logical agent conversation.
///
/// Sessions are created by the coordinator before any executor exists;
/// the executor later binds its own session identifier via the bind
/// handshake. `hostname` and `executor_type` become immutable at bind
/// because they define where the session can be resumed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    /// Coordinator-generated unique ID.
    pub session_id: String,
    /// User-facing name; advisory, may collide.
    pub session_name: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    /// Executor's own session identifier, set once at bind.
    pub executor_session_id: Option<String>,
    pub executor_type: Option<String>,
    pub hostname: Option<String>,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    /// Parent session for callback chains.
    pub parent_session_name: Option<String>,
    pub created_at: String,
    pub last_resumed_at: Option<String>,
}

impl Session {
    /// Whether the executor-binding handshake has completed.
    pub fn is_bound(&self) -> bool {
        self.executor_session_id.is_some()
    }
}

/// A persisted session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub session_id: String,
    /// Monotonically increasing sequence within the session.
    pub seq: i64,
    pub timestamp: String,
    #[serde(flatten)]
    pub body: SessionEventBody,
}

/// Resume routing info for a bound session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAffinity {
    pub hostname: String,
    pub executor_type: String,
    pub project_dir: Option<String>,
    pub executor_session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Finished,
            SessionStatus::Failed,
        ] {
            let parsed: SessionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("stopped".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Finished.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }
}
