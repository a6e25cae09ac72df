//! Run data models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

use drover_protocol::RunType;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for a matching runner.
    Pending,
    /// Handed to a runner, executor not yet spawned.
    Claimed,
    /// Executor subprocess is running.
    Running,
    Completed,
    Failed,
    TimedOut,
    Stopped,
}

impl RunStatus {
    /// Whether this status is final. Terminal runs are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::TimedOut | RunStatus::Stopped
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Claimed => "claimed",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "claimed" => Ok(RunStatus::Claimed),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "timed_out" => Ok(RunStatus::TimedOut),
            "stopped" => Ok(RunStatus::Stopped),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Capability tags a runner must advertise to claim a run.
///
/// Stored in SQLite as a JSON array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Demands(pub BTreeSet<String>);

impl Demands {
    pub fn new(tags: impl IntoIterator<Item = String>) -> Self {
        Self(tags.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A run matches a runner iff every demanded tag appears in the
    /// runner's tag set. Empty demands match any runner.
    pub fn matched_by(&self, tags: &BTreeSet<String>) -> bool {
        self.0.is_subset(tags)
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        self.0.insert(tag.into());
    }
}

impl TryFrom<String> for Demands {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let tags: BTreeSet<String> = serde_json::from_str(&value)
            .map_err(|e| format!("invalid demands encoding: {}", e))?;
        Ok(Self(tags))
    }
}

impl std::fmt::Display for Demands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// One execution attempt against a session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub run_id: String,
    pub session_id: String,
    /// Stored as its snake_case string form.
    pub run_type: String,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    #[sqlx(try_from = "String")]
    pub demands: Demands,
    pub prompt: String,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    /// Resolved blueprint JSON (start runs only).
    pub agent_blueprint: Option<String>,
    pub parent_session_name: Option<String>,
    pub runner_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl Run {
    /// Typed run kind.
    pub fn kind(&self) -> RunType {
        self.run_type
            .parse()
            .unwrap_or(RunType::StartSession)
    }
}

/// Parameters for enqueuing a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    /// Pre-generated run ID; one is minted when absent. Run creation
    /// pre-generates it when `${runtime.run_id}` must resolve inside the
    /// blueprint before the insert.
    pub run_id: Option<String>,
    pub run_type: RunType,
    pub session_id: String,
    pub demands: Demands,
    pub prompt: String,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    pub agent_blueprint: Option<String>,
    pub parent_session_name: Option<String>,
}

impl NewRun {
    pub fn start(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            run_id: None,
            run_type: RunType::StartSession,
            session_id: session_id.into(),
            demands: Demands::default(),
            prompt: prompt.into(),
            project_dir: None,
            agent_name: None,
            agent_blueprint: None,
            parent_session_name: None,
        }
    }

    pub fn resume(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            run_id: None,
            run_type: RunType::ResumeSession,
            session_id: session_id.into(),
            demands: Demands::default(),
            prompt: prompt.into(),
            project_dir: None,
            agent_name: None,
            agent_blueprint: None,
            parent_session_name: None,
        }
    }
}
