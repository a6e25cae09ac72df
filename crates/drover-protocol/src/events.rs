//! Session event vocabulary.
//!
//! Events are append-only per session. The payload for each event type is a
//! tagged union so that malformed or unknown event types are rejected at the
//! parse boundary instead of leaking into the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session event types, matching the `event_type` tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    /// Executor announced itself for a session.
    SessionStart,
    /// Executor is about to invoke a tool.
    PreTool,
    /// Executor finished invoking a tool.
    PostTool,
    /// A conversational message was produced.
    Message,
    /// The run finished successfully (terminal).
    RunCompleted,
    /// The run failed (terminal).
    RunFailed,
}

impl SessionEventType {
    /// Whether this event type closes the session's event log.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted | Self::RunFailed)
    }
}

impl std::fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionStart => "session_start",
            Self::PreTool => "pre_tool",
            Self::PostTool => "post_tool",
            Self::Message => "message",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
        };
        f.write_str(s)
    }
}

/// A session event body as appended via `POST /sessions/{id}/events`.
///
/// The tag doubles as the stored `event_type` column; type-specific fields
/// ride alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SessionEventBody {
    /// Executor started working on the session.
    SessionStart {
        /// Free-form executor metadata (model, version, flags).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Tool invocation is about to happen.
    PreTool {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<Value>,
    },
    /// Tool invocation finished.
    PostTool {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_output: Option<Value>,
    },
    /// Conversational message.
    Message {
        role: String,
        content: String,
    },
    /// Terminal success event. `result` carries the textual run result.
    RunCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    /// Terminal failure event.
    RunFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl SessionEventBody {
    /// The event type tag for this body.
    pub fn event_type(&self) -> SessionEventType {
        match self {
            Self::SessionStart { .. } => SessionEventType::SessionStart,
            Self::PreTool { .. } => SessionEventType::PreTool,
            Self::PostTool { .. } => SessionEventType::PostTool,
            Self::Message { .. } => SessionEventType::Message,
            Self::RunCompleted { .. } => SessionEventType::RunCompleted,
            Self::RunFailed { .. } => SessionEventType::RunFailed,
        }
    }

    /// Whether this body closes the session.
    pub fn is_terminal(&self) -> bool {
        self.event_type().is_terminal()
    }

    /// The textual result of a `run_completed` event, if any.
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Self::RunCompleted { result, .. } => result.as_deref(),
            _ => None,
        }
    }

    /// The error text of a `run_failed` event, if any.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::RunFailed { error, reason, .. } => error.as_deref().or(reason.as_deref()),
            _ => None,
        }
    }
}

/// Event types published on the coordinator's SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    RunCreated,
    SessionRunning,
    SessionEvent,
    RunCompleted,
    RunFailed,
    RunStopped,
}

impl StreamEventType {
    /// Short code embedded in SSE event IDs (`<ms>-<abbrev>-<seq>`).
    pub fn abbrev(&self) -> &'static str {
        match self {
            Self::RunCreated => "rc",
            Self::SessionRunning => "sr",
            Self::SessionEvent => "se",
            Self::RunCompleted => "done",
            Self::RunFailed => "fail",
            Self::RunStopped => "stop",
        }
    }
}

impl std::fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RunCreated => "run_created",
            Self::SessionRunning => "session_running",
            Self::SessionEvent => "session_event",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::RunStopped => "run_stopped",
        };
        f.write_str(s)
    }
}
