//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthState;
use crate::blueprint::{BlueprintSource, McpRegistry};
use crate::queue::RunQueue;
use crate::runner::{CommandQueues, RunnerRegistry, WakeHub};
use crate::session::SessionStore;
use crate::sse::SseManager;

/// Dispatch knobs advertised to runners and used by the long-poll handler.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Default long-poll timeout, seconds.
    pub poll_timeout_secs: u64,
    /// Heartbeat interval runners should use, seconds.
    pub heartbeat_interval_secs: u64,
    /// Directory served to runners via script sync, if any.
    pub scripts_dir: Option<PathBuf>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            heartbeat_interval_secs: 60,
            scripts_dir: None,
        }
    }
}

/// Application state shared across all handlers.
///
/// One value owns every piece of coordinator state; handlers receive it by
/// reference. There are no hidden globals.
#[derive(Clone)]
pub struct AppState {
    /// Session store (persistent).
    pub sessions: Arc<SessionStore>,
    /// Demand-matched run queue (persistent).
    pub queue: Arc<RunQueue>,
    /// Runner registry (in-memory).
    pub registry: Arc<RunnerRegistry>,
    /// Per-runner command queues (in-memory).
    pub commands: Arc<CommandQueues>,
    /// Per-runner wake events.
    pub wake: Arc<WakeHub>,
    /// SSE fan-out.
    pub sse: Arc<SseManager>,
    /// Blueprint fetch collaborator.
    pub blueprints: Arc<dyn BlueprintSource>,
    /// MCP server registry.
    pub mcp: Arc<McpRegistry>,
    /// Authentication state.
    pub auth: AuthState,
    /// Dispatch settings.
    pub settings: DispatchSettings,
}

impl AppState {
    pub fn new(
        sessions: SessionStore,
        queue: RunQueue,
        registry: RunnerRegistry,
        commands: CommandQueues,
        wake: Arc<WakeHub>,
        sse: SseManager,
        blueprints: Arc<dyn BlueprintSource>,
        mcp: McpRegistry,
        auth: AuthState,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(sessions),
            queue: Arc::new(queue),
            registry: Arc::new(registry),
            commands: Arc::new(commands),
            wake,
            sse: Arc::new(sse),
            blueprints,
            mcp: Arc::new(mcp),
            auth,
            settings,
        }
    }
}
