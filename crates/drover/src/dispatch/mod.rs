//! The central long-poll dispatcher.
//!
//! `GET /runner/runs` fuses three channels into one response: a claimable
//! run, pending stop/script commands, and the deregistration signal. The
//! handler re-checks all three whenever the runner's wake event fires and
//! answers 204 when the poll timeout passes with nothing to say.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeSet;
use tokio::time::Instant;
use tracing::{debug, instrument};

use drover_protocol::{PollResponse, RunAssignment, RunType};

use crate::api::{ApiError, ApiResult, AppState};
use crate::queue::{Demands, Run};

/// Longest poll timeout a runner may request, seconds.
const MAX_POLL_TIMEOUT_SECS: u64 = 300;

/// Query parameters for the long-poll endpoint.
#[derive(Debug, Deserialize)]
pub struct PollParams {
    pub runner_id: String,
    /// Extra capability tags advertised for this poll only,
    /// comma-separated.
    #[serde(default)]
    pub tags: Option<String>,
    /// Per-request poll timeout override, seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Long-poll handler.
#[instrument(skip(state), fields(runner_id = %params.runner_id))]
pub async fn poll_runs(
    State(state): State<AppState>,
    Query(params): Query<PollParams>,
) -> ApiResult<Response> {
    if !state.registry.exists(&params.runner_id) {
        return Err(ApiError::unknown_runner(params.runner_id));
    }

    let poll_tags: BTreeSet<String> = params
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let timeout = params
        .timeout_secs
        .unwrap_or(state.settings.poll_timeout_secs)
        .min(MAX_POLL_TIMEOUT_SECS);
    let deadline = Instant::now() + std::time::Duration::from_secs(timeout);
    let wake = state.wake.handle(&params.runner_id);

    loop {
        if state.registry.take_deregistered(&params.runner_id) {
            state.commands.unregister_runner(&params.runner_id);
            let envelope = PollResponse {
                deregistered: true,
                ..Default::default()
            };
            return Ok(Json(envelope).into_response());
        }

        // Polling refreshes the heartbeat and records per-poll tags.
        let Some(tags) = state.registry.advertise_tags(&params.runner_id, &poll_tags) else {
            return Err(ApiError::unknown_runner(params.runner_id));
        };

        // Claim before draining: a failed claim aborts the poll without
        // consuming queued commands.
        let claimed = state.queue.claim_run(&params.runner_id, &tags).await?;
        let commands = state.commands.drain(&params.runner_id);

        if claimed.is_some() || !commands.is_empty() {
            let run = match claimed {
                Some(run) => Some(build_assignment(&state, run).await?),
                None => None,
            };
            let envelope = PollResponse {
                run,
                stop_runs: commands.stop_runs,
                sync_scripts: commands.sync_scripts,
                remove_scripts: commands.remove_scripts,
                deregistered: false,
            };
            return Ok(Json(envelope).into_response());
        }

        // Park until something changes or the poll times out. A signal
        // racing ahead of `notified()` is kept as a stored permit, so no
        // wake-up is lost between the drain above and the await below.
        tokio::select! {
            _ = wake.notified() => {
                debug!("poll woken");
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
        }
    }
}

/// Build the wire assignment for a claimed run.
async fn build_assignment(state: &AppState, run: Run) -> ApiResult<RunAssignment> {
    let run_type = run.kind();
    let mut executor_session_id = None;

    if run_type == RunType::ResumeSession {
        if let Some(session) = state.sessions.get_by_id(&run.session_id).await? {
            executor_session_id = session.executor_session_id;
        }
        state.sessions.mark_resumed(&run.session_id).await?;
    }

    let agent_blueprint = match run.agent_blueprint.as_deref() {
        Some(raw) => Some(
            serde_json::from_str(raw)
                .map_err(|e| ApiError::internal(format!("stored blueprint is corrupt: {e}")))?,
        ),
        None => None,
    };

    Ok(RunAssignment {
        run_id: run.run_id,
        session_id: run.session_id,
        run_type,
        prompt: run.prompt,
        project_dir: run.project_dir,
        agent_name: run.agent_name,
        agent_blueprint,
        executor_session_id,
    })
}

/// Wake every live runner whose advertised tags satisfy the demands.
pub fn notify_matching(state: &AppState, demands: &Demands) {
    for runner in state.registry.list_live(None) {
        if demands.matched_by(&runner.tags) {
            state.wake.notify(&runner.runner_id);
        }
    }
}
