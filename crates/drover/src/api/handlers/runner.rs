//! Runner-facing handlers: registration, heartbeat, status reports.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use tracing::{info, instrument};

use drover_protocol::{
    HeartbeatRequest, RegisterRequest, RegisterResponse, ReportCompletedRequest,
    ReportFailedRequest, ReportStartedRequest, ReportStoppedRequest, StreamEventType,
};

use crate::api::{ApiError, ApiResult, AppState};
use crate::queue::finalize_failed_run;

/// `POST /runner/register`
#[instrument(skip(state, request), fields(hostname = %request.hostname))]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    if request.hostname.trim().is_empty() {
        return Err(ApiError::bad_request("hostname must not be empty"));
    }

    let info = state.registry.register(request);
    state.commands.register_runner(&info.runner_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            runner_id: info.runner_id,
            poll_endpoint: "/api/v1/runner/runs".to_string(),
            poll_timeout_secs: state.settings.poll_timeout_secs,
            heartbeat_interval_secs: state.settings.heartbeat_interval_secs,
        }),
    ))
}

/// `POST /runner/heartbeat`
#[instrument(skip(state, request), fields(runner_id = %request.runner_id))]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    if !state.registry.heartbeat(&request.runner_id) {
        return Err(ApiError::unknown_runner(request.runner_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runner/deregister` — latch the deregistration bit; the runner's
/// next poll consumes it.
#[instrument(skip(state, request), fields(runner_id = %request.runner_id))]
pub async fn deregister(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    if !state.registry.deregister(&request.runner_id) {
        return Err(ApiError::unknown_runner(request.runner_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runner/runs/{id}/started`
#[instrument(skip(state, request))]
pub async fn report_started(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<ReportStartedRequest>,
) -> ApiResult<StatusCode> {
    state
        .queue
        .report_started(&run_id, &request.runner_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runner/runs/{id}/completed`
///
/// The run-level close. Session-level results arrive separately through
/// the executor's `run_completed` event; when that event got here first
/// this report is a no-op duplicate.
#[instrument(skip(state, request))]
pub async fn report_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<ReportCompletedRequest>,
) -> ApiResult<StatusCode> {
    let already_terminal = state
        .queue
        .get(&run_id)
        .await?
        .is_some_and(|r| r.status.is_terminal());

    let run = state
        .queue
        .report_completed(&run_id, &request.runner_id)
        .await?;

    if !already_terminal {
        state.sse.broadcast(
            StreamEventType::RunCompleted,
            json!({
                "run_id": run.run_id,
                "session_id": run.session_id,
                "status": run.status,
            }),
            Some(&run.session_id),
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runner/runs/{id}/failed`
#[instrument(skip(state, request))]
pub async fn report_failed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<ReportFailedRequest>,
) -> ApiResult<StatusCode> {
    let already_terminal = state
        .queue
        .get(&run_id)
        .await?
        .is_some_and(|r| r.status.is_terminal());

    let run = state
        .queue
        .report_failed(&run_id, &request.runner_id, &request.error)
        .await?;

    if !already_terminal {
        info!(run_id = %run.run_id, "run failed: {}", request.error);
        finalize_failed_run(&state.sessions, &state.sse, &run).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /runner/runs/{id}/stopped`
#[instrument(skip(state, request), fields(signal = %request.signal))]
pub async fn report_stopped(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<ReportStoppedRequest>,
) -> ApiResult<StatusCode> {
    let already_terminal = state
        .queue
        .get(&run_id)
        .await?
        .is_some_and(|r| r.status.is_terminal());

    let run = state
        .queue
        .report_stopped(&run_id, &request.runner_id, &request.signal)
        .await?;

    if !already_terminal {
        state.sse.broadcast(
            StreamEventType::RunStopped,
            json!({
                "run_id": run.run_id,
                "session_id": run.session_id,
                "status": run.status,
                "signal": request.signal,
            }),
            Some(&run.session_id),
        );
    }
    Ok(StatusCode::NO_CONTENT)
}
