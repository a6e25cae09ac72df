//! Run lifecycle handlers: create, read, stop.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use drover_protocol::{RunType, StreamEventType};

use crate::api::{ApiError, ApiResult, AppState};
use crate::blueprint::PlaceholderResolver;
use crate::dispatch::notify_matching;
use crate::queue::{Demands, NewRun, Run, RunStatus};
use crate::session::{NewSession, Session};

/// Request body for `POST /runs`.
#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    #[serde(rename = "type")]
    pub run_type: RunType,
    pub prompt: String,
    /// Agent to execute (start runs).
    #[serde(default)]
    pub agent_name: Option<String>,
    /// Advisory name for the new session (start runs).
    #[serde(default)]
    pub session_name: Option<String>,
    /// Target session (resume runs), by ID...
    #[serde(default)]
    pub session_id: Option<String>,
    /// ...or by advisory name (newest match wins).
    #[serde(default)]
    pub target_session_name: Option<String>,
    #[serde(default)]
    pub project_dir: Option<String>,
    #[serde(default)]
    pub parent_session_name: Option<String>,
    /// Capability tags the claiming runner must advertise.
    #[serde(default)]
    pub demands: std::collections::BTreeSet<String>,
    /// Run parameters, resolvable as `${params.*}`.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Run scope, resolvable as `${scope.*}`; not shown to the agent.
    #[serde(default)]
    pub scope: Map<String, Value>,
}

/// Response body for `POST /runs`.
#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub session_id: String,
    pub session_name: String,
    pub status: RunStatus,
}

/// `POST /runs` — create a session and enqueue a run against it.
#[instrument(skip(state, request), fields(run_type = %request.run_type))]
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> ApiResult<(StatusCode, Json<CreateRunResponse>)> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let (session, run) = match request.run_type {
        RunType::StartSession => create_start_run(&state, &request).await?,
        RunType::ResumeSession => create_resume_run(&state, &request).await?,
    };

    state.sse.broadcast(
        StreamEventType::RunCreated,
        json!({
            "run_id": run.run_id,
            "session_id": session.session_id,
            "session_name": session.session_name,
            "agent_name": run.agent_name,
            "type": run.run_type,
        }),
        Some(&session.session_id),
    );
    notify_matching(&state, &run.demands);

    info!(run_id = %run.run_id, session_id = %session.session_id, "run created");
    Ok((
        StatusCode::CREATED,
        Json(CreateRunResponse {
            run_id: run.run_id,
            session_id: session.session_id,
            session_name: session.session_name,
            status: RunStatus::Pending,
        }),
    ))
}

async fn create_start_run(
    state: &AppState,
    request: &CreateRunRequest,
) -> ApiResult<(Session, Run)> {
    // Fetch and validate the blueprint before creating anything.
    let blueprint = match request.agent_name.as_deref() {
        Some(agent_name) => {
            let blueprint = state
                .blueprints
                .fetch(agent_name)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("unknown agent: {agent_name}")))?;

            if let Some(schema) = &blueprint.config_schema {
                let problems = schema.validate(&request.params);
                if !problems.is_empty() {
                    return Err(ApiError::InvalidConfig {
                        message: "run parameters do not satisfy the agent's schema".to_string(),
                        missing: problems,
                    });
                }
            }
            Some(blueprint)
        }
        None => None,
    };

    let session = state
        .sessions
        .create_session(NewSession {
            session_name: request.session_name.clone(),
            project_dir: request.project_dir.clone(),
            agent_name: request.agent_name.clone(),
            parent_session_name: request.parent_session_name.clone(),
        })
        .await?;

    // The run ID participates in `${runtime.run_id}` resolution, so it is
    // minted before the insert.
    let run_id = format!("run_{}", uuid::Uuid::new_v4());

    let mut demands = Demands::new(request.demands.iter().cloned());
    let agent_blueprint = match blueprint {
        Some(blueprint) => {
            for tag in &blueprint.demands {
                demands.insert(tag.clone());
            }

            let resolver = PlaceholderResolver::new(
                &request.params,
                &request.scope,
                &session.session_id,
                &run_id,
            );
            let mut resolved = resolver.resolve(
                &serde_json::to_value(&blueprint)
                    .map_err(|e| ApiError::internal(e.to_string()))?,
            );

            if let Some(servers) = resolved.get("mcp_servers").and_then(Value::as_object) {
                let entries: BTreeMap<String, Value> =
                    servers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let expanded = state.mcp.expand(&entries)?;
                resolved["mcp_servers"] = Value::Object(expanded.into_iter().collect());
            }

            Some(serde_json::to_string(&resolved).map_err(|e| ApiError::internal(e.to_string()))?)
        }
        None => None,
    };

    let run = state
        .queue
        .create_run(NewRun {
            run_id: Some(run_id),
            run_type: RunType::StartSession,
            session_id: session.session_id.clone(),
            demands,
            prompt: request.prompt.clone(),
            project_dir: request.project_dir.clone(),
            agent_name: request.agent_name.clone(),
            agent_blueprint,
            parent_session_name: request.parent_session_name.clone(),
        })
        .await?;

    Ok((session, run))
}

async fn create_resume_run(
    state: &AppState,
    request: &CreateRunRequest,
) -> ApiResult<(Session, Run)> {
    let session = match (&request.session_id, &request.target_session_name) {
        (Some(id), _) => state.sessions.get_by_id(id).await?,
        (None, Some(name)) => state.sessions.get_by_name(name).await?,
        (None, None) => {
            return Err(ApiError::bad_request(
                "resume_session requires session_id or target_session_name",
            ));
        }
    }
    .ok_or_else(|| ApiError::not_found("session to resume not found"))?;

    if !session.is_bound() {
        return Err(ApiError::conflict(format!(
            "session {} has not bound an executor yet; nothing to resume",
            session.session_id
        )));
    }

    enqueue_resume_run(state, &session, request.prompt.clone(), {
        let mut demands = Demands::new(request.demands.iter().cloned());
        if let Some(executor_type) = &session.executor_type {
            demands.insert(executor_type.clone());
        }
        demands
    })
    .await
    .map(|run| (session, run))
}

/// Enqueue a resume run against a bound session. Shared with the callback
/// step.
pub async fn enqueue_resume_run(
    state: &AppState,
    session: &Session,
    prompt: String,
    demands: Demands,
) -> ApiResult<Run> {
    let run = state
        .queue
        .create_run(NewRun {
            run_id: None,
            run_type: RunType::ResumeSession,
            session_id: session.session_id.clone(),
            demands,
            prompt,
            project_dir: session.project_dir.clone(),
            agent_name: session.agent_name.clone(),
            agent_blueprint: None,
            parent_session_name: session.parent_session_name.clone(),
        })
        .await?;

    Ok(run)
}

/// `GET /runs` — list runs, newest first.
#[instrument(skip(state))]
pub async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<Run>>> {
    Ok(Json(state.queue.list().await?))
}

/// `GET /runs/{id}`
#[instrument(skip(state))]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Run>> {
    state
        .queue
        .get(&run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))
}

/// Response body for `POST /runs/{id}/stop`.
#[derive(Debug, Serialize)]
pub struct StopRunResponse {
    pub run_id: String,
    pub status: RunStatus,
    /// True when a stop command was queued for the claiming runner.
    pub stop_requested: bool,
}

/// `POST /runs/{id}/stop` — idempotent stop request.
///
/// A pending run stops immediately; a claimed or running run gets a stop
/// command routed to its runner; a terminal run reports its existing state.
#[instrument(skip(state))]
pub async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<(StatusCode, Json<StopRunResponse>)> {
    let run = state
        .queue
        .get(&run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;

    if run.status.is_terminal() {
        return Ok((
            StatusCode::ACCEPTED,
            Json(StopRunResponse {
                run_id,
                status: run.status,
                stop_requested: false,
            }),
        ));
    }

    if let Some(stopped) = state.queue.stop_pending(&run_id).await? {
        state.sse.broadcast(
            StreamEventType::RunStopped,
            json!({
                "run_id": stopped.run_id,
                "session_id": stopped.session_id,
                "status": stopped.status,
            }),
            Some(&stopped.session_id),
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(StopRunResponse {
                run_id,
                status: RunStatus::Stopped,
                stop_requested: false,
            }),
        ));
    }

    // Claimed or running: route the stop to the claimant.
    let run = state
        .queue
        .get(&run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    match run.runner_id.as_deref() {
        Some(runner_id) => {
            if !state.commands.add_stop(runner_id, &run_id) {
                // The runner is gone; the sweeper will fail this run.
                warn!(run_id, runner_id, "stop requested but runner is gone");
            }
        }
        None => warn!(run_id, "active run has no claimant; sweeper will reap it"),
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(StopRunResponse {
            run_id,
            status: run.status,
            stop_requested: true,
        }),
    ))
}
