//! Session lifecycle handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use drover_protocol::{SessionEventBody, SessionEventType, StreamEventType};

use crate::api::{ApiError, ApiResult, AppState};
use crate::callback;
use crate::session::{Session, SessionAffinity, SessionStatus, StoredEvent};

/// Query parameters for `GET /sessions`.
#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    /// Filter to sessions with this advisory name.
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /sessions`
#[instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<Vec<Session>>> {
    let sessions = state.sessions.list().await?;
    let sessions = match query.name {
        Some(name) => sessions
            .into_iter()
            .filter(|s| s.session_name == name)
            .collect(),
        None => sessions,
    };
    Ok(Json(sessions))
}

/// `GET /sessions/{id}`
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    state
        .sessions
        .get_by_id(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))
}

/// Response body for `GET /sessions/{id}/status`.
#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

/// `GET /sessions/{id}/status`
#[instrument(skip(state))]
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let status = state.sessions.get_status(&session_id).await?;
    Ok(Json(SessionStatusResponse { session_id, status }))
}

/// Response body for `GET /sessions/{id}/result`.
#[derive(Debug, Serialize)]
pub struct SessionResultResponse {
    pub session_id: String,
    pub result: String,
}

/// `GET /sessions/{id}/result` — text of the latest terminal success.
#[instrument(skip(state))]
pub async fn get_result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionResultResponse>> {
    let result = state.sessions.get_result(&session_id).await?;
    Ok(Json(SessionResultResponse { session_id, result }))
}

/// Response body for `GET /sessions/{id}/affinity`.
#[derive(Debug, Serialize)]
pub struct AffinityResponse {
    pub bound: bool,
    #[serde(flatten)]
    pub affinity: Option<SessionAffinity>,
}

/// `GET /sessions/{id}/affinity` — resume routing info.
#[instrument(skip(state))]
pub async fn get_affinity(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<AffinityResponse>> {
    let affinity = state.sessions.get_affinity(&session_id).await?;
    Ok(Json(AffinityResponse {
        bound: affinity.is_some(),
        affinity,
    }))
}

/// Request body for `POST /sessions/{id}/bind`.
#[derive(Debug, Deserialize)]
pub struct BindSessionRequest {
    pub executor_session_id: String,
    pub hostname: String,
    pub executor_type: String,
    #[serde(default)]
    pub project_dir: Option<String>,
}

/// `POST /sessions/{id}/bind` — the executor-binding handshake.
#[instrument(skip(state, request), fields(executor_session_id = %request.executor_session_id))]
pub async fn bind_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<BindSessionRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .bind(
            &session_id,
            crate::session::BindRequest {
                executor_session_id: request.executor_session_id,
                hostname: request.hostname,
                executor_type: request.executor_type,
                project_dir: request.project_dir,
            },
        )
        .await?;

    state.sse.broadcast(
        StreamEventType::SessionRunning,
        json!({
            "session_id": session.session_id,
            "session_name": session.session_name,
            "executor_session_id": session.executor_session_id,
            "hostname": session.hostname,
        }),
        Some(&session.session_id),
    );

    info!(session_id = %session.session_id, "session bound");
    Ok(Json(session))
}

/// `GET /sessions/{id}/events` — the persisted event log.
#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<StoredEvent>>> {
    Ok(Json(state.sessions.list_events(&session_id).await?))
}

/// `POST /sessions/{id}/events` — append an event.
///
/// Terminal events atomically close the session, close the corresponding
/// run, and fire the callback step toward the parent session.
#[instrument(skip(state, body))]
pub async fn append_event(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SessionEventBody>,
) -> ApiResult<(StatusCode, Json<StoredEvent>)> {
    let outcome = state.sessions.append_event(&session_id, body).await?;
    let event = outcome.event;

    state.sse.broadcast(
        StreamEventType::SessionEvent,
        serde_json::to_value(&event).unwrap_or_else(|_| json!({"session_id": session_id})),
        Some(&session_id),
    );

    match event.body.event_type() {
        SessionEventType::RunCompleted => {
            close_run(&state, &session_id, true, event.body.result_text()).await?;
            callback::process_callback(
                &state,
                &session_id,
                event.body.result_text().unwrap_or_default(),
            )
            .await;
        }
        SessionEventType::RunFailed => {
            close_run(&state, &session_id, false, event.body.error_text()).await?;
        }
        _ => {}
    }

    Ok((StatusCode::CREATED, Json(event)))
}

/// Close the active run for a session after its executor reported a
/// terminal event, and publish the run-level transition.
async fn close_run(
    state: &AppState,
    session_id: &str,
    success: bool,
    detail: Option<&str>,
) -> ApiResult<()> {
    let Some(run) = state.queue.find_active_by_session(session_id).await? else {
        // No claimed run to close: the executor may have been launched out
        // of band, or the run already timed out.
        return Ok(());
    };

    let (run, event_type) = if success {
        (
            state.queue.complete_system(&run.run_id).await?,
            StreamEventType::RunCompleted,
        )
    } else {
        (
            state
                .queue
                .fail_system(&run.run_id, detail.unwrap_or("run failed"))
                .await?,
            StreamEventType::RunFailed,
        )
    };

    state.sse.broadcast(
        event_type,
        json!({
            "run_id": run.run_id,
            "session_id": run.session_id,
            "status": run.status,
            "error": run.error,
        }),
        Some(session_id),
    );
    Ok(())
}

/// Request body for `PATCH /sessions/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub parent_session_name: Option<String>,
}

/// `PATCH /sessions/{id}` — update advisory metadata.
#[instrument(skip(state, request))]
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Session>> {
    state
        .sessions
        .update_metadata(
            &session_id,
            request.session_name.as_deref(),
            request.agent_name.as_deref(),
            request.parent_session_name.as_deref(),
        )
        .await?;

    state
        .sessions
        .get_by_id(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} not found")))
}

/// `DELETE /sessions/{id}`
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.delete(&session_id).await?;
    info!(session_id, "session deleted");
    Ok(StatusCode::NO_CONTENT)
}
