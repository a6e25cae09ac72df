//! Script distribution handlers.
//!
//! Scripts live in a directory on the coordinator. Sync/remove commands
//! ride the runner command queues; runners fetch content by name when a
//! sync command arrives.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::{ApiError, ApiResult, AppState};
use crate::blueprint::validate_agent_name;

/// Target selector for script commands: one runner or every runner.
#[derive(Debug, Default, Deserialize)]
pub struct ScriptTarget {
    #[serde(default)]
    pub runner_id: Option<String>,
}

/// Response for script command endpoints.
#[derive(Debug, Serialize)]
pub struct ScriptCommandResponse {
    pub script: String,
    /// Number of runners the command was queued for.
    pub queued: usize,
}

// Script names share the agent-name character rules, which also keeps
// them path-safe.
fn check_name(name: &str) -> ApiResult<()> {
    validate_agent_name(name).map_err(ApiError::bad_request)
}

/// `POST /scripts/{name}/sync` — queue a sync for one runner or all.
#[instrument(skip(state))]
pub async fn sync_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(target): Query<ScriptTarget>,
) -> ApiResult<(StatusCode, Json<ScriptCommandResponse>)> {
    check_name(&name)?;

    let queued = match target.runner_id.as_deref() {
        Some(runner_id) => {
            if !state.commands.add_sync(runner_id, &name) {
                return Err(ApiError::unknown_runner(runner_id.to_string()));
            }
            1
        }
        None => state.commands.add_sync_all(&name),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(ScriptCommandResponse {
            script: name,
            queued,
        }),
    ))
}

/// `POST /scripts/{name}/remove` — queue a removal for one runner or all.
#[instrument(skip(state))]
pub async fn remove_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(target): Query<ScriptTarget>,
) -> ApiResult<(StatusCode, Json<ScriptCommandResponse>)> {
    check_name(&name)?;

    let queued = match target.runner_id.as_deref() {
        Some(runner_id) => {
            if !state.commands.add_remove(runner_id, &name) {
                return Err(ApiError::unknown_runner(runner_id.to_string()));
            }
            1
        }
        None => state.commands.add_remove_all(&name),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(ScriptCommandResponse {
            script: name,
            queued,
        }),
    ))
}

/// `GET /scripts/{name}` — script content, fetched by runners on sync.
#[instrument(skip(state))]
pub async fn get_script(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<String> {
    check_name(&name)?;

    let Some(dir) = &state.settings.scripts_dir else {
        return Err(ApiError::not_found("no scripts directory configured"));
    };

    let path = dir.join(&name);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found(format!("script {name} not found")))
        }
        Err(e) => Err(ApiError::internal(format!("reading script {name}: {e}"))),
    }
}
