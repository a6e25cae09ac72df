//! Callback step: when a child session completes and names a parent, the
//! coordinator resumes the parent with the child's result.
//!
//! This is a plain queue insertion; ordering and busy-parent handling fall
//! out of normal queue semantics. Callback failures are logged and never
//! fail the event append that triggered them.

use serde_json::json;
use tracing::{info, warn};

use drover_protocol::StreamEventType;

use crate::api::handlers::runs::enqueue_resume_run;
use crate::api::AppState;
use crate::dispatch::notify_matching;
use crate::queue::Demands;

/// Resume the parent of a completed child session, if it has one.
pub async fn process_callback(state: &AppState, child_session_id: &str, result: &str) {
    let child = match state.sessions.get_by_id(child_session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(e) => {
            warn!(child_session_id, error = %e, "callback lookup failed");
            return;
        }
    };

    let Some(parent_name) = child.parent_session_name.as_deref() else {
        return;
    };

    let parent = match state.sessions.get_by_name(parent_name).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(parent_name, "callback parent session not found");
            return;
        }
        Err(e) => {
            warn!(parent_name, error = %e, "callback parent lookup failed");
            return;
        }
    };

    if !parent.is_bound() {
        warn!(parent_name, "callback parent has no bound executor; skipping resume");
        return;
    }

    let prompt = format!(
        "Agent session '{}' that you started has completed.\n\nResult:\n{}",
        child.session_name, result
    );

    let mut demands = Demands::default();
    if let Some(executor_type) = &parent.executor_type {
        demands.insert(executor_type.clone());
    }

    match enqueue_resume_run(state, &parent, prompt, demands).await {
        Ok(run) => {
            state.sse.broadcast(
                StreamEventType::RunCreated,
                json!({
                    "run_id": run.run_id,
                    "session_id": parent.session_id,
                    "session_name": parent.session_name,
                    "type": run.run_type,
                    "callback_from": child.session_id,
                }),
                Some(&parent.session_id),
            );
            notify_matching(state, &run.demands);
            info!(
                run_id = %run.run_id,
                parent = %parent.session_id,
                child = %child.session_id,
                "callback resume enqueued"
            );
        }
        Err(e) => {
            warn!(parent = %parent.session_id, error = %e, "failed to enqueue callback resume");
        }
    }
}
