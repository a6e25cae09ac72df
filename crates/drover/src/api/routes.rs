//! API route definitions.

use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;
use crate::dispatch;

use super::handlers;
use super::handlers::{runner, runs, scripts, sessions, stream};
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let auth_state = state.auth.clone();

    // Everything except the health probe requires authentication.
    let protected_routes = Router::new()
        // Run lifecycle
        .route("/runs", post(runs::create_run).get(runs::list_runs))
        .route("/runs/{run_id}", get(runs::get_run))
        .route("/runs/{run_id}/stop", post(runs::stop_run))
        // Session lifecycle
        .route("/sessions", get(sessions::list_sessions))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session)
                .patch(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route("/sessions/{session_id}/status", get(sessions::get_status))
        .route("/sessions/{session_id}/result", get(sessions::get_result))
        .route(
            "/sessions/{session_id}/affinity",
            get(sessions::get_affinity),
        )
        .route("/sessions/{session_id}/bind", post(sessions::bind_session))
        .route(
            "/sessions/{session_id}/events",
            post(sessions::append_event).get(sessions::list_events),
        )
        // Runner protocol
        .route("/runner/register", post(runner::register))
        .route("/runner/heartbeat", post(runner::heartbeat))
        .route("/runner/deregister", post(runner::deregister))
        .route("/runner/runs", get(dispatch::poll_runs))
        .route(
            "/runner/runs/{run_id}/started",
            post(runner::report_started),
        )
        .route(
            "/runner/runs/{run_id}/completed",
            post(runner::report_completed),
        )
        .route("/runner/runs/{run_id}/failed", post(runner::report_failed))
        .route(
            "/runner/runs/{run_id}/stopped",
            post(runner::report_stopped),
        )
        // Script distribution
        .route("/scripts/{name}", get(scripts::get_script))
        .route("/scripts/{name}/sync", post(scripts::sync_script))
        .route("/scripts/{name}/remove", post(scripts::remove_script))
        // Observable events
        .route("/events", get(stream::events))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
}

// Route shape assertions live in tests/api_tests.rs, which exercises the
// full router against an in-memory database.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DispatchSettings;
    use crate::auth::{AuthConfig, AuthState};
    use crate::blueprint::{McpRegistry, MemoryBlueprints};
    use crate::db::Database;
    use crate::queue::{RunQueue, RunRepository};
    use crate::runner::{CommandQueues, RunnerRegistry, WakeHub};
    use crate::session::{SessionRepository, SessionStore};
    use crate::sse::SseManager;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_router_builds() {
        let db = Database::in_memory().await.unwrap();
        let wake = Arc::new(WakeHub::new());
        let state = AppState::new(
            SessionStore::new(SessionRepository::new(db.pool().clone())),
            RunQueue::new(RunRepository::new(db.pool().clone())),
            RunnerRegistry::new(wake.clone(), 120),
            CommandQueues::new(wake.clone()),
            wake,
            SseManager::new(),
            Arc::new(MemoryBlueprints::new()),
            McpRegistry::new(),
            AuthState::new(AuthConfig {
                disabled: true,
                ..Default::default()
            }),
            DispatchSettings::default(),
        );

        let _router = create_router(state);
    }
}
