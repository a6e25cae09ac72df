//! Coordinator bootstrap: wire components, recover state, serve.

use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{create_router, AppState};
use crate::auth::AuthState;
use crate::blueprint::{BlueprintSource, DirBlueprints, McpRegistry, MemoryBlueprints};
use crate::config::AppConfig;
use crate::db::Database;
use crate::queue::{finalize_failed_run, spawn_sweeper, RunQueue, RunRepository};
use crate::runner::{CommandQueues, RunnerRegistry, WakeHub};
use crate::session::{SessionRepository, SessionStore};
use crate::sse::SseManager;

/// Build the application state from configuration.
pub async fn build_state(config: &AppConfig, db: Database) -> Result<AppState> {
    let auth_config = config.auth_config();
    auth_config.validate().map_err(|e| anyhow!(e))?;
    if auth_config.disabled {
        warn!("authentication is DISABLED - all requests will be allowed");
    }

    let wake = Arc::new(WakeHub::new());

    let blueprints: Arc<dyn BlueprintSource> = match config.blueprints_dir() {
        Some(dir) => {
            info!(dir = %dir.display(), "serving blueprints from directory");
            Arc::new(DirBlueprints::new(dir))
        }
        None => Arc::new(MemoryBlueprints::new()),
    };

    let mut mcp = McpRegistry::new();
    for (id, definition) in &config.mcp_servers {
        mcp.insert(id.clone(), definition.clone());
    }

    Ok(AppState::new(
        SessionStore::new(SessionRepository::new(db.pool().clone())),
        RunQueue::new(RunRepository::new(db.pool().clone())),
        RunnerRegistry::new(wake.clone(), config.dispatch.heartbeat_timeout_secs),
        CommandQueues::new(wake.clone()),
        wake,
        SseManager::new(),
        blueprints,
        mcp,
        AuthState::new(auth_config),
        config.dispatch_settings(),
    ))
}

/// Run the coordinator until the process is stopped.
pub async fn run(config: AppConfig) -> Result<()> {
    let db = Database::new(&config.db_path()).await?;
    let state = build_state(&config, db).await?;

    // Runners are in-memory; any run still marked active belonged to a
    // previous incarnation of this process.
    let recovered = state.queue.recover_stale_on_startup().await?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "recovered stale runs from previous incarnation");
        for run in &recovered {
            finalize_failed_run(&state.sessions, &state.sse, run).await;
        }
    }

    spawn_sweeper(
        state.queue.clone(),
        state.registry.clone(),
        state.sessions.clone(),
        state.sse.clone(),
        config.sweeper_config(),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "drover coordinator listening");

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .context("serving HTTP")?;

    Ok(())
}
