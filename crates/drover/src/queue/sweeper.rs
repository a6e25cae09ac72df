//! Background sweeper: timeout reaping, lost-runner recovery, and dead
//! runner eviction.

use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use drover_protocol::{SessionEventBody, StreamEventType};

use crate::runner::RunnerRegistry;
use crate::session::{SessionStore, StoreError};
use crate::sse::SseManager;

use super::models::Run;
use super::queue::{RunQueue, TimeoutLimits};

/// Sweeper configuration.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval_secs: u64,
    pub limits: TimeoutLimits,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            limits: TimeoutLimits::default(),
        }
    }
}

/// Spawn the sweeper loop.
pub fn spawn_sweeper(
    queue: Arc<RunQueue>,
    registry: Arc<RunnerRegistry>,
    sessions: Arc<SessionStore>,
    sse: Arc<SseManager>,
    config: SweeperConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            config.interval_secs.max(1),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(&queue, &registry, &sessions, &sse, config.limits).await {
                error!(error = %e, "sweep failed");
            }
        }
    })
}

/// One sweep pass. Exposed for tests.
pub(crate) async fn sweep_once(
    queue: &RunQueue,
    registry: &RunnerRegistry,
    sessions: &SessionStore,
    sse: &SseManager,
    limits: TimeoutLimits,
) -> anyhow::Result<()> {
    // 1. Over-age runs.
    let reaped = queue.reap_timed_out(limits).await?;
    for run in &reaped {
        finalize_failed_run(sessions, sse, run).await;
    }

    // 2. Claimed/running runs whose claimant stopped heartbeating.
    let active = queue.list_active().await?;
    for run in active {
        let lost = run
            .runner_id
            .as_deref()
            .map(|id| !registry.is_alive(id))
            .unwrap_or(true);
        if !lost {
            continue;
        }

        warn!(run_id = %run.run_id, runner_id = ?run.runner_id, "runner lost, failing run");
        let failed = queue.fail_system(&run.run_id, "runner_lost").await?;
        finalize_failed_run(sessions, sse, &failed).await;
    }

    // 3. Evict runners that missed their heartbeat window entirely.
    let evicted = registry.evict_dead();
    if !evicted.is_empty() {
        info!(count = evicted.len(), "evicted dead runners");
    }

    Ok(())
}

/// Close out the session side of a coordinator-observed run failure and
/// publish it. The executor is gone, so the coordinator appends the
/// terminal event on its behalf; an already-terminal session means the
/// executor got its word in first, which is fine.
pub(crate) async fn finalize_failed_run(sessions: &SessionStore, sse: &SseManager, run: &Run) {
    let error = run.error.clone().unwrap_or_else(|| "run failed".to_string());

    match sessions
        .append_event(
            &run.session_id,
            SessionEventBody::RunFailed {
                error: Some(error.clone()),
                reason: None,
                exit_code: None,
            },
        )
        .await
    {
        Ok(_) | Err(StoreError::SessionTerminal(_)) | Err(StoreError::NotFound(_)) => {}
        Err(e) => error!(run_id = %run.run_id, error = %e, "failed to record run failure"),
    }

    sse.broadcast(
        StreamEventType::RunFailed,
        json!({
            "run_id": run.run_id,
            "session_id": run.session_id,
            "status": run.status,
            "error": error,
        }),
        Some(&run.session_id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::queue::models::NewRun;
    use crate::queue::repository::RunRepository;
    use crate::queue::RunStatus;
    use crate::runner::WakeHub;
    use crate::session::{NewSession, SessionRepository, SessionStatus};
    use drover_protocol::RegisterRequest;
    use std::collections::BTreeSet;

    struct Fixture {
        queue: Arc<RunQueue>,
        registry: Arc<RunnerRegistry>,
        sessions: Arc<SessionStore>,
        sse: Arc<SseManager>,
    }

    async fn fixture(heartbeat_timeout_secs: u64) -> Fixture {
        let db = Database::in_memory().await.unwrap();
        Fixture {
            queue: Arc::new(RunQueue::new(RunRepository::new(db.pool().clone()))),
            registry: Arc::new(RunnerRegistry::new(
                Arc::new(WakeHub::new()),
                heartbeat_timeout_secs,
            )),
            sessions: Arc::new(SessionStore::new(SessionRepository::new(db.pool().clone()))),
            sse: Arc::new(SseManager::new()),
        }
    }

    #[tokio::test]
    async fn test_runner_lost_fails_run_and_session() {
        // A zero-second heartbeat window makes every runner immediately dead.
        let fx = fixture(0).await;

        let session = fx
            .sessions
            .create_session(NewSession::default())
            .await
            .unwrap();
        let run = fx
            .queue
            .create_run(NewRun::start(session.session_id.clone(), "hi"))
            .await
            .unwrap();

        let runner = fx.registry.register(RegisterRequest {
            hostname: "w1".to_string(),
            project_dir: None,
            executor_type: "claude-code".to_string(),
            tags: BTreeSet::new(),
        });
        fx.queue
            .claim_run(&runner.runner_id, &BTreeSet::new())
            .await
            .unwrap()
            .unwrap();

        let mut subscriber = fx.sse.register(None);

        let generous = TimeoutLimits {
            claim_timeout_secs: 3600,
            run_timeout_secs: 3600,
        };
        sweep_once(&fx.queue, &fx.registry, &fx.sessions, &fx.sse, generous)
            .await
            .unwrap();

        let run = fx.queue.get(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("runner_lost"));

        assert_eq!(
            fx.sessions.get_status(&session.session_id).await.unwrap(),
            SessionStatus::Failed
        );

        let frame = subscriber.frames.try_recv().unwrap();
        assert!(frame.contains("event: run_failed"));
        assert!(frame.contains("runner_lost"));
    }

    #[tokio::test]
    async fn test_live_runner_keeps_its_run() {
        let fx = fixture(120).await;

        let session = fx
            .sessions
            .create_session(NewSession::default())
            .await
            .unwrap();
        let run = fx
            .queue
            .create_run(NewRun::start(session.session_id.clone(), "hi"))
            .await
            .unwrap();

        let runner = fx.registry.register(RegisterRequest {
            hostname: "w1".to_string(),
            project_dir: None,
            executor_type: "claude-code".to_string(),
            tags: BTreeSet::new(),
        });
        fx.queue
            .claim_run(&runner.runner_id, &BTreeSet::new())
            .await
            .unwrap()
            .unwrap();

        let generous = TimeoutLimits {
            claim_timeout_secs: 3600,
            run_timeout_secs: 3600,
        };
        sweep_once(&fx.queue, &fx.registry, &fx.sessions, &fx.sse, generous)
            .await
            .unwrap();

        let run = fx.queue.get(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Claimed);
    }
}
