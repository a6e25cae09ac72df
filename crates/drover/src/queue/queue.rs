//! Run queue rules: atomic claim, status transitions, timeout reaping.

use chrono::Utc;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::time::{cutoff_ts, now_ts};

use super::models::{NewRun, Run, RunStatus};
use super::repository::RunRepository;

/// Errors surfaced by the run queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {run_id} is already terminal ({status})")]
    AlreadyTerminal { run_id: String, status: RunStatus },

    #[error("run {run_id} is not assigned to the reporting runner")]
    RunnerMismatch { run_id: String },

    #[error("run {run_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Timeout windows enforced by the sweeper.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLimits {
    /// Maximum age of an unclaimed or claimed-but-not-started run, seconds.
    pub claim_timeout_secs: u64,
    /// Maximum duration of a running run, seconds.
    pub run_timeout_secs: u64,
}

impl Default for TimeoutLimits {
    fn default() -> Self {
        Self {
            claim_timeout_secs: 60,
            run_timeout_secs: 600,
        }
    }
}

/// The demand-matched run queue.
///
/// All writes go through SQLite; the claim path is serialized by a
/// queue-wide mutex so that exactly one runner receives each run.
#[derive(Debug)]
pub struct RunQueue {
    repo: RunRepository,
    claim_lock: Mutex<()>,
}

impl RunQueue {
    pub fn new(repo: RunRepository) -> Self {
        Self {
            repo,
            claim_lock: Mutex::new(()),
        }
    }

    /// Enqueue a run in `pending`.
    pub async fn create_run(&self, params: NewRun) -> Result<Run, QueueError> {
        let run = Run {
            run_id: params
                .run_id
                .unwrap_or_else(|| format!("run_{}", Uuid::new_v4())),
            session_id: params.session_id,
            run_type: params.run_type.to_string(),
            status: RunStatus::Pending,
            demands: params.demands,
            prompt: params.prompt,
            project_dir: params.project_dir,
            agent_name: params.agent_name,
            agent_blueprint: params.agent_blueprint,
            parent_session_name: params.parent_session_name,
            runner_id: None,
            error: None,
            created_at: now_ts(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
        };

        self.repo.create(&run).await?;
        debug!(run_id = %run.run_id, session_id = %run.session_id, "run enqueued");
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>, QueueError> {
        Ok(self.repo.get(run_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Run>, QueueError> {
        Ok(self.repo.list().await?)
    }

    /// Runs in `claimed` or `running`.
    pub async fn list_active(&self) -> Result<Vec<Run>, QueueError> {
        Ok(self.repo.list_active().await?)
    }

    /// Atomically claim the oldest pending run whose demands are a subset
    /// of the runner's tags. Returns `None` when nothing matches.
    pub async fn claim_run(
        &self,
        runner_id: &str,
        runner_tags: &BTreeSet<String>,
    ) -> Result<Option<Run>, QueueError> {
        let _guard = self.claim_lock.lock().await;
        let mut tx = self.repo.pool().begin().await?;

        let pending = RunRepository::list_pending_in(&mut tx).await?;
        let Some(candidate) = pending.into_iter().find(|r| r.demands.matched_by(runner_tags))
        else {
            return Ok(None);
        };

        let now = now_ts();
        let updated =
            RunRepository::mark_claimed_in(&mut tx, &candidate.run_id, runner_id, &now).await?;
        if updated != 1 {
            // Lost a race with a concurrent writer; the caller simply polls
            // again on the next wake.
            return Ok(None);
        }

        tx.commit().await?;

        let mut run = candidate;
        run.status = RunStatus::Claimed;
        run.runner_id = Some(runner_id.to_string());
        run.claimed_at = Some(now);
        info!(run_id = %run.run_id, runner_id, "run claimed");
        Ok(Some(run))
    }

    /// Runner reports the executor subprocess spawned.
    pub async fn report_started(&self, run_id: &str, runner_id: &str) -> Result<Run, QueueError> {
        let mut tx = self.repo.pool().begin().await?;
        let run = Self::require_in(&mut tx, run_id).await?;
        Self::check_reporter(&run, runner_id)?;

        match run.status {
            RunStatus::Claimed => {
                RunRepository::mark_running_in(&mut tx, run_id, &now_ts()).await?;
                let run = Self::require_in(&mut tx, run_id).await?;
                tx.commit().await?;
                Ok(run)
            }
            // Duplicate report.
            RunStatus::Running => Ok(run),
            RunStatus::Pending => Err(QueueError::InvalidTransition {
                run_id: run_id.to_string(),
                from: RunStatus::Pending,
                to: RunStatus::Running,
            }),
            status => Err(QueueError::AlreadyTerminal {
                run_id: run_id.to_string(),
                status,
            }),
        }
    }

    /// Runner reports clean executor exit.
    pub async fn report_completed(&self, run_id: &str, runner_id: &str) -> Result<Run, QueueError> {
        self.terminal_report(run_id, Some(runner_id), RunStatus::Completed, None)
            .await
    }

    /// Runner reports executor failure.
    pub async fn report_failed(
        &self,
        run_id: &str,
        runner_id: &str,
        error: &str,
    ) -> Result<Run, QueueError> {
        self.terminal_report(run_id, Some(runner_id), RunStatus::Failed, Some(error))
            .await
    }

    /// Runner reports a stop carried out with the given signal.
    pub async fn report_stopped(
        &self,
        run_id: &str,
        runner_id: &str,
        signal: &str,
    ) -> Result<Run, QueueError> {
        self.terminal_report(
            run_id,
            Some(runner_id),
            RunStatus::Stopped,
            Some(&format!("stopped by {signal}")),
        )
        .await
    }

    /// Stop a run that is still pending. Returns the updated run, or
    /// `None` when the run has already left `pending` (the caller then
    /// routes a stop command to the claimant instead).
    pub async fn stop_pending(&self, run_id: &str) -> Result<Option<Run>, QueueError> {
        let _guard = self.claim_lock.lock().await;
        let mut tx = self.repo.pool().begin().await?;
        let run = Self::require_in(&mut tx, run_id).await?;

        if run.status != RunStatus::Pending {
            return Ok(None);
        }

        RunRepository::mark_terminal_in(
            &mut tx,
            run_id,
            RunStatus::Stopped,
            Some("stopped before claim"),
            &now_ts(),
        )
        .await?;
        let run = Self::require_in(&mut tx, run_id).await?;
        tx.commit().await?;
        Ok(Some(run))
    }

    /// Most recent claimed/running run for a session.
    pub async fn find_active_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Run>, QueueError> {
        Ok(self.repo.find_active_by_session(session_id).await?)
    }

    /// Coordinator-side completion, driven by the executor's terminal
    /// event rather than a runner report. Idempotent.
    pub async fn complete_system(&self, run_id: &str) -> Result<Run, QueueError> {
        match self
            .terminal_report(run_id, None, RunStatus::Completed, None)
            .await
        {
            Ok(run) => Ok(run),
            Err(QueueError::AlreadyTerminal { .. }) => {
                let run = self
                    .repo
                    .get(run_id)
                    .await?
                    .ok_or_else(|| QueueError::NotFound(run_id.to_string()))?;
                Ok(run)
            }
            Err(e) => Err(e),
        }
    }

    /// Coordinator-side failure (sweeper, startup recovery): no reporter
    /// check, idempotent on already-terminal runs.
    pub async fn fail_system(&self, run_id: &str, reason: &str) -> Result<Run, QueueError> {
        match self
            .terminal_report(run_id, None, RunStatus::Failed, Some(reason))
            .await
        {
            Ok(run) => Ok(run),
            Err(QueueError::AlreadyTerminal { .. }) => {
                let run = self
                    .repo
                    .get(run_id)
                    .await?
                    .ok_or_else(|| QueueError::NotFound(run_id.to_string()))?;
                Ok(run)
            }
            Err(e) => Err(e),
        }
    }

    /// Transition over-age runs to `timed_out`. Returns the reaped runs.
    pub async fn reap_timed_out(&self, limits: TimeoutLimits) -> Result<Vec<Run>, QueueError> {
        let now = Utc::now();
        let claim_cutoff = cutoff_ts(now, limits.claim_timeout_secs);
        let run_cutoff = cutoff_ts(now, limits.run_timeout_secs);

        let candidates = self
            .repo
            .list_timed_out(&claim_cutoff, &claim_cutoff, &run_cutoff)
            .await?;

        let mut reaped = Vec::new();
        for run in candidates {
            let error = match run.status {
                RunStatus::Pending => format!(
                    "no runner claimed the run within {}s",
                    limits.claim_timeout_secs
                ),
                RunStatus::Claimed => format!(
                    "runner did not start the run within {}s of claiming",
                    limits.claim_timeout_secs
                ),
                _ => format!("run exceeded {}s of execution", limits.run_timeout_secs),
            };

            match self
                .terminal_report(&run.run_id, None, RunStatus::TimedOut, Some(&error))
                .await
            {
                Ok(run) => {
                    info!(run_id = %run.run_id, "run timed out");
                    reaped.push(run);
                }
                // Raced with a runner report; terminal transitions are
                // idempotent from the sweeper's point of view.
                Err(QueueError::AlreadyTerminal { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }

    /// On startup, fail any run left in `claimed`/`running`: the runner
    /// registry is in-memory, so no claimant survived the restart.
    pub async fn recover_stale_on_startup(&self) -> Result<Vec<Run>, QueueError> {
        let active = self.repo.list_active().await?;
        let mut recovered = Vec::new();

        for run in active {
            let run = self
                .fail_system(&run.run_id, "coordinator_restart")
                .await?;
            info!(run_id = %run.run_id, "stale run recovered as failed");
            recovered.push(run);
        }

        Ok(recovered)
    }

    async fn terminal_report(
        &self,
        run_id: &str,
        runner_id: Option<&str>,
        target: RunStatus,
        error: Option<&str>,
    ) -> Result<Run, QueueError> {
        let mut tx = self.repo.pool().begin().await?;
        let run = Self::require_in(&mut tx, run_id).await?;
        if let Some(reporter) = runner_id {
            Self::check_reporter(&run, reporter)?;
        }

        if run.status.is_terminal() {
            // A late report matching the recorded state is accepted as a
            // duplicate; anything else is rejected.
            if run.status == target {
                return Ok(run);
            }
            return Err(QueueError::AlreadyTerminal {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        RunRepository::mark_terminal_in(&mut tx, run_id, target, error, &now_ts()).await?;
        let run = Self::require_in(&mut tx, run_id).await?;
        tx.commit().await?;
        Ok(run)
    }

    async fn require_in(
        tx: &mut sqlx::SqliteConnection,
        run_id: &str,
    ) -> Result<Run, QueueError> {
        RunRepository::get_in(tx, run_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(run_id.to_string()))
    }

    fn check_reporter(run: &Run, runner_id: &str) -> Result<(), QueueError> {
        match run.runner_id.as_deref() {
            Some(claimant) if claimant == runner_id => Ok(()),
            _ => Err(QueueError::RunnerMismatch {
                run_id: run.run_id.clone(),
            }),
        }
    }
}
