//! Supervisor: watches executor subprocesses and reports their fate.

use log::{debug, error, info, warn};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::api_client::CoordinatorClient;
use crate::registry::{RunningRun, RunningRuns};

/// Grace period between SIGTERM and SIGKILL when stopping a run.
const STOP_GRACE_SECS: u64 = 5;

/// Watches running executor subprocesses for completion and carries out
/// stop commands.
pub struct RunSupervisor {
    client: Arc<CoordinatorClient>,
    registry: RunningRuns,
    runner_id: String,
    check_interval: Duration,
}

impl RunSupervisor {
    pub fn new(
        client: Arc<CoordinatorClient>,
        registry: RunningRuns,
        runner_id: String,
        check_interval_secs: u64,
    ) -> Self {
        Self {
            client,
            registry,
            runner_id,
            check_interval: Duration::from_secs(check_interval_secs.max(1)),
        }
    }

    /// Supervision loop; runs until shutdown is signalled.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("supervisor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_runs().await;
                }
            }
        }
    }

    async fn check_runs(&self) {
        for run_id in self.registry.finished_run_ids().await {
            let Some(mut run) = self.registry.remove(&run_id).await else {
                continue;
            };
            match run.child.wait().await {
                Ok(status) => self.handle_completion(run, status).await,
                Err(e) => {
                    error!("failed to reap executor for run {run_id}: {e}");
                    let _ = self
                        .client
                        .report_failed(&self.runner_id, &run_id, &format!("wait failed: {e}"))
                        .await;
                }
            }
        }
    }

    async fn handle_completion(&self, mut run: RunningRun, status: ExitStatus) {
        let (stdout, stderr) = run.collect_output().await;
        let run_id = run.run_id.clone();

        if status.success() {
            info!(
                "run {run_id} completed (session={}, elapsed={}s)",
                run.session_id,
                (chrono::Utc::now() - run.started_at).num_seconds()
            );
            if let Err(e) = self.client.report_completed(&self.runner_id, &run_id).await {
                error!("failed to report completion for {run_id}: {e}");
            }
            return;
        }

        // Prefer stderr, fall back to stdout, then the bare exit status.
        let error_msg = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            format!("(stdout) {}", stdout.trim())
        } else {
            match status.code() {
                Some(code) => format!("process exited with code {code}"),
                None => "process terminated by signal".to_string(),
            }
        };

        error!(
            "run {run_id} failed (exit={:?}, session={}): {error_msg}",
            status.code(),
            run.session_id
        );
        if let Err(e) = self
            .client
            .report_failed(&self.runner_id, &run_id, &error_msg)
            .await
        {
            error!("failed to report failure for {run_id}: {e}");
        }
    }

    /// Stop a run: SIGTERM, a grace period, then SIGKILL. Always followed
    /// by a stopped report naming the signal that did the job.
    pub async fn stop_run(&self, run_id: &str) {
        let Some(mut run) = self.registry.remove(run_id).await else {
            debug!("stop for {run_id} ignored - not running here");
            return;
        };

        info!(
            "stopping run {run_id} (session={}, pid={:?})",
            run.session_id,
            run.child.id()
        );

        let mut signal = "SIGTERM";
        if let Some(pid) = run.child.id() {
            // tokio's kill() is SIGKILL; the graceful path goes via libc.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let waited =
            tokio::time::timeout(Duration::from_secs(STOP_GRACE_SECS), run.child.wait()).await;
        if waited.is_err() {
            warn!("run {run_id} ignored SIGTERM, sending SIGKILL");
            let _ = run.child.kill().await;
            signal = "SIGKILL";
        }

        // Drain whatever output the executor managed to produce.
        let _ = run.collect_output().await;

        if let Err(e) = self
            .client
            .report_stopped(&self.runner_id, run_id, signal)
            .await
        {
            error!("failed to report stopped for {run_id}: {e}");
        } else {
            info!("run {run_id} stopped ({signal})");
        }
    }
}
