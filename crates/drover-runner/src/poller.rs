//! Poll loop: long-poll the coordinator, spawn executors, honor commands.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use drover_protocol::{PollResponse, RunAssignment};

use crate::api_client::CoordinatorClient;
use crate::config::{INITIAL_BACKOFF_SECS, MAX_BACKOFF_SECS, MAX_CONNECTION_RETRIES};
use crate::executor::ExecutorLauncher;
use crate::registry::RunningRuns;
use crate::scripts::ScriptSync;
use crate::supervisor::RunSupervisor;

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    /// The coordinator deregistered this runner; clean shutdown.
    Deregistered,
    /// The coordinator stayed unreachable past the retry limit.
    ConnectionLost,
    /// Local shutdown (signal).
    Interrupted,
}

/// The poll loop.
pub struct RunPoller {
    client: Arc<CoordinatorClient>,
    launcher: ExecutorLauncher,
    registry: RunningRuns,
    supervisor: Arc<RunSupervisor>,
    scripts: ScriptSync,
    runner_id: String,
    poll_timeout_secs: u64,
}

impl RunPoller {
    pub fn new(
        client: Arc<CoordinatorClient>,
        launcher: ExecutorLauncher,
        registry: RunningRuns,
        supervisor: Arc<RunSupervisor>,
        scripts: ScriptSync,
        runner_id: String,
        poll_timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            launcher,
            registry,
            supervisor,
            scripts,
            runner_id,
            poll_timeout_secs,
        }
    }

    /// Poll until deregistered, disconnected, or shut down.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> PollerExit {
        let mut consecutive_failures: u32 = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            let poll = self.client.poll(&self.runner_id, "", self.poll_timeout_secs);
            let result = tokio::select! {
                _ = shutdown.recv() => return PollerExit::Interrupted,
                result = poll => result,
            };

            match result {
                Ok(None) => {
                    // Clean 204: nothing happened within the window.
                    consecutive_failures = 0;
                    backoff_secs = INITIAL_BACKOFF_SECS;
                }
                Ok(Some(envelope)) => {
                    consecutive_failures = 0;
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    if self.handle_envelope(envelope).await == Some(PollerExit::Deregistered) {
                        return PollerExit::Deregistered;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "poll error ({consecutive_failures}/{MAX_CONNECTION_RETRIES}): {e:#}"
                    );

                    if consecutive_failures >= MAX_CONNECTION_RETRIES {
                        error!(
                            "coordinator unreachable after {MAX_CONNECTION_RETRIES} attempts - shutting down"
                        );
                        return PollerExit::ConnectionLost;
                    }

                    tokio::select! {
                        _ = shutdown.recv() => return PollerExit::Interrupted,
                        _ = tokio::time::sleep(Duration::from_secs_f64(backoff_secs)) => {}
                    }
                    backoff_secs = (backoff_secs * 2.0).min(MAX_BACKOFF_SECS);
                }
            }
        }
    }

    async fn handle_envelope(&self, envelope: PollResponse) -> Option<PollerExit> {
        if envelope.deregistered {
            warn!("received deregistration signal from coordinator");
            return Some(PollerExit::Deregistered);
        }

        for run_id in &envelope.stop_runs {
            self.supervisor.stop_run(run_id).await;
        }

        if !envelope.sync_scripts.is_empty() || !envelope.remove_scripts.is_empty() {
            self.scripts
                .apply(&envelope.sync_scripts, &envelope.remove_scripts)
                .await;
        }

        if let Some(run) = envelope.run {
            self.handle_run(run).await;
        }
        None
    }

    async fn handle_run(&self, assignment: RunAssignment) {
        let run_id = assignment.run_id.clone();
        debug!(
            "received run {run_id}: type={}, session={}",
            assignment.run_type, assignment.session_id
        );

        match self.launcher.spawn(&assignment).await {
            Ok(run) => {
                let pid = run.child.id();
                self.registry.add(run).await;
                if let Err(e) = self.client.report_started(&self.runner_id, &run_id).await {
                    error!("failed to report started for {run_id}: {e}");
                }
                info!(
                    "run {run_id} started (pid={pid:?}, running={})",
                    self.registry.count().await
                );
            }
            Err(e) => {
                error!("failed to start run {run_id}: {e:#}");
                if let Err(report_err) = self
                    .client
                    .report_failed(&self.runner_id, &run_id, &format!("{e:#}"))
                    .await
                {
                    error!("failed to report spawn failure for {run_id}: {report_err}");
                }
            }
        }
    }
}
