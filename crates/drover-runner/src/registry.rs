//! Registry of running executor subprocesses.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Captured output buffer filled by a background reader task.
///
/// Readers start at spawn so output survives the child closing its pipes
/// before the supervisor looks; an empty buffer is a valid outcome.
pub type OutputBuffer = Arc<Mutex<String>>;

/// A running executor subprocess.
pub struct RunningRun {
    pub run_id: String,
    pub session_id: String,
    pub child: Child,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
    pub stdout_reader: Option<JoinHandle<()>>,
    pub stderr_reader: Option<JoinHandle<()>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RunningRun {
    /// Wait briefly for the reader tasks, then return captured output.
    pub async fn collect_output(&mut self) -> (String, String) {
        for handle in [self.stdout_reader.take(), self.stderr_reader.take()]
            .into_iter()
            .flatten()
        {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }

        let stdout = self.stdout.lock().await.clone();
        let stderr = self.stderr.lock().await.clone();
        (stdout, stderr)
    }
}

/// Shared registry of running runs.
#[derive(Clone, Default)]
pub struct RunningRuns {
    inner: Arc<Mutex<HashMap<String, RunningRun>>>,
}

impl RunningRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, run: RunningRun) {
        self.inner.lock().await.insert(run.run_id.clone(), run);
    }

    /// Remove a run, returning it for supervision or stopping.
    pub async fn remove(&self, run_id: &str) -> Option<RunningRun> {
        self.inner.lock().await.remove(run_id)
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// IDs of runs whose subprocess has exited.
    pub async fn finished_run_ids(&self) -> Vec<String> {
        let mut map = self.inner.lock().await;
        map.iter_mut()
            .filter_map(|(run_id, run)| match run.child.try_wait() {
                Ok(Some(_)) => Some(run_id.clone()),
                _ => None,
            })
            .collect()
    }
}
