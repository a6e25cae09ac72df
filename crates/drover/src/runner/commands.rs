//! Per-runner command queues with async wake.
//!
//! Stop commands carry run IDs; script commands carry script names. Sync
//! and remove of the same script are mutually exclusive: queuing one
//! cancels the other. Every insert signals the runner's wake event so a
//! parked long-poll returns immediately.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use super::wake::WakeHub;

#[derive(Debug, Default)]
struct CommandState {
    stop_runs: BTreeSet<String>,
    sync_scripts: BTreeSet<String>,
    remove_scripts: BTreeSet<String>,
}

/// Commands handed to a runner in one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedCommands {
    pub stop_runs: Vec<String>,
    pub sync_scripts: Vec<String>,
    pub remove_scripts: Vec<String>,
}

impl DrainedCommands {
    pub fn is_empty(&self) -> bool {
        self.stop_runs.is_empty() && self.sync_scripts.is_empty() && self.remove_scripts.is_empty()
    }
}

/// Per-runner command queues.
pub struct CommandQueues {
    runners: DashMap<String, CommandState>,
    wake: Arc<WakeHub>,
}

impl CommandQueues {
    pub fn new(wake: Arc<WakeHub>) -> Self {
        Self {
            runners: DashMap::new(),
            wake,
        }
    }

    /// Create queue state for a newly registered runner.
    pub fn register_runner(&self, runner_id: &str) {
        self.runners.entry(runner_id.to_string()).or_default();
    }

    /// Drop queue state when a runner is removed.
    pub fn unregister_runner(&self, runner_id: &str) {
        self.runners.remove(runner_id);
    }

    /// Queue a stop for a run and wake the runner's poll.
    /// Returns false when the runner has no queue state.
    pub fn add_stop(&self, runner_id: &str, run_id: &str) -> bool {
        let Some(mut state) = self.runners.get_mut(runner_id) else {
            return false;
        };
        state.stop_runs.insert(run_id.to_string());
        drop(state);
        self.wake.notify(runner_id);
        debug!(runner_id, run_id, "stop command queued");
        true
    }

    /// Queue a script sync, cancelling any pending removal of the same
    /// script, and wake the runner's poll.
    pub fn add_sync(&self, runner_id: &str, script_name: &str) -> bool {
        let Some(mut state) = self.runners.get_mut(runner_id) else {
            return false;
        };
        state.remove_scripts.remove(script_name);
        state.sync_scripts.insert(script_name.to_string());
        drop(state);
        self.wake.notify(runner_id);
        true
    }

    /// Queue a script removal, cancelling any pending sync of the same
    /// script, and wake the runner's poll.
    pub fn add_remove(&self, runner_id: &str, script_name: &str) -> bool {
        let Some(mut state) = self.runners.get_mut(runner_id) else {
            return false;
        };
        state.sync_scripts.remove(script_name);
        state.remove_scripts.insert(script_name.to_string());
        drop(state);
        self.wake.notify(runner_id);
        true
    }

    /// Queue a script sync for every registered runner.
    pub fn add_sync_all(&self, script_name: &str) -> usize {
        let mut count = 0;
        for mut entry in self.runners.iter_mut() {
            entry.remove_scripts.remove(script_name);
            entry.sync_scripts.insert(script_name.to_string());
            count += 1;
        }
        for entry in self.runners.iter() {
            self.wake.notify(entry.key());
        }
        count
    }

    /// Queue a script removal for every registered runner.
    pub fn add_remove_all(&self, script_name: &str) -> usize {
        let mut count = 0;
        for mut entry in self.runners.iter_mut() {
            entry.sync_scripts.remove(script_name);
            entry.remove_scripts.insert(script_name.to_string());
            count += 1;
        }
        for entry in self.runners.iter() {
            self.wake.notify(entry.key());
        }
        count
    }

    /// Return all pending commands for a runner and clear them.
    pub fn drain(&self, runner_id: &str) -> DrainedCommands {
        let Some(mut state) = self.runners.get_mut(runner_id) else {
            return DrainedCommands::default();
        };

        DrainedCommands {
            stop_runs: std::mem::take(&mut state.stop_runs).into_iter().collect(),
            sync_scripts: std::mem::take(&mut state.sync_scripts)
                .into_iter()
                .collect(),
            remove_scripts: std::mem::take(&mut state.remove_scripts)
                .into_iter()
                .collect(),
        }
    }

    /// Whether any command is pending for a runner.
    pub fn has_pending(&self, runner_id: &str) -> bool {
        self.runners
            .get(runner_id)
            .map(|s| {
                !s.stop_runs.is_empty()
                    || !s.sync_scripts.is_empty()
                    || !s.remove_scripts.is_empty()
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues() -> CommandQueues {
        let queues = CommandQueues::new(Arc::new(WakeHub::new()));
        queues.register_runner("r1");
        queues
    }

    #[test]
    fn test_drain_clears_and_is_idempotent() {
        let queues = queues();
        queues.add_stop("r1", "run_1");
        queues.add_sync("r1", "lint.sh");

        let drained = queues.drain("r1");
        assert_eq!(drained.stop_runs, vec!["run_1".to_string()]);
        assert_eq!(drained.sync_scripts, vec!["lint.sh".to_string()]);

        // Second drain yields empty sets.
        assert!(queues.drain("r1").is_empty());
        assert!(!queues.has_pending("r1"));
    }

    #[test]
    fn test_sync_and_remove_are_mutually_exclusive() {
        let queues = queues();

        queues.add_sync("r1", "lint.sh");
        queues.add_remove("r1", "lint.sh");
        let drained = queues.drain("r1");
        assert!(drained.sync_scripts.is_empty());
        assert_eq!(drained.remove_scripts, vec!["lint.sh".to_string()]);

        queues.add_remove("r1", "lint.sh");
        queues.add_sync("r1", "lint.sh");
        let drained = queues.drain("r1");
        assert_eq!(drained.sync_scripts, vec!["lint.sh".to_string()]);
        assert!(drained.remove_scripts.is_empty());
    }

    #[test]
    fn test_unknown_runner_rejected() {
        let queues = queues();
        assert!(!queues.add_stop("r2", "run_1"));
        assert!(queues.drain("r2").is_empty());
    }

    #[test]
    fn test_broadcast_hits_all_runners() {
        let queues = queues();
        queues.register_runner("r2");

        assert_eq!(queues.add_sync_all("deploy.sh"), 2);
        assert_eq!(
            queues.drain("r1").sync_scripts,
            vec!["deploy.sh".to_string()]
        );
        assert_eq!(
            queues.drain("r2").sync_scripts,
            vec!["deploy.sh".to_string()]
        );
    }
}
