//! In-memory runner registry with heartbeat liveness and latched
//! deregistration.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use drover_protocol::RegisterRequest;

use super::wake::WakeHub;

/// A registered runner.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerInfo {
    pub runner_id: String,
    pub hostname: String,
    pub project_dir: Option<String>,
    pub executor_type: String,
    /// Effective tag set: static registration tags plus the most recently
    /// advertised per-poll tags.
    pub tags: BTreeSet<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    /// Latched by deregister; consumed by the next poll.
    pub deregistered: bool,
    #[serde(skip)]
    static_tags: BTreeSet<String>,
}

/// Registry of live runners.
pub struct RunnerRegistry {
    runners: DashMap<String, RunnerInfo>,
    wake: Arc<WakeHub>,
    heartbeat_timeout: Duration,
}

impl RunnerRegistry {
    pub fn new(wake: Arc<WakeHub>, heartbeat_timeout_secs: u64) -> Self {
        Self {
            runners: DashMap::new(),
            wake,
            heartbeat_timeout: Duration::seconds(heartbeat_timeout_secs as i64),
        }
    }

    /// Register a runner, issuing an opaque ID.
    ///
    /// The executor type always joins the static tag set so resume runs,
    /// which demand their session's executor type, route to a compatible
    /// runner.
    pub fn register(&self, req: RegisterRequest) -> RunnerInfo {
        let now = Utc::now();
        let mut static_tags = req.tags;
        static_tags.insert(req.executor_type.clone());
        let info = RunnerInfo {
            runner_id: format!("runner_{}", Uuid::new_v4()),
            hostname: req.hostname,
            project_dir: req.project_dir,
            executor_type: req.executor_type,
            tags: static_tags.clone(),
            registered_at: now,
            last_heartbeat: now,
            deregistered: false,
            static_tags,
        };

        self.runners.insert(info.runner_id.clone(), info.clone());
        info!(runner_id = %info.runner_id, hostname = %info.hostname, "runner registered");
        info
    }

    /// Refresh a runner's heartbeat. Returns false for unknown runners.
    pub fn heartbeat(&self, runner_id: &str) -> bool {
        match self.runners.get_mut(runner_id) {
            Some(mut entry) => {
                entry.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Merge per-poll tags into the runner's effective tag set and return
    /// it. Also refreshes the heartbeat: a polling runner is a live runner.
    pub fn advertise_tags(
        &self,
        runner_id: &str,
        poll_tags: &BTreeSet<String>,
    ) -> Option<BTreeSet<String>> {
        let mut entry = self.runners.get_mut(runner_id)?;
        let mut effective = entry.static_tags.clone();
        effective.extend(poll_tags.iter().cloned());
        entry.tags = effective.clone();
        entry.last_heartbeat = Utc::now();
        Some(effective)
    }

    /// Latch the deregistration bit and wake the runner's poll.
    pub fn deregister(&self, runner_id: &str) -> bool {
        match self.runners.get_mut(runner_id) {
            Some(mut entry) => {
                entry.deregistered = true;
                drop(entry);
                self.wake.notify(runner_id);
                info!(runner_id, "runner deregistration latched");
                true
            }
            None => false,
        }
    }

    /// Consume a latched deregistration: returns true exactly once, and
    /// removes the entry.
    pub fn take_deregistered(&self, runner_id: &str) -> bool {
        let latched = self
            .runners
            .get(runner_id)
            .map(|entry| entry.deregistered)
            .unwrap_or(false);

        if latched {
            self.runners.remove(runner_id);
            self.wake.remove(runner_id);
            info!(runner_id, "runner removed after deregistration");
        }
        latched
    }

    pub fn get(&self, runner_id: &str) -> Option<RunnerInfo> {
        self.runners.get(runner_id).map(|e| e.clone())
    }

    pub fn exists(&self, runner_id: &str) -> bool {
        self.runners.contains_key(runner_id)
    }

    /// `is_alive ⇔ now − last_heartbeat < heartbeat_timeout`.
    pub fn is_alive(&self, runner_id: &str) -> bool {
        self.runners
            .get(runner_id)
            .map(|e| Utc::now() - e.last_heartbeat < self.heartbeat_timeout)
            .unwrap_or(false)
    }

    pub fn list(&self) -> Vec<RunnerInfo> {
        self.runners.iter().map(|e| e.clone()).collect()
    }

    /// Live runners, optionally filtered by a tag they advertise.
    pub fn list_live(&self, by_tag: Option<&str>) -> Vec<RunnerInfo> {
        let now = Utc::now();
        self.runners
            .iter()
            .filter(|e| now - e.last_heartbeat < self.heartbeat_timeout)
            .filter(|e| by_tag.is_none_or(|tag| e.tags.contains(tag)))
            .map(|e| e.clone())
            .collect()
    }

    /// Evict runners whose heartbeat lapsed. Returns the evicted IDs.
    pub fn evict_dead(&self) -> Vec<String> {
        let now = Utc::now();
        let dead: Vec<String> = self
            .runners
            .iter()
            .filter(|e| now - e.last_heartbeat >= self.heartbeat_timeout)
            .map(|e| e.runner_id.clone())
            .collect();

        for runner_id in &dead {
            self.runners.remove(runner_id);
            self.wake.remove(runner_id);
            info!(runner_id, "evicted runner after heartbeat timeout");
        }
        dead
    }
}
