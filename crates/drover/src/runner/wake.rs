//! Per-runner wake events.
//!
//! The dispatcher parks each long-poll on its runner's `Notify`; queue
//! inserts, command inserts, and deregistration all signal it. A permit is
//! stored when nobody is waiting, so a command enqueued between polls wakes
//! the next poll immediately.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Hub of per-runner wake events.
#[derive(Debug, Default)]
pub struct WakeHub {
    events: DashMap<String, Arc<Notify>>,
}

impl WakeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wake handle for a runner, created on first use.
    pub fn handle(&self, runner_id: &str) -> Arc<Notify> {
        self.events
            .entry(runner_id.to_string())
            .or_default()
            .clone()
    }

    /// Signal a runner's poll.
    pub fn notify(&self, runner_id: &str) {
        self.handle(runner_id).notify_one();
    }

    /// Drop a runner's wake state after deregistration.
    pub fn remove(&self, runner_id: &str) {
        self.events.remove(runner_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_notify_before_wait_is_not_lost() {
        let hub = WakeHub::new();
        hub.notify("r1");

        // The stored permit satisfies the next wait without blocking.
        tokio::time::timeout(Duration::from_millis(50), hub.handle("r1").notified())
            .await
            .expect("stored permit should wake immediately");
    }

    #[tokio::test]
    async fn test_wait_then_notify() {
        let hub = WakeHub::new();
        let handle = hub.handle("r1");

        let waiter = tokio::spawn(async move { handle.notified().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        hub.notify("r1");

        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
    }
}
