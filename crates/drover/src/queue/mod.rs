//! Demand-matched run queue: pending/claimed/running/terminal state with
//! atomic claim, timeout reaping, and stale-run recovery.

mod models;
mod queue;
mod repository;
mod sweeper;

pub use models::{Demands, NewRun, Run, RunStatus};
pub use queue::{QueueError, RunQueue, TimeoutLimits};
pub use repository::RunRepository;
pub use sweeper::{spawn_sweeper, SweeperConfig};
pub(crate) use sweeper::finalize_failed_run;
