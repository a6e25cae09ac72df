//! Runner-facing coordinator state: registry, command queues, wake events.
//!
//! Everything here is in-memory. Runners re-register after a coordinator
//! restart; stale persisted runs are recovered separately at startup.

mod commands;
mod registry;
mod wake;

pub use commands::{CommandQueues, DrainedCommands};
pub use registry::{RunnerInfo, RunnerRegistry};
pub use wake::WakeHub;
