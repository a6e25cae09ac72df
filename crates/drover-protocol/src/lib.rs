//! Wire types shared between the Drover coordinator and runners.
//!
//! Three surfaces live here:
//! - the session event vocabulary (`events`), used by the coordinator's
//!   event log and its SSE stream;
//! - the runner HTTP protocol (`poll`): registration, the long-poll
//!   envelope, and status reports;
//! - the executor invocation payload (`invocation`), the versioned JSON
//!   document a runner writes to the executor's stdin.

pub mod events;
pub mod invocation;
pub mod poll;

pub use events::{SessionEventBody, SessionEventType, StreamEventType};
pub use invocation::{ExecutorInvocation, InvocationError, InvocationMode, SCHEMA_VERSION};
pub use poll::{
    HeartbeatRequest, PollResponse, RegisterRequest, RegisterResponse, ReportCompletedRequest,
    ReportFailedRequest, ReportStartedRequest, ReportStoppedRequest, RunAssignment, RunType,
};
