//! Server-sent-events fan-out for lifecycle events.

mod manager;

pub use manager::{SseManager, SseSubscription};
