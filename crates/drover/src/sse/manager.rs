//! SSE connection manager.
//!
//! Subscribers register an outbound queue with an optional session filter.
//! Broadcasting never blocks: frames are enqueued with `try_send`, and a
//! subscriber whose queue is full or closed is dropped on the spot.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use drover_protocol::StreamEventType;

/// Size of each subscriber's outbound frame buffer.
const CONNECTION_BUFFER_SIZE: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<String>,
    session_id_filter: Option<String>,
}

/// A registered SSE subscription: the connection ID plus the frame stream.
pub struct SseSubscription {
    pub connection_id: String,
    pub frames: mpsc::Receiver<String>,
}

/// Manages SSE connections and event broadcasting.
///
/// Event IDs are `<ms>-<type_abbrev>-<seq>` with `seq` the ordinal within
/// the millisecond; IDs are strictly increasing for the lifetime of the
/// process.
pub struct SseManager {
    connections: DashMap<String, Subscriber>,
    // (last millisecond, ordinal within it); guarded together so IDs never
    // go backwards even if the wall clock does.
    sequence: Mutex<(i64, u32)>,
}

impl SseManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            sequence: Mutex::new((0, 0)),
        }
    }

    /// Number of active subscribers.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a subscriber, optionally filtered to a single session.
    pub fn register(&self, session_id_filter: Option<String>) -> SseSubscription {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER_SIZE);
        let connection_id = format!("conn_{}", Uuid::new_v4());
        self.connections.insert(
            connection_id.clone(),
            Subscriber {
                tx,
                session_id_filter,
            },
        );
        debug!(connection_id, "SSE subscriber registered");
        SseSubscription {
            connection_id,
            frames: rx,
        }
    }

    /// Remove a subscriber.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    /// Next event ID for the given type.
    fn generate_event_id(&self, event_type: StreamEventType) -> String {
        let now_ms = Utc::now().timestamp_millis();
        let mut guard = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        let (last_ms, seq) = *guard;

        let (ms, seq) = if now_ms > last_ms {
            (now_ms, 1)
        } else {
            (last_ms, seq + 1)
        };
        *guard = (ms, seq);

        format!("{}-{}-{:03}", ms, event_type.abbrev(), seq)
    }

    /// Format one SSE frame.
    fn format_event(event_id: &str, event_type: StreamEventType, data: &Value) -> String {
        format!("id: {}\nevent: {}\ndata: {}\n\n", event_id, event_type, data)
    }

    /// Broadcast an event to every subscriber whose filter matches (or who
    /// has no filter). Returns the number of subscribers reached.
    pub fn broadcast(
        &self,
        event_type: StreamEventType,
        data: Value,
        session_id: Option<&str>,
    ) -> usize {
        if self.connections.is_empty() {
            return 0;
        }

        let event_id = self.generate_event_id(event_type);
        let frame = Self::format_event(&event_id, event_type, &data);

        let mut sent = 0;
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            if let (Some(filter), Some(session)) = (&entry.session_id_filter, session_id) {
                if filter != session {
                    continue;
                }
            }

            match entry.tx.try_send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(_) => dead.push(entry.key().clone()),
            }
        }

        for connection_id in dead {
            debug!(connection_id, "dropping dead SSE subscriber");
            self.connections.remove(&connection_id);
        }

        sent
    }
}

impl Default for SseManager {
    fn default() -> Self {
        Self::new()
    }
}
