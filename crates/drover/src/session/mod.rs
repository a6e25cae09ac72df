//! Session store: persistence and lifecycle rules for agent sessions.

mod models;
mod repository;
mod store;

pub use models::{Session, SessionAffinity, SessionStatus, StoredEvent};
pub use repository::SessionRepository;
pub use store::{AppendOutcome, BindRequest, NewSession, SessionStore, StoreError};
