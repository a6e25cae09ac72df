//! Session lifecycle rules on top of the repository.

use crate::time::now_ts;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use drover_protocol::{SessionEventBody, SessionEventType};

use super::models::{Session, SessionAffinity, SessionStatus, StoredEvent};
use super::repository::SessionRepository;

/// Errors surfaced by the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} is already bound to a different executor session")]
    BindConflict(String),

    #[error("session {0} is terminal; no further events accepted")]
    SessionTerminal(String),

    #[error("session {0} has no terminal result")]
    NotFinished(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub session_name: Option<String>,
    pub project_dir: Option<String>,
    pub agent_name: Option<String>,
    pub parent_session_name: Option<String>,
}

/// Parameters for the executor-binding handshake.
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub executor_session_id: String,
    pub hostname: String,
    pub executor_type: String,
    pub project_dir: Option<String>,
}

/// Outcome of appending an event: the stored event plus the session status
/// transition it caused, if any.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub event: StoredEvent,
    pub new_status: Option<SessionStatus>,
}

/// Session store: owns lifecycle invariants over session rows and their
/// append-only event logs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    repo: SessionRepository,
}

impl SessionStore {
    pub fn new(repo: SessionRepository) -> Self {
        Self { repo }
    }

    /// Create a session in `pending`. The ID is coordinator-generated;
    /// sessions pre-exist their executor.
    pub async fn create_session(&self, params: NewSession) -> Result<Session, StoreError> {
        let session_id = format!("sess_{}", Uuid::new_v4());
        let session = Session {
            session_id: session_id.clone(),
            session_name: params.session_name.unwrap_or_else(|| session_id.clone()),
            status: SessionStatus::Pending,
            executor_session_id: None,
            executor_type: None,
            hostname: None,
            project_dir: params.project_dir,
            agent_name: params.agent_name,
            parent_session_name: params.parent_session_name,
            created_at: now_ts(),
            last_resumed_at: None,
        };

        self.repo.create(&session).await?;
        debug!(session_id = %session.session_id, "created session");
        Ok(session)
    }

    /// Executor-binding handshake. Write-once for `executor_session_id`:
    /// a repeat bind with the same value is accepted, a different value is
    /// a conflict and leaves the session untouched.
    pub async fn bind(&self, session_id: &str, req: BindRequest) -> Result<Session, StoreError> {
        let mut tx = self.repo.pool().begin().await?;

        let session = SessionRepository::get_in(&mut tx, session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        if session.status.is_terminal() {
            return Err(StoreError::SessionTerminal(session_id.to_string()));
        }

        if let Some(existing) = &session.executor_session_id {
            if *existing != req.executor_session_id {
                return Err(StoreError::BindConflict(session_id.to_string()));
            }
            // Idempotent re-bind; affinity fields are already set.
            tx.rollback().await?;
            return Ok(session);
        }

        SessionRepository::apply_bind_in(
            &mut tx,
            session_id,
            &req.executor_session_id,
            &req.hostname,
            &req.executor_type,
            req.project_dir.as_deref(),
        )
        .await?;

        let bound = SessionRepository::get_in(&mut tx, session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        tx.commit().await?;
        debug!(session_id, executor_session_id = %req.executor_session_id, "session bound");
        Ok(bound)
    }

    /// Append an event. Assigns the next sequence number; rejects appends
    /// after a terminal event; terminal events transition the session.
    pub async fn append_event(
        &self,
        session_id: &str,
        body: SessionEventBody,
    ) -> Result<AppendOutcome, StoreError> {
        let mut tx = self.repo.pool().begin().await?;

        let session = SessionRepository::get_in(&mut tx, session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        if session.status.is_terminal() {
            return Err(StoreError::SessionTerminal(session_id.to_string()));
        }

        let seq = SessionRepository::next_seq_in(&mut tx, session_id).await?;
        let event = StoredEvent {
            session_id: session_id.to_string(),
            seq,
            timestamp: now_ts(),
            body,
        };
        SessionRepository::insert_event_in(&mut tx, &event).await?;

        let new_status = match event.body.event_type() {
            SessionEventType::RunCompleted => Some(SessionStatus::Finished),
            SessionEventType::RunFailed => Some(SessionStatus::Failed),
            _ => None,
        };
        if let Some(status) = new_status {
            SessionRepository::set_status_in(&mut tx, session_id, status).await?;
        }

        tx.commit().await?;
        Ok(AppendOutcome { event, new_status })
    }

    /// Current status of a session.
    pub async fn get_status(&self, session_id: &str) -> Result<SessionStatus, StoreError> {
        Ok(self.require(session_id).await?.status)
    }

    /// Textual payload of the most recent `run_completed` event.
    pub async fn get_result(&self, session_id: &str) -> Result<String, StoreError> {
        let session = self.require(session_id).await?;
        if session.status != SessionStatus::Finished {
            return Err(StoreError::NotFinished(session_id.to_string()));
        }

        let payload = self
            .repo
            .latest_completed_payload(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFinished(session_id.to_string()))?;

        let body: SessionEventBody =
            serde_json::from_str(&payload).map_err(|e| StoreError::Internal(e.into()))?;
        Ok(body.result_text().unwrap_or_default().to_string())
    }

    /// Resume routing info; `None` when the session is not yet bound.
    pub async fn get_affinity(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionAffinity>, StoreError> {
        let session = self.require(session_id).await?;

        let (Some(executor_session_id), Some(hostname), Some(executor_type)) = (
            session.executor_session_id,
            session.hostname,
            session.executor_type,
        ) else {
            return Ok(None);
        };

        Ok(Some(SessionAffinity {
            hostname,
            executor_type,
            project_dir: session.project_dir,
            executor_session_id,
        }))
    }

    pub async fn get_by_id(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.repo.get(session_id).await?)
    }

    /// Most recently created session with the given advisory name.
    pub async fn get_by_name(&self, session_name: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.repo.get_by_name(session_name).await?)
    }

    pub async fn list(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.repo.list().await?)
    }

    pub async fn list_events(&self, session_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        self.require(session_id).await?;
        Ok(self.repo.list_events(session_id).await?)
    }

    pub async fn update_metadata(
        &self,
        session_id: &str,
        session_name: Option<&str>,
        agent_name: Option<&str>,
        parent_session_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let updated = self
            .repo
            .update_metadata(session_id, session_name, agent_name, parent_session_name)
            .await?;
        if !updated {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Record a resume attempt against the session.
    pub async fn mark_resumed(&self, session_id: &str) -> Result<(), StoreError> {
        self.repo
            .touch_resumed(session_id, &now_ts())
            .await?;
        Ok(())
    }

    /// Delete a session and its events.
    pub async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        if !self.repo.delete(session_id).await? {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn require(&self, session_id: &str) -> Result<Session, StoreError> {
        self.repo
            .get(session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn store() -> SessionStore {
        let db = Database::in_memory().await.unwrap();
        SessionStore::new(SessionRepository::new(db.pool().clone()))
    }

    fn bind_req(executor_session_id: &str) -> BindRequest {
        BindRequest {
            executor_session_id: executor_session_id.to_string(),
            hostname: "worker-1".to_string(),
            executor_type: "claude-code".to_string(),
            project_dir: Some("/work".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert!(!session.is_bound());
    }

    #[tokio::test]
    async fn test_bind_roundtrips_through_affinity() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();

        let bound = store
            .bind(&session.session_id, bind_req("exec-1"))
            .await
            .unwrap();
        assert_eq!(bound.status, SessionStatus::Running);

        let affinity = store
            .get_affinity(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(affinity.executor_session_id, "exec-1");
        assert_eq!(affinity.hostname, "worker-1");
        assert_eq!(affinity.executor_type, "claude-code");
    }

    #[tokio::test]
    async fn test_bind_is_write_once() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();

        store
            .bind(&session.session_id, bind_req("exec-1"))
            .await
            .unwrap();

        // Same value: idempotent.
        store
            .bind(&session.session_id, bind_req("exec-1"))
            .await
            .unwrap();

        // Different value: conflict, first value survives.
        let err = store
            .bind(&session.session_id, bind_req("exec-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BindConflict(_)));

        let affinity = store
            .get_affinity(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(affinity.executor_session_id, "exec-1");
    }

    #[tokio::test]
    async fn test_affinity_unbound() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        assert!(store
            .get_affinity(&session.session_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_events_ordered_and_closed_by_terminal() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        let id = &session.session_id;

        store
            .append_event(id, SessionEventBody::SessionStart { metadata: None })
            .await
            .unwrap();
        store
            .append_event(
                id,
                SessionEventBody::Message {
                    role: "assistant".to_string(),
                    content: "working".to_string(),
                },
            )
            .await
            .unwrap();
        let outcome = store
            .append_event(
                id,
                SessionEventBody::RunCompleted {
                    result: Some("hi".to_string()),
                    exit_code: Some(0),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.new_status, Some(SessionStatus::Finished));

        let events = store.list_events(id).await.unwrap();
        let seqs: Vec<i64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        // Log is closed now.
        let err = store
            .append_event(
                id,
                SessionEventBody::Message {
                    role: "user".to_string(),
                    content: "late".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionTerminal(_)));
    }

    #[tokio::test]
    async fn test_result_round_trip() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        let id = &session.session_id;

        let err = store.get_result(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFinished(_)));

        store
            .append_event(
                id,
                SessionEventBody::RunCompleted {
                    result: Some("the answer".to_string()),
                    exit_code: Some(0),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get_result(id).await.unwrap(), "the answer");
        assert_eq!(store.get_status(id).await.unwrap(), SessionStatus::Finished);
    }

    #[tokio::test]
    async fn test_failed_session_has_no_result() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        let id = &session.session_id;

        store
            .append_event(
                id,
                SessionEventBody::RunFailed {
                    error: Some("boom".to_string()),
                    reason: None,
                    exit_code: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get_status(id).await.unwrap(), SessionStatus::Failed);
        assert!(matches!(
            store.get_result(id).await.unwrap_err(),
            StoreError::NotFinished(_)
        ));
    }

    #[tokio::test]
    async fn test_get_by_name_newest_wins() {
        let store = store().await;
        let first = store
            .create_session(NewSession {
                session_name: Some("review".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        // Force distinct created_at ordering.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store
            .create_session(NewSession {
                session_name: Some("review".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = store.get_by_name("review").await.unwrap().unwrap();
        assert_eq!(found.session_id, second.session_id);
        assert_ne!(found.session_id, first.session_id);
    }

    #[tokio::test]
    async fn test_delete_removes_session_and_events() {
        let store = store().await;
        let session = store.create_session(NewSession::default()).await.unwrap();
        store
            .append_event(
                &session.session_id,
                SessionEventBody::SessionStart { metadata: None },
            )
            .await
            .unwrap();

        store.delete(&session.session_id).await.unwrap();
        assert!(store
            .get_by_id(&session.session_id)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store.delete(&session.session_id).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }
}
