//! Session database repository.
//!
//! Plain SQL access. Lifecycle rules (bind write-once, terminal event
//! handling) live in [`super::store::SessionStore`], which composes these
//! primitives inside transactions.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};

use drover_protocol::SessionEventBody;

use super::models::{Session, SessionStatus, StoredEvent};

const SESSION_COLUMNS: &str = "session_id, session_name, status, executor_session_id, \
     executor_type, hostname, project_dir, agent_name, parent_session_name, \
     created_at, last_resumed_at";

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for transactional composition in the store.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new session row.
    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, session_name, status, executor_session_id,
                executor_type, hostname, project_dir, agent_name,
                parent_session_name, created_at, last_resumed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.session_name)
        .bind(session.status.to_string())
        .bind(&session.executor_session_id)
        .bind(&session.executor_type)
        .bind(&session.hostname)
        .bind(&session.project_dir)
        .bind(&session.agent_name)
        .bind(&session.parent_session_name)
        .bind(&session.created_at)
        .bind(&session.last_resumed_at)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Get a session by ID.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session")?;

        Ok(session)
    }

    /// Get a session by ID inside a transaction.
    pub async fn get_in(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(conn)
        .await
    }

    /// Get the most recently created session with the given name.
    ///
    /// Names are advisory and may collide; the newest match wins, with
    /// `session_id` as the deterministic tie-break.
    pub async fn get_by_name(&self, session_name: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_name = ? \
             ORDER BY created_at DESC, session_id DESC LIMIT 1"
        ))
        .bind(session_name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session by name")?;

        Ok(session)
    }

    /// List all sessions, newest first.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing sessions")?;

        Ok(sessions)
    }

    /// Update advisory metadata fields. Only provided fields change.
    pub async fn update_metadata(
        &self,
        session_id: &str,
        session_name: Option<&str>,
        agent_name: Option<&str>,
        parent_session_name: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                session_name = COALESCE(?, session_name),
                agent_name = COALESCE(?, agent_name),
                parent_session_name = COALESCE(?, parent_session_name)
            WHERE session_id = ?
            "#,
        )
        .bind(session_name)
        .bind(agent_name)
        .bind(parent_session_name)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("updating session metadata")?;

        Ok(result.rows_affected() > 0)
    }

    /// Record that the session was resumed. A terminal session reopens to
    /// `running` so the resumed executor can append events again.
    pub async fn touch_resumed(&self, session_id: &str, now: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                last_resumed_at = ?,
                status = CASE
                    WHEN status IN ('finished', 'failed') THEN 'running'
                    ELSE status
                END
            WHERE session_id = ?
            "#,
        )
        .bind(now)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("touching last_resumed_at")?;

        Ok(())
    }

    /// Apply the bind handshake inside a transaction.
    pub async fn apply_bind_in(
        conn: &mut SqliteConnection,
        session_id: &str,
        executor_session_id: &str,
        hostname: &str,
        executor_type: &str,
        project_dir: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                executor_session_id = ?,
                hostname = ?,
                executor_type = ?,
                project_dir = COALESCE(?, project_dir),
                status = 'running'
            WHERE session_id = ?
            "#,
        )
        .bind(executor_session_id)
        .bind(hostname)
        .bind(executor_type)
        .bind(project_dir)
        .bind(session_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Update session status inside a transaction.
    pub async fn set_status_in(
        conn: &mut SqliteConnection,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE sessions SET status = ? WHERE session_id = ?")
            .bind(status.to_string())
            .bind(session_id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Next event sequence for a session, inside a transaction.
    pub async fn next_seq_in(
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(conn)
                .await?;

        Ok(row.0)
    }

    /// Insert an event row inside a transaction.
    pub async fn insert_event_in(
        conn: &mut SqliteConnection,
        event: &StoredEvent,
    ) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_string(&event.body)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "INSERT INTO events (session_id, seq, event_type, timestamp, payload) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.session_id)
        .bind(event.seq)
        .bind(event.body.event_type().to_string())
        .bind(&event.timestamp)
        .bind(payload)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// List all events for a session in sequence order.
    pub async fn list_events(&self, session_id: &str) -> Result<Vec<StoredEvent>> {
        let rows: Vec<(String, i64, String, String)> = sqlx::query_as(
            "SELECT session_id, seq, timestamp, payload FROM events \
             WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing events")?;

        rows.into_iter()
            .map(|(session_id, seq, timestamp, payload)| {
                let body: SessionEventBody =
                    serde_json::from_str(&payload).context("decoding event payload")?;
                Ok(StoredEvent {
                    session_id,
                    seq,
                    timestamp,
                    body,
                })
            })
            .collect()
    }

    /// Fetch the most recent terminal success payload for a session.
    pub async fn latest_completed_payload(&self, session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT payload FROM events \
             WHERE session_id = ? AND event_type = 'run_completed' \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching terminal payload")?;

        Ok(row.map(|(payload,)| payload))
    }

    /// Delete a session and (via cascade) its events.
    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(result.rows_affected() > 0)
    }
}
