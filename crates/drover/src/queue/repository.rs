//! Run database repository.

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};

use super::models::{Run, RunStatus};

const RUN_COLUMNS: &str = "run_id, session_id, run_type, status, demands, prompt, project_dir, \
     agent_name, agent_blueprint, parent_session_name, runner_id, error, \
     created_at, claimed_at, started_at, completed_at";

/// Repository for run persistence.
#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new run row.
    pub async fn create(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (
                run_id, session_id, run_type, status, demands, prompt,
                project_dir, agent_name, agent_blueprint, parent_session_name,
                runner_id, error, created_at, claimed_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.session_id)
        .bind(&run.run_type)
        .bind(run.status.to_string())
        .bind(run.demands.to_string())
        .bind(&run.prompt)
        .bind(&run.project_dir)
        .bind(&run.agent_name)
        .bind(&run.agent_blueprint)
        .bind(&run.parent_session_name)
        .bind(&run.runner_id)
        .bind(&run.error)
        .bind(&run.created_at)
        .bind(&run.claimed_at)
        .bind(&run.started_at)
        .bind(&run.completed_at)
        .execute(&self.pool)
        .await
        .context("creating run")?;

        Ok(())
    }

    /// Get a run by ID.
    pub async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?"
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching run")?;

        Ok(run)
    }

    /// Get a run by ID inside a transaction.
    pub async fn get_in(
        conn: &mut SqliteConnection,
        run_id: &str,
    ) -> Result<Option<Run>, sqlx::Error> {
        sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?"
        ))
        .bind(run_id)
        .fetch_optional(conn)
        .await
    }

    /// Pending runs in claim order: oldest first, run_id as tie-break.
    pub async fn list_pending_in(conn: &mut SqliteConnection) -> Result<Vec<Run>, sqlx::Error> {
        sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'pending' \
             ORDER BY created_at ASC, run_id ASC"
        ))
        .fetch_all(conn)
        .await
    }

    /// Runs currently claimed or running.
    pub async fn list_active(&self) -> Result<Vec<Run>> {
        let runs = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE status IN ('claimed', 'running') \
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing active runs")?;

        Ok(runs)
    }

    /// Most recent claimed/running run for a session, if any.
    pub async fn find_active_by_session(&self, session_id: &str) -> Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs \
             WHERE session_id = ? AND status IN ('claimed', 'running') \
             ORDER BY created_at DESC, run_id DESC LIMIT 1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("finding active run for session")?;

        Ok(run)
    }

    /// All runs, newest first.
    pub async fn list(&self) -> Result<Vec<Run>> {
        let runs = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing runs")?;

        Ok(runs)
    }

    /// Mark a run claimed inside a transaction.
    pub async fn mark_claimed_in(
        conn: &mut SqliteConnection,
        run_id: &str,
        runner_id: &str,
        now: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'claimed', runner_id = ?, claimed_at = ? \
             WHERE run_id = ? AND status = 'pending'",
        )
        .bind(runner_id)
        .bind(now)
        .bind(run_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark a run running inside a transaction.
    pub async fn mark_running_in(
        conn: &mut SqliteConnection,
        run_id: &str,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE runs SET status = 'running', started_at = ? WHERE run_id = ?")
            .bind(now)
            .bind(run_id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Apply a terminal transition inside a transaction.
    pub async fn mark_terminal_in(
        conn: &mut SqliteConnection,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        now: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE runs SET status = ?, error = ?, completed_at = ? WHERE run_id = ?",
        )
        .bind(status.to_string())
        .bind(error)
        .bind(now)
        .bind(run_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Runs eligible for timeout reaping.
    ///
    /// Three windows: pending runs nobody claimed within the claim
    /// timeout, claimed runs that never started within the claim timeout,
    /// and running runs past the run timeout.
    pub async fn list_timed_out(
        &self,
        pending_cutoff: &str,
        claim_cutoff: &str,
        run_cutoff: &str,
    ) -> Result<Vec<Run>> {
        let runs = sqlx::query_as::<_, Run>(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE \
                 (status = 'pending' AND created_at < ?) \
              OR (status = 'claimed' AND claimed_at < ?) \
              OR (status = 'running' AND started_at < ?) \
             ORDER BY created_at ASC"
        ))
        .bind(pending_cutoff)
        .bind(claim_cutoff)
        .bind(run_cutoff)
        .fetch_all(&self.pool)
        .await
        .context("listing timed-out runs")?;

        Ok(runs)
    }
}
