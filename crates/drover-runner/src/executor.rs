//! Executor subprocess launcher.
//!
//! Spawns the configured executor with the invocation payload on stdin.
//! `${runner.*}` placeholders left in the blueprint by the coordinator are
//! substituted here, immediately before spawn.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;

use drover_protocol::{ExecutorInvocation, RunAssignment, RunType};

use crate::registry::{OutputBuffer, RunningRun};

/// Builds invocation payloads and spawns executor subprocesses.
pub struct ExecutorLauncher {
    command: String,
    default_project_dir: PathBuf,
    /// Values substituted for `${runner.<key>}` placeholders.
    runner_vars: HashMap<String, String>,
}

impl ExecutorLauncher {
    pub fn new(
        command: String,
        default_project_dir: PathBuf,
        runner_vars: HashMap<String, String>,
    ) -> Self {
        Self {
            command,
            default_project_dir,
            runner_vars,
        }
    }

    /// Spawn the executor for an assignment.
    pub async fn spawn(&self, assignment: &RunAssignment) -> Result<RunningRun> {
        let invocation = self.build_invocation(assignment);
        let payload = invocation.to_json().context("encoding invocation payload")?;
        debug!("spawning executor: {}", invocation.log_summary());

        let cwd = assignment
            .project_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_project_dir.clone());

        let mut child = Command::new(&self.command)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning executor '{}'", self.command))?;

        // Write the payload and close stdin so the executor sees EOF.
        let mut stdin = child
            .stdin
            .take()
            .context("executor child has no stdin handle")?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .context("writing invocation payload")?;
        drop(stdin);

        let stdout_buf: OutputBuffer = Arc::new(Mutex::new(String::new()));
        let stderr_buf: OutputBuffer = Arc::new(Mutex::new(String::new()));
        let stdout_reader = child.stdout.take().map(|pipe| read_pipe(pipe, stdout_buf.clone()));
        let stderr_reader = child.stderr.take().map(|pipe| read_pipe(pipe, stderr_buf.clone()));

        Ok(RunningRun {
            run_id: assignment.run_id.clone(),
            session_id: assignment.session_id.clone(),
            child,
            stdout: stdout_buf,
            stderr: stderr_buf,
            stdout_reader,
            stderr_reader,
            started_at: Utc::now(),
        })
    }

    fn build_invocation(&self, assignment: &RunAssignment) -> ExecutorInvocation {
        let mut invocation = match assignment.run_type {
            RunType::StartSession => {
                let mut inv =
                    ExecutorInvocation::start(&assignment.session_id, &assignment.prompt);
                inv.project_dir = assignment.project_dir.clone();
                inv.agent_blueprint = assignment
                    .agent_blueprint
                    .as_ref()
                    .map(|bp| self.substitute_runner_vars(bp));
                inv
            }
            RunType::ResumeSession => {
                ExecutorInvocation::resume(&assignment.session_id, &assignment.prompt)
            }
        };

        let mut metadata = Map::new();
        metadata.insert(
            "run_id".to_string(),
            Value::String(assignment.run_id.clone()),
        );
        if let Some(executor_session_id) = &assignment.executor_session_id {
            metadata.insert(
                "executor_session_id".to_string(),
                Value::String(executor_session_id.clone()),
            );
        }
        invocation.metadata = metadata;
        invocation
    }

    /// Replace `${runner.<key>}` tokens with this runner's values.
    /// Unknown runner keys are preserved and logged.
    fn substitute_runner_vars(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_runner_vars(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(
                items.iter().map(|v| self.substitute_runner_vars(v)).collect(),
            ),
            Value::String(s) => Value::String(self.substitute_string(s)),
            other => other.clone(),
        }
    }

    fn substitute_string(&self, s: &str) -> String {
        let mut result = s.to_string();
        for (key, value) in &self.runner_vars {
            result = result.replace(&format!("${{runner.{key}}}"), value);
        }
        if result.contains("${runner.") {
            warn!("unresolved runner placeholder left in blueprint: {result}");
        }
        result
    }

    /// Non-blocking check that the executor binary can plausibly run.
    pub fn command(&self) -> &str {
        &self.command
    }
}

fn read_pipe<R>(mut pipe: R, buffer: OutputBuffer) -> tokio::task::JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = String::new();
        let _ = pipe.read_to_string(&mut collected).await;
        *buffer.lock().await = collected;
    })
}
