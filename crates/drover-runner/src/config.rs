//! Runner configuration.
//!
//! Everything is settable from the environment so the runner drops into a
//! systemd unit or container without a config file; CLI flags override.

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Number of consecutive connection failures before the runner gives up
/// and self-deregisters.
pub const MAX_CONNECTION_RETRIES: u32 = 3;

/// Initial connection backoff, seconds.
pub const INITIAL_BACKOFF_SECS: f64 = 1.0;

/// Backoff ceiling, seconds.
pub const MAX_BACKOFF_SECS: f64 = 30.0;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "drover-runner",
    about = "Polls the Drover coordinator and executes agent runs",
    version
)]
pub struct RunnerConfig {
    /// Coordinator base URL.
    #[arg(long, env = "DROVER_COORDINATOR_URL", default_value = "http://localhost:8765")]
    pub coordinator_url: String,

    /// API key presented as a bearer token. Empty disables auth headers.
    #[arg(long, env = "DROVER_API_KEY", default_value = "")]
    pub api_key: String,

    /// Long-poll timeout requested from the coordinator, seconds.
    #[arg(long, env = "POLL_TIMEOUT", default_value_t = 30)]
    pub poll_timeout_secs: u64,

    /// Heartbeat interval, seconds.
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value_t = 60)]
    pub heartbeat_interval_secs: u64,

    /// Supervisor check interval, seconds.
    #[arg(long, env = "CHECK_INTERVAL", default_value_t = 1)]
    pub check_interval_secs: u64,

    /// Default working directory for runs.
    #[arg(long, env = "PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Comma-separated capability tags.
    #[arg(long, env = "RUNNER_TAGS", default_value = "", value_parser = parse_tags)]
    pub tags: Tags,

    /// Executor program spawned per run; receives the invocation payload
    /// on stdin.
    #[arg(long, env = "DROVER_EXECUTOR", default_value = "drover-exec")]
    pub executor_command: String,

    /// Executor flavor reported to the coordinator.
    #[arg(long, env = "DROVER_EXECUTOR_TYPE", default_value = "claude-code")]
    pub executor_type: String,

    /// Directory where synced scripts are materialized.
    #[arg(long, env = "DROVER_SCRIPTS_DIR", default_value = "scripts")]
    pub scripts_dir: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Newtype so clap can parse a comma-separated tag set.
#[derive(Debug, Clone, Default)]
pub struct Tags(pub BTreeSet<String>);

fn parse_tags(raw: &str) -> Result<Tags, String> {
    Ok(Tags(
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

impl RunnerConfig {
    /// The effective project directory: configured value or the process
    /// working directory.
    pub fn effective_project_dir(&self) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// This machine's hostname as reported to the coordinator.
    pub fn hostname() -> String {
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                std::process::Command::new("hostname")
                    .output()
                    .ok()
                    .filter(|o| o.status.success())
                    .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            })
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }
}
