//! drover-runner - worker daemon for the Drover coordinator.
//!
//! Registers with the coordinator, then runs three concurrent loops:
//! a long-poller that receives runs and commands, a supervisor that
//! watches executor subprocesses, and a heartbeat timer. Exit code 0 means
//! a clean deregistration; anything else is an abnormal shutdown.

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

mod api_client;
mod config;
mod executor;
mod poller;
mod registry;
mod scripts;
mod supervisor;

use api_client::CoordinatorClient;
use config::RunnerConfig;
use executor::ExecutorLauncher;
use poller::{PollerExit, RunPoller};
use registry::RunningRuns;
use scripts::ScriptSync;
use supervisor::RunSupervisor;

use drover_protocol::RegisterRequest;

fn main() {
    let config = RunnerConfig::parse();
    init_logging(config.verbose);

    let exit_code = run(config);
    std::process::exit(exit_code);
}

#[tokio::main]
async fn run(config: RunnerConfig) -> i32 {
    let client = match CoordinatorClient::new(&config.coordinator_url, &config.api_key) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to build coordinator client: {e:#}");
            return 1;
        }
    };

    let hostname = RunnerConfig::hostname();
    let project_dir = config.effective_project_dir();

    let registration = match client
        .register(&RegisterRequest {
            hostname: hostname.clone(),
            project_dir: Some(project_dir.display().to_string()),
            executor_type: config.executor_type.clone(),
            tags: config.tags.0.clone(),
        })
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("registration failed: {e:#}");
            return 1;
        }
    };

    let runner_id = registration.runner_id.clone();
    info!(
        "registered as {runner_id} (host={hostname}, executor={}, tags={:?})",
        config.executor_type, config.tags.0
    );

    // Values the coordinator left for runner-side substitution.
    let runner_vars = HashMap::from([
        ("hostname".to_string(), hostname),
        (
            "project_dir".to_string(),
            project_dir.display().to_string(),
        ),
        (
            "scripts_dir".to_string(),
            config.scripts_dir.display().to_string(),
        ),
        ("executor_type".to_string(), config.executor_type.clone()),
    ]);

    let launcher = ExecutorLauncher::new(
        config.executor_command.clone(),
        project_dir,
        runner_vars,
    );
    info!("executor command: {}", launcher.command());

    let registry = RunningRuns::new();
    let supervisor = Arc::new(RunSupervisor::new(
        client.clone(),
        registry.clone(),
        runner_id.clone(),
        config.check_interval_secs,
    ));
    let poller = RunPoller::new(
        client.clone(),
        launcher,
        registry.clone(),
        supervisor.clone(),
        ScriptSync::new(client.clone(), config.scripts_dir.clone()),
        runner_id.clone(),
        registration.poll_timeout_secs,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    // Supervisor loop.
    let supervisor_task = {
        let supervisor = supervisor.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { supervisor.run(shutdown).await })
    };

    // Heartbeat loop. Failures are logged only; the poller owns the
    // decision to give up on the coordinator.
    let heartbeat_task = {
        let client = client.clone();
        let runner_id = runner_id.clone();
        let mut shutdown = shutdown_tx.subscribe();
        let interval_secs = registration.heartbeat_interval_secs.max(1);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.tick().await; // first tick is immediate; registration counts
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = client.heartbeat(&runner_id).await {
                            warn!("heartbeat failed: {e:#}");
                        }
                    }
                }
            }
        })
    };

    // Ctrl-C requests a clean shutdown with best-effort deregistration.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let exit = poller.run(shutdown_tx.subscribe()).await;
    let _ = shutdown_tx.send(());
    let _ = heartbeat_task.await;
    let _ = supervisor_task.await;

    match exit {
        PollerExit::Deregistered => {
            info!("deregistered by coordinator; exiting cleanly");
            0
        }
        PollerExit::Interrupted => {
            // Deregister so the coordinator does not wait out the
            // heartbeat timeout.
            match client.deregister(&runner_id).await {
                Ok(()) => {
                    info!("deregistered; exiting cleanly");
                    0
                }
                Err(e) => {
                    warn!("deregistration failed during shutdown: {e:#}");
                    1
                }
            }
        }
        PollerExit::ConnectionLost => {
            // Surface the problem to operators; the deregistration is
            // best-effort since the coordinator is likely unreachable.
            let _ = client.deregister(&runner_id).await;
            1
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match default_level {
            LevelFilter::Debug => "debug",
            _ => "info",
        },
    ))
    .format_timestamp_secs()
    .init();
}
