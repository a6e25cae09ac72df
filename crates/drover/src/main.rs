use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use drover::config::AppConfig;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose, cli.common.quiet);

    match cli.command {
        Command::Serve(cmd) => async_serve(cli.common, cmd),
        Command::Config { command } => handle_config(&cli.common, command),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "drover", &mut io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn async_serve(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    let mut config = AppConfig::load(common.config.as_deref())?;
    if let Some(host) = cmd.host {
        config.server.host = host;
    }
    if let Some(port) = cmd.port {
        config.server.port = port;
    }
    if let Some(db) = cmd.db {
        config.database.path = db.to_string_lossy().into_owned();
    }

    drover::server::run(config).await
}

fn handle_config(common: &CommonOpts, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = AppConfig::load(common.config.as_deref())?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommand::Path => match &common.config {
            Some(path) => println!("{}", path.display()),
            None => println!("drover.toml (searched in the working directory)"),
        },
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("drover={default},tower_http=warn")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Drover - dispatches AI agent runs to a fleet of runners.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the coordinator HTTP server
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// SQLite database path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}
