mod cmd;
mod output;

use clap::{Parser, Subcommand};
use machine_actions_core::AgentTag;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "machine-actions",
    about = "Run the actions queued for an agent, or a single command under a timeout",
    version,
    propagate_version = true
)]
struct Cli {
    /// Settings file (shell, environment, working directory, batch policy)
    #[arg(long, global = true, env = "MACHINE_ACTIONS_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one shell command, killing it when the timeout elapses
    Exec {
        /// Command text, passed to the shell with -c
        command: String,

        /// Time limit: 500ms, 2s, 1m or bare seconds (0 = none)
        #[arg(long, default_value = "0", value_parser = cmd::exec::parse_duration)]
        timeout: Duration,
    },

    /// Enqueue actions for an agent and run them until all have finished
    Run {
        /// Agent tag, e.g. machine-0 or unit-mysql-0
        #[arg(long)]
        agent: AgentTag,

        /// YAML or JSON list of {name, params} entries
        #[arg(long)]
        actions: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        Commands::Exec { .. } => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = cmd::load_settings(cli.config.as_deref()).and_then(|settings| match cli.command {
        Commands::Exec { command, timeout } => cmd::exec::run(&command, timeout, &settings, cli.json),
        Commands::Run { agent, actions } => cmd::run::run(&agent, &actions, &settings, cli.json),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
