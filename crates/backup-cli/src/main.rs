mod cmd;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "backup-agent",
    about = "Unattended backups with rsync, rclone or a custom command, gated by preconditions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (default: ~/.config/backup-agent/config.yaml)
    #[arg(long, global = true, env = "BACKUP_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling loop until interrupted
    Run {
        /// Run one backup cycle now, ignoring the schedule, then exit
        #[arg(long)]
        once: bool,
        /// Print every status event as a JSON line on stdout
        #[arg(long)]
        events: bool,
    },

    /// Show the last recorded result and when the next backup is due
    Status {
        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Validate the configuration and evaluate the preconditions once
    Check {
        /// Output as JSON
        #[arg(long, short = 'j')]
        json: bool,
    },

    /// Push the next backup back by a number of hours
    Postpone {
        /// Hours to add to the next due time (fractions allowed)
        hours: f64,
    },

    /// Write a commented default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // Logs go to stderr so `--json` and `--events` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = cmd::config_path(cli.config).and_then(|config| match cli.command {
        Commands::Run { once, events } => cmd::run::run(&config, once, events),
        Commands::Status { json } => cmd::status::run(&config, json),
        Commands::Check { json } => cmd::check::run(&config, json),
        Commands::Postpone { hours } => cmd::postpone::run(&config, hours),
        Commands::Init { force } => cmd::init::run(&config, force),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
